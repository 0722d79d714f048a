//! Model Registry: `register` / `getProduction` / `setProduction` /
//! `listRecent`, backed by `bd-db`'s `model_artifacts` table.

use anyhow::{Context, Result};
use bd_audit::AuditWriter;
use bd_schemas::{ArtifactStatus, ModelArtifact, ModelMetrics};
use sqlx::PgPool;
use uuid::Uuid;

fn status_from_str(s: &str) -> ArtifactStatus {
    match s {
        "production" => ArtifactStatus::Production,
        "retired" => ArtifactStatus::Retired,
        _ => ArtifactStatus::Staging,
    }
}

fn row_to_artifact(row: bd_db::core::ModelArtifactRow) -> Result<ModelArtifact> {
    let metrics: ModelMetrics = serde_json::from_value(row.metrics_json)
        .context("model_artifacts.metrics_json did not match ModelMetrics")?;
    Ok(ModelArtifact {
        id: row.id,
        family: row.family,
        version: row.version,
        created_at: row.created_at,
        status: status_from_str(&row.status),
        metrics,
        model_blob: row.model_blob,
    })
}

/// Atomic insert with unique `(family, version)`; defaults to `staging`.
pub async fn register(
    pool: &PgPool,
    family: &str,
    version: i64,
    metrics: &ModelMetrics,
    model_blob: &[u8],
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let metrics_json = serde_json::to_value(metrics)?;
    bd_db::core::register_artifact(pool, id, family, version, &metrics_json, model_blob).await?;
    Ok(id)
}

pub async fn get_production(pool: &PgPool, family: &str) -> Result<Option<ModelArtifact>> {
    match bd_db::core::get_production(pool, family).await? {
        Some(row) => Ok(Some(row_to_artifact(row)?)),
        None => Ok(None),
    }
}

pub async fn get_artifact(pool: &PgPool, id: Uuid) -> Result<Option<ModelArtifact>> {
    match bd_db::core::get_artifact(pool, id).await? {
        Some(row) => Ok(Some(row_to_artifact(row)?)),
        None => Ok(None),
    }
}

/// Single-writer transactional swap. Must be invoked only by the
/// Promotion Gate (`bd-promotion`).
pub async fn set_production(pool: &PgPool, family: &str, id: Uuid) -> Result<()> {
    bd_db::core::set_production(pool, family, id).await
}

/// Newest-first.
pub async fn list_recent(pool: &PgPool, family: &str, limit: i64) -> Result<Vec<ModelArtifact>> {
    bd_db::core::list_recent(pool, family, limit)
        .await?
        .into_iter()
        .map(row_to_artifact)
        .collect()
}

/// Startup consistency check (spec invariant): at most one
/// `status=production` row per family survives across crashes. Repairs
/// multiplicity by keeping the most recently promoted row and retiring
/// the rest, logging a `contract_violation` audit event when it had to
/// act.
pub async fn repair_production_multiplicity(
    pool: &PgPool,
    family: &str,
    audit: Option<(&mut AuditWriter, Uuid)>,
) -> Result<i64> {
    let repaired = bd_db::core::repair_production_multiplicity(pool, family).await?;
    if repaired > 0 {
        tracing::warn!(target: "registry", family, repaired, "multiple production artifacts found, repaired");
        if let Some((writer, run_id)) = audit {
            writer.append(
                run_id,
                "registry",
                "contract_violation",
                serde_json::json!({
                    "family": family,
                    "violation": "multiple_production_rows",
                    "repaired": repaired,
                }),
            )?;
        }
    }
    Ok(repaired)
}

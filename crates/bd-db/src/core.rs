//! Repository functions for the bottom-detection pipeline tables
//! (`bars`, `gap_segments`, `feature_snapshots`, `model_artifacts`,
//! `inference_logs`, `promotion_events`, `settings`). See
//! `migrations/0002_bottom_detection_core.sql` for the schema these
//! functions assume.
//!
//! All queries are plain runtime SQL (`sqlx::query`/`query_as`), matching
//! the rest of this crate — compile-time `query!` macros are not used so
//! the workspace can build without a live database available to `cargo`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Bars
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BarRow {
    pub symbol: String,
    pub interval_ms: i64,
    pub open_time_ms: i64,
    pub close_time_ms: i64,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume_micros: i64,
    pub trade_count: i64,
    pub is_closed: bool,
}

fn row_to_bar(row: &sqlx::postgres::PgRow) -> BarRow {
    BarRow {
        symbol: row.get("symbol"),
        interval_ms: row.get("interval_ms"),
        open_time_ms: row.get("open_time_ms"),
        close_time_ms: row.get("close_time_ms"),
        open_micros: row.get("open_micros"),
        high_micros: row.get("high_micros"),
        low_micros: row.get("low_micros"),
        close_micros: row.get("close_micros"),
        volume_micros: row.get("volume_micros"),
        trade_count: row.get("trade_count"),
        is_closed: row.get("is_closed"),
    }
}

/// Upsert a closed bar. Idempotent: replaying the same `open_time_ms`
/// replaces the row only if content differs (the `where` clause on the
/// conflict action makes an identical-content replay a no-op write).
pub async fn upsert_bar(pool: &PgPool, bar: &BarRow) -> Result<bool> {
    let res = sqlx::query(
        r#"
        insert into bars (
          symbol, interval_ms, open_time_ms, close_time_ms,
          open_micros, high_micros, low_micros, close_micros,
          volume_micros, trade_count, is_closed
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        on conflict (symbol, interval_ms, open_time_ms) do update set
          close_time_ms = excluded.close_time_ms,
          open_micros = excluded.open_micros,
          high_micros = excluded.high_micros,
          low_micros = excluded.low_micros,
          close_micros = excluded.close_micros,
          volume_micros = excluded.volume_micros,
          trade_count = excluded.trade_count,
          is_closed = excluded.is_closed
        where
          bars.close_time_ms is distinct from excluded.close_time_ms or
          bars.open_micros is distinct from excluded.open_micros or
          bars.high_micros is distinct from excluded.high_micros or
          bars.low_micros is distinct from excluded.low_micros or
          bars.close_micros is distinct from excluded.close_micros or
          bars.volume_micros is distinct from excluded.volume_micros or
          bars.trade_count is distinct from excluded.trade_count or
          bars.is_closed is distinct from excluded.is_closed
        "#,
    )
    .bind(&bar.symbol)
    .bind(bar.interval_ms)
    .bind(bar.open_time_ms)
    .bind(bar.close_time_ms)
    .bind(bar.open_micros)
    .bind(bar.high_micros)
    .bind(bar.low_micros)
    .bind(bar.close_micros)
    .bind(bar.volume_micros)
    .bind(bar.trade_count)
    .bind(bar.is_closed)
    .execute(pool)
    .await
    .context("upsert_bar failed")?;

    Ok(res.rows_affected() > 0)
}

pub async fn fetch_latest_bars(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
    limit: i64,
) -> Result<Vec<BarRow>> {
    let rows = sqlx::query(
        r#"
        select * from bars
        where symbol = $1 and interval_ms = $2 and is_closed
        order by open_time_ms desc
        limit $3
        "#,
    )
    .bind(symbol)
    .bind(interval_ms)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("fetch_latest_bars failed")?;

    let mut out: Vec<BarRow> = rows.iter().map(row_to_bar).collect();
    out.reverse();
    Ok(out)
}

pub async fn fetch_bars_range(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
    from_open_time_ms: i64,
    to_open_time_ms: i64,
) -> Result<Vec<BarRow>> {
    let rows = sqlx::query(
        r#"
        select * from bars
        where symbol = $1 and interval_ms = $2
          and open_time_ms >= $3 and open_time_ms <= $4
        order by open_time_ms asc
        "#,
    )
    .bind(symbol)
    .bind(interval_ms)
    .bind(from_open_time_ms)
    .bind(to_open_time_ms)
    .fetch_all(pool)
    .await
    .context("fetch_bars_range failed")?;

    Ok(rows.iter().map(row_to_bar).collect())
}

// ---------------------------------------------------------------------------
// Gap segments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GapSegmentRow {
    pub id: Uuid,
    pub symbol: String,
    pub interval_ms: i64,
    pub from_ts_ms: i64,
    pub to_ts_ms: i64,
    pub missing_count: i64,
    pub state: String,
}

/// Insert a new gap segment in `open` state, deduplicated by
/// `(symbol, interval_ms, from_ts_ms, to_ts_ms)`.
pub async fn insert_gap_segment(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
    from_ts_ms: i64,
    to_ts_ms: i64,
    missing_count: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into gap_segments (id, symbol, interval_ms, from_ts_ms, to_ts_ms, missing_count, state)
        values ($1,$2,$3,$4,$5,$6,'open')
        on conflict (symbol, interval_ms, from_ts_ms, to_ts_ms) do nothing
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(symbol)
    .bind(interval_ms)
    .bind(from_ts_ms)
    .bind(to_ts_ms)
    .bind(missing_count)
    .execute(pool)
    .await
    .context("insert_gap_segment failed")?;
    Ok(())
}

pub async fn set_gap_state(pool: &PgPool, id: Uuid, state: &str) -> Result<()> {
    sqlx::query("update gap_segments set state = $2 where id = $1")
        .bind(id)
        .bind(state)
        .execute(pool)
        .await
        .context("set_gap_state failed")?;
    Ok(())
}

pub async fn list_open_gaps(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
) -> Result<Vec<GapSegmentRow>> {
    let rows = sqlx::query(
        "select id, symbol, interval_ms, from_ts_ms, to_ts_ms, missing_count, state \
         from gap_segments where symbol = $1 and interval_ms = $2 and state != 'closed' \
         order by from_ts_ms asc",
    )
    .bind(symbol)
    .bind(interval_ms)
    .fetch_all(pool)
    .await
    .context("list_open_gaps failed")?;

    Ok(rows
        .iter()
        .map(|r| GapSegmentRow {
            id: r.get("id"),
            symbol: r.get("symbol"),
            interval_ms: r.get("interval_ms"),
            from_ts_ms: r.get("from_ts_ms"),
            to_ts_ms: r.get("to_ts_ms"),
            missing_count: r.get("missing_count"),
            state: r.get("state"),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Feature snapshots
// ---------------------------------------------------------------------------

pub async fn upsert_feature_snapshot(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
    close_time_ms: i64,
    schema_version: i32,
    features_json: &Value,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into feature_snapshots (symbol, interval_ms, close_time_ms, schema_version, features_json)
        values ($1,$2,$3,$4,$5)
        on conflict (symbol, interval_ms, close_time_ms, schema_version) do nothing
        "#,
    )
    .bind(symbol)
    .bind(interval_ms)
    .bind(close_time_ms)
    .bind(schema_version)
    .bind(features_json)
    .execute(pool)
    .await
    .context("upsert_feature_snapshot failed")?;
    Ok(())
}

pub async fn fetch_latest_feature_snapshot(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
    schema_version: i32,
) -> Result<Option<(i64, Value)>> {
    let row = sqlx::query(
        r#"
        select close_time_ms, features_json from feature_snapshots
        where symbol = $1 and interval_ms = $2 and schema_version = $3
        order by close_time_ms desc
        limit 1
        "#,
    )
    .bind(symbol)
    .bind(interval_ms)
    .bind(schema_version)
    .fetch_optional(pool)
    .await
    .context("fetch_latest_feature_snapshot failed")?;

    Ok(row.map(|r| (r.get("close_time_ms"), r.get("features_json"))))
}

pub async fn existing_feature_close_times(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
    schema_version: i32,
    from_close_time_ms: i64,
) -> Result<Vec<i64>> {
    let rows = sqlx::query(
        r#"
        select close_time_ms from feature_snapshots
        where symbol = $1 and interval_ms = $2 and schema_version = $3
          and close_time_ms >= $4
        "#,
    )
    .bind(symbol)
    .bind(interval_ms)
    .bind(schema_version)
    .bind(from_close_time_ms)
    .fetch_all(pool)
    .await
    .context("existing_feature_close_times failed")?;

    Ok(rows.iter().map(|r| r.get("close_time_ms")).collect())
}

// ---------------------------------------------------------------------------
// Model artifacts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ModelArtifactRow {
    pub id: Uuid,
    pub family: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub metrics_json: Value,
    pub model_blob: Vec<u8>,
}

fn row_to_artifact(row: &sqlx::postgres::PgRow) -> ModelArtifactRow {
    ModelArtifactRow {
        id: row.get("id"),
        family: row.get("family"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        status: row.get("status"),
        metrics_json: row.get("metrics_json"),
        model_blob: row.get("model_blob"),
    }
}

/// Atomic insert with unique `(family, version)`; new rows default to
/// `staging`.
pub async fn register_artifact(
    pool: &PgPool,
    id: Uuid,
    family: &str,
    version: i64,
    metrics_json: &Value,
    model_blob: &[u8],
) -> Result<()> {
    sqlx::query(
        r#"
        insert into model_artifacts (id, family, version, created_at, status, metrics_json, model_blob)
        values ($1,$2,$3,now(),'staging',$4,$5)
        "#,
    )
    .bind(id)
    .bind(family)
    .bind(version)
    .bind(metrics_json)
    .bind(model_blob)
    .execute(pool)
    .await
    .context("register_artifact failed (duplicate family/version?)")?;
    Ok(())
}

pub async fn get_production(pool: &PgPool, family: &str) -> Result<Option<ModelArtifactRow>> {
    let row = sqlx::query(
        "select * from model_artifacts where family = $1 and status = 'production' limit 1",
    )
    .bind(family)
    .fetch_optional(pool)
    .await
    .context("get_production failed")?;
    Ok(row.as_ref().map(row_to_artifact))
}

pub async fn get_artifact(pool: &PgPool, id: Uuid) -> Result<Option<ModelArtifactRow>> {
    let row = sqlx::query("select * from model_artifacts where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("get_artifact failed")?;
    Ok(row.as_ref().map(row_to_artifact))
}

/// Single-writer transactional swap: mark the previous production row
/// `retired`, the new one `production`. Caller (bd-promotion's Promotion
/// Gate) must be the only invoker.
pub async fn set_production(pool: &PgPool, family: &str, id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await.context("set_production: begin failed")?;

    sqlx::query("update model_artifacts set status = 'retired' where family = $1 and status = 'production'")
        .bind(family)
        .execute(&mut *tx)
        .await
        .context("set_production: retire previous failed")?;

    sqlx::query("update model_artifacts set status = 'production' where id = $1 and family = $2")
        .bind(id)
        .bind(family)
        .execute(&mut *tx)
        .await
        .context("set_production: promote candidate failed")?;

    tx.commit().await.context("set_production: commit failed")?;
    Ok(())
}

pub async fn list_recent(pool: &PgPool, family: &str, limit: i64) -> Result<Vec<ModelArtifactRow>> {
    let rows = sqlx::query(
        "select * from model_artifacts where family = $1 order by created_at desc limit $2",
    )
    .bind(family)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_recent failed")?;
    Ok(rows.iter().map(row_to_artifact).collect())
}

/// Startup consistency check: if more than one row has
/// `status='production'` for `family`, keep the most recently promoted
/// (by `created_at`) and retire the rest. Returns the number of rows
/// repaired (0 when no multiplicity was found).
pub async fn repair_production_multiplicity(pool: &PgPool, family: &str) -> Result<i64> {
    let rows = sqlx::query(
        "select id, created_at from model_artifacts where family = $1 and status = 'production' order by created_at desc",
    )
    .bind(family)
    .fetch_all(pool)
    .await
    .context("repair_production_multiplicity: select failed")?;

    if rows.len() <= 1 {
        return Ok(0);
    }

    let mut tx = pool.begin().await.context("repair: begin failed")?;
    for row in rows.iter().skip(1) {
        let id: Uuid = row.get("id");
        sqlx::query("update model_artifacts set status = 'retired' where id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("repair: retire failed")?;
    }
    tx.commit().await.context("repair: commit failed")?;

    Ok(rows.len() as i64 - 1)
}

// ---------------------------------------------------------------------------
// Inference logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewInferenceLog {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub symbol: String,
    pub interval_ms: i64,
    pub feature_close_time_ms: i64,
    pub probability: f64,
    pub threshold: f64,
    pub decision: i16,
    pub model_id: Uuid,
    pub model_version: i64,
    pub used_production: bool,
    pub extra_json: Value,
}

pub async fn insert_inference_log(pool: &PgPool, row: &NewInferenceLog) -> Result<()> {
    sqlx::query(
        r#"
        insert into inference_logs (
          id, created_at, symbol, interval_ms, feature_close_time_ms,
          probability, threshold, decision, model_id, model_version,
          used_production, extra_json
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
        "#,
    )
    .bind(row.id)
    .bind(row.created_at)
    .bind(&row.symbol)
    .bind(row.interval_ms)
    .bind(row.feature_close_time_ms)
    .bind(row.probability)
    .bind(row.threshold)
    .bind(row.decision)
    .bind(row.model_id)
    .bind(row.model_version)
    .bind(row.used_production)
    .bind(&row.extra_json)
    .execute(pool)
    .await
    .context("insert_inference_log failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InferenceLogRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub symbol: String,
    pub interval_ms: i64,
    pub feature_close_time_ms: i64,
    pub probability: f64,
    pub threshold: f64,
    pub decision: i16,
}

/// Select up to `limit` unrealized rows older than the age cutoff, locking
/// them so concurrent labeler invocations (scheduled loop + eager HTTP
/// pass) cannot double-claim. Postgres's native `for update skip locked`
/// is the single-writer mechanism spec §5 requires.
pub async fn select_unrealized_for_update(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
    created_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<InferenceLogRow>> {
    let rows = sqlx::query(
        r#"
        select id, created_at, symbol, interval_ms, feature_close_time_ms, probability, threshold
        from inference_logs
        where symbol = $1 and interval_ms = $2 and realized is null and created_at <= $3
        order by created_at asc
        limit $4
        for update skip locked
        "#,
    )
    .bind(symbol)
    .bind(interval_ms)
    .bind(created_before)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("select_unrealized_for_update failed")?;

    Ok(rows
        .iter()
        .map(|r| InferenceLogRow {
            id: r.get("id"),
            created_at: r.get("created_at"),
            symbol: r.get("symbol"),
            interval_ms: r.get("interval_ms"),
            feature_close_time_ms: r.get("feature_close_time_ms"),
            probability: r.get("probability"),
            threshold: r.get("threshold"),
        })
        .collect())
}

/// Conditional update: only writes when `realized is null`, so a row can
/// never transition `non-null -> any other value` (spec §8 idempotence
/// property).
pub async fn mark_realized(
    pool: &PgPool,
    id: Uuid,
    realized: bool,
    realized_at: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "update inference_logs set realized = $2, realized_at = $3 where id = $1 and realized is null",
    )
    .bind(id)
    .bind(realized)
    .bind(realized_at)
    .execute(pool)
    .await
    .context("mark_realized failed")?;
    Ok(res.rows_affected() > 0)
}

/// Realized rows within the last `window_seconds`, for calibration.
pub async fn fetch_realized_window(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
    since: DateTime<Utc>,
) -> Result<Vec<(f64, bool)>> {
    let rows = sqlx::query(
        r#"
        select probability, realized from inference_logs
        where symbol = $1 and interval_ms = $2 and realized is not null and created_at >= $3
        "#,
    )
    .bind(symbol)
    .bind(interval_ms)
    .bind(since)
    .fetch_all(pool)
    .await
    .context("fetch_realized_window failed")?;

    Ok(rows
        .iter()
        .map(|r| (r.get::<f64, _>("probability"), r.get::<bool, _>("realized")))
        .collect())
}

// ---------------------------------------------------------------------------
// Promotion events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewPromotionEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub candidate_model_id: Uuid,
    pub previous_production_model_id: Option<Uuid>,
    pub decision: String,
    pub reason: String,
    pub samples_old: i64,
    pub samples_new: i64,
    pub auc_improve: f64,
    pub ece_delta: f64,
    pub val_samples: i64,
}

pub async fn insert_promotion_event(pool: &PgPool, ev: &NewPromotionEvent) -> Result<()> {
    sqlx::query(
        r#"
        insert into promotion_events (
          id, created_at, candidate_model_id, previous_production_model_id,
          decision, reason, samples_old, samples_new, auc_improve, ece_delta, val_samples
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        "#,
    )
    .bind(ev.id)
    .bind(ev.created_at)
    .bind(ev.candidate_model_id)
    .bind(ev.previous_production_model_id)
    .bind(&ev.decision)
    .bind(&ev.reason)
    .bind(ev.samples_old)
    .bind(ev.samples_new)
    .bind(ev.auc_improve)
    .bind(ev.ece_delta)
    .bind(ev.val_samples)
    .execute(pool)
    .await
    .context("insert_promotion_event failed")?;
    Ok(())
}

/// Timestamp of the most recent `promoted` decision for `family`
/// (joining through the candidate's artifact row), if any. Used by
/// `bd-promotion` to enforce `promotion_cooldown_seconds` and damp
/// flapping.
pub async fn last_promoted_at(pool: &PgPool, family: &str) -> Result<Option<DateTime<Utc>>> {
    let row = sqlx::query(
        r#"
        select pe.created_at from promotion_events pe
        join model_artifacts ma on ma.id = pe.candidate_model_id
        where ma.family = $1 and pe.decision = 'promoted'
        order by pe.created_at desc
        limit 1
        "#,
    )
    .bind(family)
    .fetch_optional(pool)
    .await
    .context("last_promoted_at failed")?;

    Ok(row.map(|r| r.get("created_at")))
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

pub async fn get_setting(pool: &PgPool, key: &str) -> Result<Option<(Value, DateTime<Utc>)>> {
    let row = sqlx::query("select value_json, updated_at from settings where key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("get_setting failed")?;
    Ok(row.map(|r| (r.get("value_json"), r.get("updated_at"))))
}

pub async fn put_setting(pool: &PgPool, key: &str, value: &Value) -> Result<()> {
    sqlx::query(
        r#"
        insert into settings (key, value_json, updated_at)
        values ($1, $2, now())
        on conflict (key) do update set value_json = excluded.value_json, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .context("put_setting failed")?;
    Ok(())
}

pub async fn list_settings(pool: &PgPool) -> Result<Vec<(String, Value, DateTime<Utc>)>> {
    let rows = sqlx::query("select key, value_json, updated_at from settings")
        .fetch_all(pool)
        .await
        .context("list_settings failed")?;
    Ok(rows
        .iter()
        .map(|r| (r.get("key"), r.get("value_json"), r.get("updated_at")))
        .collect())
}

//! The Promotion Gate: the single writer to the production pointer.
//!
//! Implements the five-step algorithm exactly: require a minimum
//! validation sample count, promote unconditionally if no production
//! artifact exists yet, else require both an AUC improvement and a
//! bounded calibration regression, and append a `PromotionEvent` under
//! every outcome — pass, fail, or precondition skip.

use std::cmp::Ordering;

use anyhow::Result;
use bd_audit::AuditWriter;
use bd_schemas::PromotionDecision;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{PromotionCandidate, PromotionReport, PromotionThresholds, TieBreakOrder, TieBreakRules};

/// Runs the five-step algorithm against the current production
/// artifact for `family` and persists a `PromotionEvent` under every
/// outcome. When `audit` is given, the same decision is appended to the
/// hash-chained audit log so the promotion history is tamper-evident.
pub async fn promote(
    pool: &PgPool,
    family: &str,
    candidate: &PromotionCandidate,
    thresholds: PromotionThresholds,
    audit: Option<(&mut AuditWriter, Uuid)>,
) -> Result<PromotionReport> {
    let previous_id = bd_registry::get_production(pool, family).await?.map(|p| p.id);

    let report = evaluate(pool, family, candidate, thresholds).await?;

    if report.decision == PromotionDecision::Promoted {
        bd_registry::set_production(pool, family, candidate.model_id).await?;
    }

    bd_db::core::insert_promotion_event(
        pool,
        &bd_db::core::NewPromotionEvent {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            candidate_model_id: candidate.model_id,
            previous_production_model_id: previous_id,
            decision: decision_str(report.decision).to_string(),
            reason: report.reason.clone(),
            samples_old: 0,
            samples_new: candidate.val_samples,
            auc_improve: report.auc_improve,
            ece_delta: report.ece_delta,
            val_samples: candidate.val_samples,
        },
    )
    .await?;

    if let Some((writer, run_id)) = audit {
        writer.append(
            run_id,
            "promotion",
            "promotion_decision",
            serde_json::json!({
                "family": family,
                "candidate_model_id": candidate.model_id,
                "decision": decision_str(report.decision),
                "reason": report.reason,
                "auc_improve": report.auc_improve,
                "ece_delta": report.ece_delta,
                "val_samples": candidate.val_samples,
            }),
        )?;
    }

    Ok(report)
}

fn decision_str(d: PromotionDecision) -> &'static str {
    match d {
        PromotionDecision::Promoted => "promoted",
        PromotionDecision::Skipped => "skipped",
        PromotionDecision::Error => "error",
    }
}

async fn evaluate(
    pool: &PgPool,
    family: &str,
    candidate: &PromotionCandidate,
    thresholds: PromotionThresholds,
) -> Result<PromotionReport> {
    if candidate.val_samples < thresholds.min_val_samples {
        return Ok(PromotionReport {
            decision: PromotionDecision::Skipped,
            reason: format!(
                "insufficient_val_samples_{}_lt_{}",
                candidate.val_samples, thresholds.min_val_samples
            ),
            auc_improve: 0.0,
            ece_delta: 0.0,
        });
    }

    if let Some(last) = bd_db::core::last_promoted_at(pool, family).await? {
        let elapsed = (Utc::now() - last).num_seconds();
        if elapsed < thresholds.cooldown_seconds {
            return Ok(PromotionReport {
                decision: PromotionDecision::Skipped,
                reason: format!("cooldown_active_{elapsed}s_lt_{}s", thresholds.cooldown_seconds),
                auc_improve: 0.0,
                ece_delta: 0.0,
            });
        }
    }

    let production = bd_registry::get_production(pool, family).await?;
    let Some(production) = production else {
        return Ok(PromotionReport {
            decision: PromotionDecision::Promoted,
            reason: "no_production".to_string(),
            auc_improve: 0.0,
            ece_delta: 0.0,
        });
    };

    let auc_improve = candidate.metrics.auc - production.metrics.auc;
    let ece_delta = candidate.metrics.ece - production.metrics.ece;

    if auc_improve >= thresholds.min_auc_delta && ece_delta <= thresholds.max_ece_delta {
        Ok(PromotionReport {
            decision: PromotionDecision::Promoted,
            reason: format!("auc_improve_{auc_improve:.4}_ece_delta_{ece_delta:.4}_within_bounds"),
            auc_improve,
            ece_delta,
        })
    } else {
        Ok(PromotionReport {
            decision: PromotionDecision::Skipped,
            reason: format!("criteria_not_met_auc{auc_improve:.4}_ece{ece_delta:.4}"),
            auc_improve,
            ece_delta,
        })
    }
}

/// Composite score for ranking staging candidates when more than one is
/// pending; gate eligibility is decided by [`promote`], this is ranking
/// only. Retargeted from the teacher's equity-curve composite
/// (`mqk_promotion::evaluator::score`) onto AUC/ECE/brier.
fn score(m: &bd_schemas::ModelMetrics) -> f64 {
    100.0 * m.auc - 50.0 * m.ece - 20.0 * m.brier
}

/// Compare two candidates using the composite score, falling through to
/// `rules.order` when within `rules.within_points` of each other.
/// Mirrors `mqk_promotion::evaluator::compare_candidates`'s shape.
pub fn compare_candidates(a: &PromotionCandidate, b: &PromotionCandidate, rules: &TieBreakRules) -> Ordering {
    let sa = score(&a.metrics);
    let sb = score(&b.metrics);

    if (sa - sb).abs() > rules.within_points {
        return sb.partial_cmp(&sa).unwrap_or(Ordering::Equal);
    }

    for rule in &rules.order {
        let ord = match rule {
            TieBreakOrder::LowerEce => a.metrics.ece.partial_cmp(&b.metrics.ece).unwrap_or(Ordering::Equal),
            TieBreakOrder::LowerBrier => a.metrics.brier.partial_cmp(&b.metrics.brier).unwrap_or(Ordering::Equal),
            TieBreakOrder::HigherPrAuc => b.metrics.pr_auc.partial_cmp(&a.metrics.pr_auc).unwrap_or(Ordering::Equal),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    Ordering::Equal
}

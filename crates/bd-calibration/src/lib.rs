//! Calibration Monitor: live reliability metrics over a rolling window
//! of realized inference rows, compared against the production
//! artifact's stored metrics, driving a per-model-generation drift
//! state machine.
//!
//! Streak state lives in process memory, not in the database — it is
//! scoped to "this production model_id" and resets the instant
//! `bd-registry` reports a new one, because a drift streak counted
//! against a retired model is meaningless (spec §4.8). This mirrors
//! `bd-registry::PredictorCache`'s generation-check pattern.

use std::sync::Mutex;

use anyhow::Result;
use bd_metrics::{brier, ece, mce, reliability_bins};
use bd_schemas::CalibrationSnapshot;
use bd_settings::{keys, SettingsStore};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

/// Floor for the relative-drift denominator, avoiding a divide-by-zero
/// blowup when the production artifact's `ece` is (near) zero.
const REL_DRIFT_EPS: f64 = 1e-6;

struct Generation {
    model_id: Uuid,
    abs_streak: u32,
    rel_streak: u32,
    last_recommend_at: Option<chrono::DateTime<Utc>>,
    last_snapshot: Option<CalibrationSnapshot>,
    pending_recommend: bool,
}

pub struct CalibrationMonitor {
    family: String,
    state: Mutex<Option<Generation>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MonitorStatus {
    pub enabled: bool,
    pub abs_streak: u32,
    pub rel_streak: u32,
    pub last_snapshot: Option<CalibrationSnapshot>,
    pub recommend_retrain: bool,
    pub reasons: Vec<String>,
    pub window_seconds: i64,
    pub min_samples: u64,
}

impl CalibrationMonitor {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            state: Mutex::new(None),
        }
    }

    pub async fn effective_interval_secs(settings: &SettingsStore) -> u64 {
        settings.get_u64(keys::CALIBRATION_MONITOR_WINDOW_SECONDS, 3600).await.max(1)
    }

    /// Recomputes live metrics over the configured window and advances
    /// the drift state machine. Returns `None` when sample-gated (too
    /// few realized rows to trust the comparison) — callers still get a
    /// `MonitorStatus` via [`Self::status`] reflecting the gray state.
    pub async fn tick(&self, pool: &PgPool, settings: &SettingsStore, symbol: &str, interval_ms: i64) -> Result<()> {
        let window_seconds = settings.get_i64(keys::CALIBRATION_MONITOR_WINDOW_SECONDS, 3600).await;
        let bins_n = settings.get_u64(keys::CALIBRATION_LIVE_BINS, 10).await as usize;
        let min_samples = settings.get_u64(keys::CALIBRATION_MONITOR_MIN_SAMPLES, 30).await;
        let ece_abs = settings.get_f64(keys::CALIBRATION_MONITOR_ECE_ABS, 0.02).await;
        let ece_rel = settings.get_f64(keys::CALIBRATION_MONITOR_ECE_REL, 0.25).await;
        let abs_delta_multiplier = settings.get_f64(keys::CALIBRATION_MONITOR_ABS_DELTA_MULTIPLIER, 1.0).await;
        let abs_streak_trigger = settings.get_u64(keys::CALIBRATION_MONITOR_ABS_STREAK_TRIGGER, 3).await as u32;
        let rel_streak_trigger = settings.get_u64(keys::CALIBRATION_MONITOR_REL_STREAK_TRIGGER, 3).await as u32;
        let recommend_cooldown = settings
            .get_i64(keys::CALIBRATION_MONITOR_RECOMMEND_COOLDOWN_SECONDS, 3600)
            .await;
        let min_bin_samples = 5u64;

        let production = bd_registry::get_production(pool, &self.family).await?;
        let prod_ece = production.as_ref().map(|a| a.metrics.ece).unwrap_or(0.0);
        let current_model_id = production.as_ref().map(|a| a.id);

        let since = Utc::now() - chrono::Duration::seconds(window_seconds);
        let rows = bd_db::core::fetch_realized_window(pool, symbol, interval_ms, since).await?;
        let sample_count = rows.len() as u64;
        let probs: Vec<f64> = rows.iter().map(|(p, _)| *p).collect();
        let labels: Vec<bool> = rows.iter().map(|(_, y)| *y).collect();

        let bins = reliability_bins(&probs, &labels, bins_n, min_bin_samples);
        let live_ece = ece(&bins, sample_count);
        let live_mce = mce(&bins);
        let live_brier = brier(&probs, &labels);
        let delta_ece = live_ece - prod_ece;

        let mut guard = self.state.lock().expect("calibration state lock poisoned");
        let gen = guard.get_or_insert_with(|| Generation {
            model_id: current_model_id.unwrap_or_else(Uuid::nil),
            abs_streak: 0,
            rel_streak: 0,
            last_recommend_at: None,
            last_snapshot: None,
            pending_recommend: false,
        });

        if let Some(model_id) = current_model_id {
            if gen.model_id != model_id {
                tracing::info!(target: "calibration", family = %self.family, "production model changed, resetting drift streaks");
                gen.model_id = model_id;
                gen.abs_streak = 0;
                gen.rel_streak = 0;
                gen.last_recommend_at = None;
            }
        }

        let gray = sample_count < min_samples;
        let (abs_drift, rel_drift) = if gray {
            // Sample-gated: streaks frozen, no drift asserted.
            (false, false)
        } else {
            let abs_trigger = delta_ece.abs() >= ece_abs * abs_delta_multiplier;
            let rel_denom = prod_ece.max(REL_DRIFT_EPS);
            let rel_trigger = (delta_ece.abs() / rel_denom) >= ece_rel;

            gen.abs_streak = if abs_trigger { gen.abs_streak + 1 } else { 0 };
            gen.rel_streak = if rel_trigger { gen.rel_streak + 1 } else { 0 };

            (
                gen.abs_streak >= abs_streak_trigger,
                gen.rel_streak >= rel_streak_trigger,
            )
        };

        let drift = abs_drift || rel_drift;
        let cooled_down = gen
            .last_recommend_at
            .map(|t| (Utc::now() - t).num_seconds() >= recommend_cooldown)
            .unwrap_or(true);
        gen.pending_recommend = drift && cooled_down;
        if gen.pending_recommend {
            gen.last_recommend_at = Some(Utc::now());
        }

        let snapshot = CalibrationSnapshot {
            ts: Utc::now(),
            live_ece,
            live_mce,
            live_brier,
            prod_ece,
            delta_ece,
            abs_drift,
            rel_drift,
            sample_count,
            reliability_bins: bins,
        };
        gen.last_snapshot = Some(snapshot);

        Ok(())
    }

    /// Cheap read of the last computed snapshot plus drift/recommend
    /// state, for the `/monitor/calibration/status` and
    /// `/calibration/live` endpoints. Does not touch the database.
    pub async fn status(&self, settings: &SettingsStore) -> MonitorStatus {
        let window_seconds = settings.get_i64(keys::CALIBRATION_MONITOR_WINDOW_SECONDS, 3600).await;
        let min_samples = settings.get_u64(keys::CALIBRATION_MONITOR_MIN_SAMPLES, 30).await;

        let guard = self.state.lock().expect("calibration state lock poisoned");
        let Some(gen) = guard.as_ref() else {
            return MonitorStatus {
                enabled: true,
                abs_streak: 0,
                rel_streak: 0,
                last_snapshot: None,
                recommend_retrain: false,
                reasons: vec!["no calibration tick has run yet".to_string()],
                window_seconds,
                min_samples,
            };
        };

        let mut reasons = Vec::new();
        if let Some(snap) = &gen.last_snapshot {
            if snap.abs_drift {
                reasons.push(format!(
                    "abs_drift: |live_ece - prod_ece| = {:.4} sustained for {} samples",
                    snap.delta_ece.abs(),
                    gen.abs_streak
                ));
            }
            if snap.rel_drift {
                reasons.push(format!(
                    "rel_drift: relative ece deviation sustained for {} samples",
                    gen.rel_streak
                ));
            }
            if snap.sample_count < min_samples {
                reasons.push(format!(
                    "sample_count {} below min_samples {}, state is gray",
                    snap.sample_count, min_samples
                ));
            }
        }

        MonitorStatus {
            enabled: true,
            abs_streak: gen.abs_streak,
            rel_streak: gen.rel_streak,
            last_snapshot: gen.last_snapshot.clone(),
            recommend_retrain: gen.pending_recommend,
            reasons,
            window_seconds,
            min_samples,
        }
    }
}

//! Labeler: resolves `realized` outcomes for aged inference log rows.
//!
//! Shares `bd_labels::label_bottom_event` with `bd-training` so the
//! "live" and "trained" label definitions can never drift apart. Row
//! selection is single-writer (`SELECT ... FOR UPDATE SKIP LOCKED` plus
//! a conditional `UPDATE ... WHERE realized IS NULL` in `bd-db`), so the
//! automatic loop and an eager HTTP-triggered pass can run concurrently
//! without double-labeling the same row.

use bd_db::core::{self as db};
use bd_labels::label_bottom_event;
use bd_schemas::LabelParams;
use chrono::Utc;
use sqlx::PgPool;

/// Eager path hard cap (spec §4.7): never process more than this many
/// rows from a single synchronous HTTP-triggered call.
pub const EAGER_LIMIT_CAP: i64 = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelRunStats {
    /// Rows whose `realized` was written this call.
    pub labeled_count: u64,
    /// Rows examined but left pending (insufficient lookahead bars).
    pub pending_count: u64,
    /// Rows selected but already realized by a concurrent run (lost the
    /// conditional-update race).
    pub lost_race_count: u64,
}

/// Resolves at most `limit` unrealized rows for `(symbol, interval_ms)`
/// whose `created_at` is at least `max(min_age_seconds, lookahead *
/// interval_seconds)` in the past — the window must already contain
/// `lookahead` future closed bars or every row would come back pending.
pub async fn run_once(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
    min_age_seconds: i64,
    limit: i64,
    label_params: LabelParams,
) -> anyhow::Result<LabelRunStats> {
    let interval_seconds = (interval_ms / 1000).max(1);
    let lookahead_seconds = label_params.lookahead as i64 * interval_seconds;
    let effective_min_age = min_age_seconds.max(lookahead_seconds);
    let created_before = Utc::now() - chrono::Duration::seconds(effective_min_age);

    let rows = db::select_unrealized_for_update(pool, symbol, interval_ms, created_before, limit).await?;

    let mut stats = LabelRunStats::default();

    for row in rows {
        // The anchor bar is the one whose close_time_ms == feature_close_time_ms.
        let anchor_open_time_ms = row.feature_close_time_ms - interval_ms + 1;
        let to_open_time_ms = anchor_open_time_ms + (label_params.lookahead as i64) * interval_ms;

        let bars = db::fetch_bars_range(pool, symbol, interval_ms, anchor_open_time_ms, to_open_time_ms).await?;
        let closes: Vec<f64> = bars
            .iter()
            .filter(|b| b.is_closed)
            .map(|b| b.close_micros as f64)
            .collect();

        if closes.len() < label_params.lookahead + 1 {
            stats.pending_count += 1;
            continue;
        }

        let outcome = label_bottom_event(&closes, 0, label_params);
        let Some(realized) = outcome.as_bool() else {
            stats.pending_count += 1;
            continue;
        };

        let wrote = db::mark_realized(pool, row.id, realized, Utc::now()).await?;
        if wrote {
            stats.labeled_count += 1;
        } else {
            stats.lost_race_count += 1;
        }
    }

    Ok(stats)
}

/// Settings-driven wrapper for the automatic loop and the eager HTTP
/// path — both call `run_once` with different limits/ages, but neither
/// bypasses the shared selection/marking contract above.
pub mod scheduled {
    use super::*;
    use bd_settings::{keys, SettingsStore};

    pub async fn effective_interval_secs(settings: &SettingsStore) -> u64 {
        settings.get_u64(keys::LABELER_INTERVAL, 30).await
    }

    /// One automatic-loop tick, bounded by `labeler.batch_limit`.
    pub async fn tick(
        pool: &PgPool,
        settings: &SettingsStore,
        symbol: &str,
        interval_ms: i64,
    ) -> anyhow::Result<LabelRunStats> {
        let min_age = settings.get_i64(keys::LABELER_MIN_AGE_SECONDS, 3600).await;
        let limit = settings.get_u64(keys::LABELER_BATCH_LIMIT, 200).await as i64;
        let params = label_params_from_settings(settings).await;
        let stats = run_once(pool, symbol, interval_ms, min_age, limit, params).await?;
        tracing::info!(
            target: "labeler",
            symbol,
            labeled = stats.labeled_count,
            pending = stats.pending_count,
            lost_race = stats.lost_race_count,
            "labeler tick complete"
        );
        Ok(stats)
    }

    /// Synchronous bounded pass triggered by the calibration endpoint
    /// (spec §6.2); hard-capped at [`EAGER_LIMIT_CAP`] regardless of the
    /// caller-supplied limit.
    pub async fn run_eager(
        pool: &PgPool,
        settings: &SettingsStore,
        symbol: &str,
        interval_ms: i64,
        eager_limit: Option<i64>,
        eager_min_age_seconds: Option<i64>,
    ) -> anyhow::Result<LabelRunStats> {
        let default_limit = settings.get_u64(keys::CALIBRATION_EAGER_LIMIT, 100).await as i64;
        let default_min_age = settings.get_i64(keys::CALIBRATION_EAGER_MIN_AGE_SECONDS, 3600).await;

        let limit = eager_limit.unwrap_or(default_limit).min(EAGER_LIMIT_CAP).max(0);
        let min_age = eager_min_age_seconds.unwrap_or(default_min_age);
        let params = label_params_from_settings(settings).await;

        run_once(pool, symbol, interval_ms, min_age, limit, params).await
    }

    async fn label_params_from_settings(settings: &SettingsStore) -> LabelParams {
        LabelParams {
            lookahead: settings.get_u64(keys::LABELER_BOTTOM_LOOKAHEAD, 30).await as usize,
            drawdown: settings.get_f64(keys::LABELER_BOTTOM_DRAWDOWN, 0.01).await,
            rebound: settings.get_f64(keys::LABELER_BOTTOM_REBOUND, 0.01).await,
        }
    }
}

pub use scheduled::{effective_interval_secs, run_eager, tick};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eager_limit_is_capped_regardless_of_caller_value() {
        assert!(EAGER_LIMIT_CAP == 500);
    }
}

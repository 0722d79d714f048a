//! Feature Engine: derives feature snapshots from closed bars.
//!
//! Feature set (schema_version 1): `ret_1`, `ret_5`, `ret_15` (log returns
//! over k closed bars), `rsi_14`, `vol_realized_20` (stdev of 1-bar log
//! returns over 20 bars), `sma_20`, `sma_50`, `sma_ratio` (`sma_20 / sma_50
//! - 1`), `atr_14` (Wilder-smoothed). `atr_14` is the single source of
//! truth for ATR — `bd-execution`'s trailing-stop ATR mode reuses this
//! computation rather than keeping a second copy that could drift.
//!
//! Leakage rule: every feature here is a function of `bars[..=last]`
//! only — nothing in this module ever looks past the close_time it is
//! computing for.

use std::collections::BTreeMap;

use anyhow::Result;
use bd_db::core::{self as db};
use bd_schemas::{Bar, FeatureSnapshot};
use sqlx::PgPool;

pub const SCHEMA_VERSION: i32 = 1;
/// Longest lookback (sma_50) plus one bar of slack.
pub const WARMUP_BARS: usize = 51;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureError {
    /// Fewer than `WARMUP_BARS` closed bars are available.
    NoData,
}

impl std::fmt::Display for FeatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureError::NoData => write!(f, "no_data: insufficient closed bars for warmup"),
        }
    }
}
impl std::error::Error for FeatureError {}

/// Compute the feature vector for the bar ending the window, i.e. the
/// last element of `bars`. `bars` must be sorted ascending by
/// `open_time_ms` and contiguous (no gaps) for the result to be
/// meaningful; gaps are a `bd-ingest` concern, not this function's.
///
/// Returns `None` if any required upstream value is NaN/non-finite — the
/// caller skips persisting that single `close_time` and increments a
/// counter, per spec's numeric semantics (one bad snapshot never poisons
/// a backfill batch).
pub fn compute_features(bars: &[Bar]) -> Option<BTreeMap<String, f64>> {
    if bars.len() < WARMUP_BARS {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close_micros as f64).collect();
    let n = closes.len();

    let ret_k = |k: usize| -> Option<f64> {
        if n <= k {
            return None;
        }
        let p0 = closes[n - 1 - k];
        let p1 = closes[n - 1];
        if p0 <= 0.0 || p1 <= 0.0 {
            return None;
        }
        Some((p1 / p0).ln())
    };

    let ret_1 = ret_k(1)?;
    let ret_5 = ret_k(5)?;
    let ret_15 = ret_k(15)?;

    let rsi_14 = rsi(&closes, 14)?;
    let vol_realized_20 = realized_vol(&closes, 20)?;
    let sma_20 = sma(&closes, 20)?;
    let sma_50 = sma(&closes, 50)?;
    if sma_50 == 0.0 {
        return None;
    }
    let sma_ratio = sma_20 / sma_50 - 1.0;
    let atr_14 = atr_wilder(bars, 14)?;

    let values = [
        ("ret_1", ret_1),
        ("ret_5", ret_5),
        ("ret_15", ret_15),
        ("rsi_14", rsi_14),
        ("vol_realized_20", vol_realized_20),
        ("sma_20", sma_20),
        ("sma_50", sma_50),
        ("sma_ratio", sma_ratio),
        ("atr_14", atr_14),
    ];

    if values.iter().any(|(_, v)| !v.is_finite()) {
        return None;
    }

    Some(values.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn sma(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window || window == 0 {
        return None;
    }
    let slice = &closes[closes.len() - window..];
    Some(slice.iter().sum::<f64>() / window as f64)
}

fn realized_vol(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window + 1 {
        return None;
    }
    let slice = &closes[closes.len() - window - 1..];
    let mut rets = Vec::with_capacity(window);
    for w in slice.windows(2) {
        if w[0] <= 0.0 || w[1] <= 0.0 {
            return None;
        }
        rets.push((w[1] / w[0]).ln());
    }
    let mean = rets.iter().sum::<f64>() / rets.len() as f64;
    let var = rets.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rets.len() as f64;
    Some(var.sqrt())
}

fn rsi(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window + 1 {
        return None;
    }
    let slice = &closes[closes.len() - window - 1..];
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for w in slice.windows(2) {
        let delta = w[1] - w[0];
        if delta >= 0.0 {
            gain_sum += delta;
        } else {
            loss_sum += -delta;
        }
    }
    let avg_gain = gain_sum / window as f64;
    let avg_loss = loss_sum / window as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Wilder-smoothed Average True Range over `bars`, seeded by a simple
/// average of the first `window` true ranges and then recursively
/// smoothed (`ATR_t = (ATR_{t-1} * (window-1) + TR_t) / window`) across
/// the rest of the slice.
fn atr_wilder(bars: &[Bar], window: usize) -> Option<f64> {
    if bars.len() < window + 1 {
        return None;
    }

    let true_range = |prev_close: f64, high: f64, low: f64| -> f64 {
        (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs())
    };

    let mut trs = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let prev_close = w[0].close_micros as f64;
        let high = w[1].high_micros as f64;
        let low = w[1].low_micros as f64;
        trs.push(true_range(prev_close, high, low));
    }

    if trs.len() < window {
        return None;
    }

    let mut atr = trs[..window].iter().sum::<f64>() / window as f64;
    for tr in &trs[window..] {
        atr = (atr * (window as f64 - 1.0) + tr) / window as f64;
    }
    Some(atr)
}

// ---------------------------------------------------------------------------
// DB-backed engine
// ---------------------------------------------------------------------------

pub struct FeatureEngine {
    pool: PgPool,
}

impl FeatureEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `computeLatest(symbol, interval)`: returns the feature snapshot for
    /// the most recent closed bar.
    pub async fn compute_latest(
        &self,
        symbol: &str,
        interval_ms: i64,
    ) -> Result<FeatureSnapshot, FeatureError> {
        let rows = db::fetch_latest_bars(&self.pool, symbol, interval_ms, WARMUP_BARS as i64)
            .await
            .map_err(|_| FeatureError::NoData)?;

        let bars: Vec<Bar> = rows.iter().map(row_to_bar).collect();
        if bars.len() < WARMUP_BARS {
            return Err(FeatureError::NoData);
        }

        let features = compute_features(&bars).ok_or(FeatureError::NoData)?;
        let close_time_ms = bars.last().unwrap().close_time_ms;

        let features_json = serde_json::to_value(&features).unwrap_or_default();
        let _ = db::upsert_feature_snapshot(
            &self.pool,
            symbol,
            interval_ms,
            close_time_ms,
            SCHEMA_VERSION,
            &features_json,
        )
        .await;

        Ok(FeatureSnapshot {
            symbol: symbol.to_string(),
            interval_ms,
            close_time_ms,
            schema_version: SCHEMA_VERSION,
            features: features.into_iter().collect(),
        })
    }

    /// Close price of the most recent closed bar, in micros. The feature
    /// snapshot itself carries no raw price (only derived ratios), so
    /// callers that need one for order sizing (the Trading Controller)
    /// fetch it separately here rather than it leaking into the
    /// schema-versioned feature set.
    pub async fn latest_close_micros(&self, symbol: &str, interval_ms: i64) -> Result<i64, FeatureError> {
        let rows = db::fetch_latest_bars(&self.pool, symbol, interval_ms, 1)
            .await
            .map_err(|_| FeatureError::NoData)?;
        rows.last().map(|r| r.close_micros).ok_or(FeatureError::NoData)
    }

    /// `backfill(target_bars)`: populates snapshots for the last
    /// `target_bars` closed bars, skipping existing `close_time`s. Returns
    /// `(written, skipped_nan)`.
    pub async fn backfill(
        &self,
        symbol: &str,
        interval_ms: i64,
        target_bars: usize,
    ) -> Result<(u64, u64)> {
        let fetch_n = (target_bars + WARMUP_BARS) as i64;
        let rows = db::fetch_latest_bars(&self.pool, symbol, interval_ms, fetch_n).await?;
        let bars: Vec<Bar> = rows.iter().map(row_to_bar).collect();

        if bars.len() < WARMUP_BARS {
            return Ok((0, 0));
        }

        let earliest_target_close = bars[bars.len().saturating_sub(target_bars)].close_time_ms;
        let existing = db::existing_feature_close_times(
            &self.pool,
            symbol,
            interval_ms,
            SCHEMA_VERSION,
            earliest_target_close,
        )
        .await?
        .into_iter()
        .collect::<std::collections::HashSet<_>>();

        let mut written = 0u64;
        let mut skipped_nan = 0u64;

        let start = WARMUP_BARS - 1;
        for end_idx in start..bars.len() {
            let close_time_ms = bars[end_idx].close_time_ms;
            if close_time_ms < earliest_target_close || existing.contains(&close_time_ms) {
                continue;
            }
            let window = &bars[end_idx + 1 - WARMUP_BARS..=end_idx];
            match compute_features(window) {
                Some(features) => {
                    let features_json = serde_json::to_value(&features).unwrap_or_default();
                    db::upsert_feature_snapshot(
                        &self.pool,
                        symbol,
                        interval_ms,
                        close_time_ms,
                        SCHEMA_VERSION,
                        &features_json,
                    )
                    .await?;
                    written += 1;
                }
                None => {
                    skipped_nan += 1;
                    tracing::warn!(target: "features", %symbol, close_time_ms, "snapshot skipped: nan/insufficient upstream value");
                }
            }
        }

        Ok((written, skipped_nan))
    }
}

fn row_to_bar(r: &db::BarRow) -> Bar {
    Bar {
        open_time_ms: r.open_time_ms,
        close_time_ms: r.close_time_ms,
        interval_ms: r.interval_ms,
        open_micros: r.open_micros,
        high_micros: r.high_micros,
        low_micros: r.low_micros,
        close_micros: r.close_micros,
        volume_micros: r.volume_micros,
        trade_count: r.trade_count,
        is_closed: r.is_closed,
    }
}

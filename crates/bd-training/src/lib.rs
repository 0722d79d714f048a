//! Training Service: `trainBottom`.

mod dataset;
mod fit;
mod rng;

use anyhow::{Context, Result};
use bd_schemas::{LabelParams, ModelMetrics};
use sqlx::PgPool;

pub use dataset::{assemble, Example};
pub use fit::fit_logistic;
pub use rng::SplitMix64;

pub const LABEL_DEFINITION: &str = "bottom_event_drawdown_rebound";
const DEFAULT_RELIABILITY_BINS: usize = 10;
const DEFAULT_MIN_BIN_SAMPLES: u64 = 5;

#[derive(Debug, Clone)]
pub struct TrainParams {
    pub family: String,
    pub symbol: String,
    pub interval_ms: i64,
    pub ohlcv_cap: i64,
    pub label_params: LabelParams,
    pub min_train_labels: usize,
    pub seed: u64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            family: bd_schemas::FAMILY_BOTTOM_PREDICTOR.to_string(),
            symbol: String::new(),
            interval_ms: 60_000,
            ohlcv_cap: 20_000,
            label_params: LabelParams::default(),
            min_train_labels: 200,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainError {
    InsufficientData,
}

impl std::fmt::Display for TrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainError::InsufficientData => write!(f, "insufficient_data"),
        }
    }
}
impl std::error::Error for TrainError {}

pub struct TrainOutput {
    pub model_blob: Vec<u8>,
    pub metrics: ModelMetrics,
    pub label_definition: String,
    pub label_params: LabelParams,
    pub val_samples: usize,
}

/// Fetches the last `params.ohlcv_cap` bars, aligns features, computes
/// labels (the same `bd-labels` rule the Labeler uses live), splits
/// chronologically (last 20% held out), fits a class-weighted logistic
/// regression, and evaluates on the held-out tail.
pub async fn train_bottom(pool: &PgPool, params: &TrainParams) -> Result<TrainOutput, TrainError> {
    let bars = bd_db::core::fetch_latest_bars(pool, &params.symbol, params.interval_ms, params.ohlcv_cap)
        .await
        .map_err(|_| TrainError::InsufficientData)?;
    let bars: Vec<bd_schemas::Bar> = bars
        .iter()
        .map(|r| bd_schemas::Bar {
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
        })
        .collect();

    let examples = dataset::assemble(&bars, params.label_params);
    if examples.len() < params.min_train_labels {
        return Err(TrainError::InsufficientData);
    }

    // Chronological split: examples are already time-ordered by assemble().
    let split_idx = (examples.len() as f64 * 0.8) as usize;
    let (train_set, val_set) = examples.split_at(split_idx);
    if val_set.is_empty() {
        return Err(TrainError::InsufficientData);
    }

    let model = fit::fit_logistic(train_set, params.seed);

    let probs: Vec<f64> = val_set
        .iter()
        .map(|e| {
            let mut z = model.intercept;
            for (k, w) in &model.weights {
                z += w * e.features.get(k).copied().unwrap_or(0.0);
            }
            1.0 / (1.0 + (-z).exp())
        })
        .collect();
    let labels: Vec<bool> = val_set.iter().map(|e| e.label).collect();

    let auc = bd_metrics::auc(&probs, &labels);
    let pr_auc = bd_metrics::pr_auc(&probs, &labels);
    let brier = bd_metrics::brier(&probs, &labels);
    let bins = bd_metrics::reliability_bins(
        &probs,
        &labels,
        DEFAULT_RELIABILITY_BINS,
        DEFAULT_MIN_BIN_SAMPLES,
    );
    let ece = bd_metrics::ece(&bins, labels.len() as u64);
    let mce = bd_metrics::mce(&bins);

    let metrics = ModelMetrics {
        auc,
        pr_auc,
        brier,
        ece,
        mce,
        reliability_bins: bins,
        label_definition: LABEL_DEFINITION.to_string(),
        label_params: params.label_params,
    };

    let predictor = bd_registry::PredictorModel::BottomLogistic(model);
    let model_blob = predictor.encode();

    Ok(TrainOutput {
        model_blob,
        metrics,
        label_definition: LABEL_DEFINITION.to_string(),
        label_params: params.label_params,
        val_samples: val_set.len(),
    })
}

/// Registers a trained output in the Registry as `staging`, ready for the
/// Promotion Gate to evaluate. Version numbers are assigned
/// monotonically per family.
pub async fn register_candidate(
    pool: &PgPool,
    family: &str,
    output: &TrainOutput,
) -> Result<uuid::Uuid> {
    let next_version = bd_registry::list_recent(pool, family, 1)
        .await?
        .into_iter()
        .next()
        .map(|a| a.version + 1)
        .unwrap_or(1);

    bd_registry::register(pool, family, next_version, &output.metrics, &output.model_blob)
        .await
        .context("register_candidate failed")
}

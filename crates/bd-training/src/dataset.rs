//! Dataset assembly: fetch bars, align features, compute labels.
//!
//! Grounded on `mqk-backtest::loader`'s bar-loading shape (deterministic,
//! time-sorted), repurposed from "load bars for simulation" into "load
//! bars for a supervised dataset" — every row here is still just a bar
//! slice walked in order, now paired with a feature vector and a label
//! instead of fed into an execution engine.

use std::collections::BTreeMap;

use bd_labels::{label_all, LabelOutcome};
use bd_schemas::{Bar, LabelParams};

#[derive(Debug, Clone)]
pub struct Example {
    pub close_time_ms: i64,
    pub features: BTreeMap<String, f64>,
    pub label: bool,
}

/// Walks `bars` (ascending, contiguous) and emits one [`Example`] per
/// closed bar that has both a complete feature window (leakage rule:
/// `bd_features::compute_features` only ever reads `bars[..=t]`) and a
/// resolved (non-pending) label under `label_params`.
pub fn assemble(bars: &[Bar], label_params: LabelParams) -> Vec<Example> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close_micros as f64).collect();
    let labels = label_all(&closes, label_params);

    let mut out = Vec::new();
    for (t, label) in labels.iter().enumerate() {
        let resolved = match label {
            LabelOutcome::Positive => true,
            LabelOutcome::Negative => false,
            LabelOutcome::Pending => continue,
        };
        if t + 1 < bd_features::WARMUP_BARS {
            continue;
        }
        let window = &bars[t + 1 - bd_features::WARMUP_BARS..=t];
        let Some(features) = bd_features::compute_features(window) else {
            continue;
        };
        out.push(Example {
            close_time_ms: bars[t].close_time_ms,
            features,
            label: resolved,
        });
    }
    out
}

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Handed to `bd-execution` when a bottom decision clears cooldown. Kept
/// deliberately small — the Trading Controller re-derives everything else
/// (risk budget, confirmation) itself rather than trusting this payload.
/// `price_micros` is the closing price of the bar the decision was made on
/// (the feature snapshot itself carries no raw price); `atr_micros` is
/// `bd_features`'s `atr_14` for that same bar, converted to micros, so the
/// controller's ATR trail mode never needs its own copy.
#[derive(Debug, Clone)]
pub struct BottomSignalCandidate {
    pub symbol: String,
    pub interval_ms: i64,
    pub probability: f64,
    pub threshold: f64,
    pub feature_close_time_ms: i64,
    pub price_micros: i64,
    pub atr_micros: Option<i64>,
    pub model_id: Uuid,
    pub model_version: i64,
    pub emitted_at: DateTime<Utc>,
}

/// Decouples `bd-inference` from `bd-execution`: the runtime wires a
/// concrete sink (channel, direct call) at startup rather than this crate
/// depending on the Trading Controller's crate directly.
pub trait SignalSink: Send + Sync {
    fn emit(&self, candidate: BottomSignalCandidate);
}

/// A sink that drops every candidate; useful for daemons/tests that only
/// care about the inference loop's own observable effects (logs written).
pub struct NullSignalSink;
impl SignalSink for NullSignalSink {
    fn emit(&self, _candidate: BottomSignalCandidate) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Ok,
    NoData,
    NoModel,
    InsufficientFeatures,
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub status: TickStatus,
    pub probability: Option<f64>,
    pub decision: Option<i8>,
    pub threshold: f64,
    pub model_version: Option<i64>,
    pub used_production: Option<bool>,
    pub feature_age_seconds: Option<i64>,
    pub hint: Option<String>,
}

//! Wire and persistence types shared across the bottom-detection pipeline.
//!
//! Prices, equities and PnL are carried as `i64` fixed-point micros
//! (1e-6) everywhere except raw provider values (decimal strings,
//! normalized once at the ingest boundary) and model probabilities /
//! calibration metrics (`f64`, domain-asserted by invariants elsewhere).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 1e-6 fixed-point scale used for price/equity/pnl fields.
pub const MICROS_SCALE: i64 = 1_000_000;

/// Envelope for internal bus messages (ingest events, daemon bus fan-out).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub run_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(run_id: Uuid, topic: impl Into<String>, event_type: impl Into<String>, payload: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            run_id,
            ts_utc: Utc::now(),
            topic: topic.into(),
            event_type: event_type.into(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// Bar / Gap Segment
// ---------------------------------------------------------------------------

/// A single OHLCV bar. `close_time_ms = open_time_ms + interval_ms - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time_ms: i64,
    pub close_time_ms: i64,
    pub interval_ms: i64,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume_micros: i64,
    pub trade_count: i64,
    pub is_closed: bool,
}

impl Bar {
    /// `true` iff the bar satisfies the close_time/open_time/interval invariant.
    pub fn is_well_formed(&self) -> bool {
        self.close_time_ms == self.open_time_ms + self.interval_ms - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapState {
    Open,
    Repairing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapSegment {
    pub symbol: String,
    pub interval_ms: i64,
    pub from_ts_ms: i64,
    pub to_ts_ms: i64,
    pub missing_count: i64,
    pub state: GapState,
}

// ---------------------------------------------------------------------------
// Feature Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub symbol: String,
    pub interval_ms: i64,
    pub close_time_ms: i64,
    pub schema_version: i32,
    /// Sorted by key for deterministic serialization (BTreeMap).
    pub features: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Label params / Model Artifact
// ---------------------------------------------------------------------------

/// Bottom-event label rule parameters: lookahead bars, drawdown fraction,
/// rebound fraction. See `bd-labels` for the rule itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelParams {
    pub lookahead: usize,
    pub drawdown: f64,
    pub rebound: f64,
}

impl Default for LabelParams {
    fn default() -> Self {
        Self {
            lookahead: 30,
            drawdown: 0.01,
            rebound: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub bin_index: usize,
    pub count: u64,
    pub mean_pred_prob: f64,
    pub empirical_prob: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub auc: f64,
    pub pr_auc: f64,
    pub brier: f64,
    pub ece: f64,
    pub mce: f64,
    pub reliability_bins: Vec<ReliabilityBin>,
    pub label_definition: String,
    pub label_params: LabelParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactStatus {
    Staging,
    Production,
    Retired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub id: Uuid,
    pub family: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub status: ArtifactStatus,
    pub metrics: ModelMetrics,
    /// Opaque serialized predictor state (coefficients / stumps); see
    /// `bd-registry::Predictor`.
    pub model_blob: Vec<u8>,
}

pub const FAMILY_BOTTOM_PREDICTOR: &str = "bottom_predictor";

// ---------------------------------------------------------------------------
// Inference Log
// ---------------------------------------------------------------------------

/// -1/0/1 decision code. Only 0/1 are emitted by the bottom-only policy;
/// -1 is reserved for a future non-bottom target and never written today.
pub type Decision = i8;

pub const DECISION_NO_SIGNAL: Decision = -1;
pub const DECISION_HOLD: Decision = 0;
pub const DECISION_BOTTOM: Decision = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceLog {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub symbol: String,
    pub interval_ms: i64,
    pub feature_close_time_ms: i64,
    pub probability: f64,
    pub threshold: f64,
    pub decision: Decision,
    pub model_id: Uuid,
    pub model_version: i64,
    pub used_production: bool,
    pub extra: Value,
    pub realized: Option<bool>,
    pub realized_at: Option<DateTime<Utc>>,
}

impl InferenceLog {
    pub fn target_label() -> &'static str {
        "bottom"
    }
}

// ---------------------------------------------------------------------------
// Trading Signal / Position
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Triggered,
    Submitted,
    Filled,
    Rejected,
    Canceled,
}

impl SignalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub id: Uuid,
    pub signal_type: String,
    pub status: SignalStatus,
    pub params: Value,
    pub price_micros: i64,
    pub extra: Value,
    pub created_ts: DateTime<Utc>,
    pub executed_ts: Option<DateTime<Utc>>,
    pub order_side: Option<OrderSide>,
    pub order_size: Option<i64>,
    pub order_price_micros: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Flat,
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol_id: i64,
    /// Signed size; size == 0 iff status == Flat.
    pub size: i64,
    pub avg_price_micros: i64,
    pub realized_pnl_micros: i64,
    pub unrealized_pnl_micros: i64,
    pub updated_ts_ms: i64,
    pub status: PositionStatus,
}

impl Position {
    pub fn flat() -> Self {
        Self {
            symbol_id: 0,
            size: 0,
            avg_price_micros: 0,
            realized_pnl_micros: 0,
            unrealized_pnl_micros: 0,
            updated_ts_ms: 0,
            status: PositionStatus::Flat,
        }
    }

    /// `size == 0 ⇔ status == Flat` — checked at every construction site.
    pub fn invariant_holds(&self) -> bool {
        (self.size == 0) == (self.status == PositionStatus::Flat)
    }
}

// ---------------------------------------------------------------------------
// Risk Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskSession {
    pub starting_equity_micros: i64,
    pub peak_equity_micros: i64,
    pub current_equity_micros: i64,
    pub cumulative_pnl_micros: i64,
    pub last_reset_ts_ms: i64,
}

// ---------------------------------------------------------------------------
// Calibration Snapshot / Promotion Event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSnapshot {
    pub ts: DateTime<Utc>,
    pub live_ece: f64,
    pub live_mce: f64,
    pub live_brier: f64,
    pub prod_ece: f64,
    pub delta_ece: f64,
    pub abs_drift: bool,
    pub rel_drift: bool,
    pub sample_count: u64,
    pub reliability_bins: Vec<ReliabilityBin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionDecision {
    Promoted,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub candidate_model_id: Uuid,
    pub previous_production_model_id: Option<Uuid>,
    pub decision: PromotionDecision,
    pub reason: String,
    pub samples_old: i64,
    pub samples_new: i64,
    pub auc_improve: f64,
    pub ece_delta: f64,
    pub val_samples: i64,
}

// ---------------------------------------------------------------------------
// Broker snapshot (reconciliation)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub broker_order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: String,
    pub status: String,
    pub qty_micros: i64,
    pub limit_price_micros: Option<i64>,
    pub stop_price_micros: Option<i64>,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerFill {
    pub broker_fill_id: String,
    pub broker_order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty_micros: i64,
    pub price_micros: i64,
    pub fee_micros: i64,
    pub ts_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty_micros: i64,
    pub avg_price_micros: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub equity_micros: i64,
    pub cash_micros: i64,
    pub currency: String,
}

/// A point-in-time snapshot pulled from the broker, compared against the
/// local ledger by `bd-reconcile` before a live-trading arm is permitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub captured_at_utc: DateTime<Utc>,
    pub account: BrokerAccount,
    pub orders: Vec<BrokerOrder>,
    pub fills: Vec<BrokerFill>,
    pub positions: Vec<BrokerPosition>,
}

/// The equivalent snapshot built from our own ledger state, compared
/// field-for-field against a `BrokerSnapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSnapshot {
    pub captured_at_utc: DateTime<Utc>,
    pub cash_micros: i64,
    pub positions: Vec<BrokerPosition>,
}

/// Whether `bd-execution` is permitted to arm live order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmStartGate {
    Permitted,
    Blocked,
}

// ---------------------------------------------------------------------------
// Setting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

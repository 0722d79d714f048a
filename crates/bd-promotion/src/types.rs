use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bd_schemas::ModelMetrics;

/// Gate thresholds for the classifier promotion decision (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromotionThresholds {
    /// Minimum required `cand.auc - prod.auc` to promote.
    pub min_auc_delta: f64,
    /// Maximum allowed `cand.ece - prod.ece` to promote (calibration may
    /// not regress beyond this even when AUC improves).
    pub max_ece_delta: f64,
    /// A candidate with fewer validation samples than this is never
    /// evaluated against production.
    pub min_val_samples: i64,
    /// Minimum time between two `promoted` decisions for the same
    /// family, to damp flapping.
    pub cooldown_seconds: i64,
}

impl Default for PromotionThresholds {
    fn default() -> Self {
        Self {
            min_auc_delta: 0.02,
            max_ece_delta: 0.01,
            min_val_samples: 200,
            cooldown_seconds: 3600,
        }
    }
}

/// A staging artifact under consideration for promotion.
#[derive(Debug, Clone)]
pub struct PromotionCandidate {
    pub model_id: Uuid,
    pub metrics: ModelMetrics,
    pub val_samples: i64,
}

/// Outcome of one `promote` call, mirroring the `promotion_events` row
/// written for every outcome (pass, fail, or error) per spec §4.9 step 4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionReport {
    pub decision: bd_schemas::PromotionDecision,
    /// Human-readable reason, e.g. `no_production`,
    /// `criteria_not_met_auc0.0050_ece0.0200`, `cooldown_active`,
    /// `insufficient_val_samples_120_lt_200`.
    pub reason: String,
    pub auc_improve: f64,
    pub ece_delta: f64,
}

/// A candidate for tie-break comparison when more than one staging
/// artifact is pending (retargeted from the teacher's equity-curve
/// ranking onto classifier metrics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreakOrder {
    /// Lower `ece` wins.
    LowerEce,
    /// Lower `brier` wins.
    LowerBrier,
    /// Higher `pr_auc` wins.
    HigherPrAuc,
}

#[derive(Debug, Clone)]
pub struct TieBreakRules {
    /// Composite scores within this tolerance are considered tied and
    /// fall through to `order`.
    pub within_points: f64,
    pub order: Vec<TieBreakOrder>,
}

impl Default for TieBreakRules {
    fn default() -> Self {
        Self {
            within_points: 0.005,
            order: vec![
                TieBreakOrder::LowerEce,
                TieBreakOrder::LowerBrier,
                TieBreakOrder::HigherPrAuc,
            ],
        }
    }
}

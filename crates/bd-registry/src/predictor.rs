//! The `Predictor` capability trait and its two concrete classifiers.
//!
//! `ModelArtifact.model_blob` is the JSON-serialized form of one of these
//! variants (tagged by `PredictorKind` stored alongside in
//! `metrics_json.predictor_kind`); `bd-training` writes it, `bd-registry`
//! reads it back out via [`decode_predictor`].

use std::collections::BTreeMap;

use bd_schemas::FeatureSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictError {
    /// A feature the model was trained on is absent from the snapshot.
    MissingFeature,
    /// The decoded predictor produced a non-finite probability.
    NonFinite,
}

impl std::fmt::Display for PredictError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictError::MissingFeature => write!(f, "predict: missing feature"),
            PredictError::NonFinite => write!(f, "predict: non-finite probability"),
        }
    }
}
impl std::error::Error for PredictError {}

/// A fitted classifier capable of scoring one feature snapshot.
pub trait Predictor: Send + Sync {
    fn predict(&self, snapshot: &FeatureSnapshot) -> Result<f64, PredictError>;
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Logistic regression over the named feature vector: deterministic, no
/// external ML runtime, evaluable with nothing but the stdlib.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottomLogistic {
    pub intercept: f64,
    pub weights: BTreeMap<String, f64>,
}

impl Predictor for BottomLogistic {
    fn predict(&self, snapshot: &FeatureSnapshot) -> Result<f64, PredictError> {
        let mut z = self.intercept;
        for (name, w) in &self.weights {
            let x = snapshot
                .features
                .get(name)
                .copied()
                .ok_or(PredictError::MissingFeature)?;
            z += w * x;
        }
        let p = sigmoid(z);
        if p.is_finite() {
            Ok(p)
        } else {
            Err(PredictError::NonFinite)
        }
    }
}

/// One decision stump: `value_if_le` when `feature <= threshold`, else
/// `value_if_gt`. Additive ensemble of these is a shallow GBM stand-in
/// that needs no external boosting library to train or evaluate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    pub feature: String,
    pub threshold: f64,
    pub value_if_le: f64,
    pub value_if_gt: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottomGbmLike {
    pub base_score: f64,
    pub stumps: Vec<Stump>,
}

impl Predictor for BottomGbmLike {
    fn predict(&self, snapshot: &FeatureSnapshot) -> Result<f64, PredictError> {
        let mut z = self.base_score;
        for stump in &self.stumps {
            let x = snapshot
                .features
                .get(&stump.feature)
                .copied()
                .ok_or(PredictError::MissingFeature)?;
            z += if x <= stump.threshold {
                stump.value_if_le
            } else {
                stump.value_if_gt
            };
        }
        let p = sigmoid(z);
        if p.is_finite() {
            Ok(p)
        } else {
            Err(PredictError::NonFinite)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictorKind {
    BottomLogistic,
    BottomGbmLike,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PredictorModel {
    BottomLogistic(BottomLogistic),
    BottomGbmLike(BottomGbmLike),
}

impl PredictorModel {
    pub fn kind(&self) -> PredictorKind {
        match self {
            PredictorModel::BottomLogistic(_) => PredictorKind::BottomLogistic,
            PredictorModel::BottomGbmLike(_) => PredictorKind::BottomGbmLike,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("PredictorModel serializes infallibly")
    }

    pub fn decode(blob: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(blob)?)
    }
}

impl Predictor for PredictorModel {
    fn predict(&self, snapshot: &FeatureSnapshot) -> Result<f64, PredictError> {
        match self {
            PredictorModel::BottomLogistic(m) => m.predict(snapshot),
            PredictorModel::BottomGbmLike(m) => m.predict(snapshot),
        }
    }
}

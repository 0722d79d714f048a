//! Model Registry and the `Predictor` capability powering inference.

pub mod cache;
pub mod predictor;
pub mod registry;

pub use cache::{CachedPredictor, PredictorCache, SelectionPolicy};
pub use predictor::{
    BottomGbmLike, BottomLogistic, PredictError, Predictor, PredictorKind, PredictorModel, Stump,
};
pub use registry::{get_artifact, get_production, list_recent, register, repair_production_multiplicity, set_production};

//! Generation-checked predictor cache.
//!
//! Grounded on `mqk-strategy::host::StrategyHost`'s "hold a stable
//! reference for the duration of a tick" rule: a caller that fetches a
//! [`CachedPredictor`] keeps working against that exact artifact for the
//! whole tick even if a concurrent promotion swaps the production pointer
//! mid-flight. The next tick re-checks the generation and picks up the
//! change.

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::predictor::PredictorModel;
use crate::registry;

#[derive(Clone)]
pub struct CachedPredictor {
    pub model_id: Uuid,
    pub version: i64,
    pub used_production: bool,
    pub predictor: Arc<PredictorModel>,
}

struct Generation {
    model_id: Uuid,
    version: i64,
    predictor: Arc<PredictorModel>,
    used_production: bool,
}

/// Selection policy for which artifact a tick should read. `bd-inference`
/// defaults to `ProductionOrLatest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    ProductionOnly,
    ProductionOrLatest,
}

pub struct PredictorCache {
    family: String,
    inner: RwLock<Option<Generation>>,
}

impl PredictorCache {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            inner: RwLock::new(None),
        }
    }

    /// Returns the artifact to use for this tick per `policy`, reloading
    /// and decoding from `bd-db` only when the generation (model id +
    /// version) differs from what's cached.
    pub async fn get_or_refresh(
        &self,
        pool: &PgPool,
        policy: SelectionPolicy,
    ) -> Result<CachedPredictor> {
        let chosen = match policy {
            SelectionPolicy::ProductionOnly => registry::get_production(pool, &self.family)
                .await?
                .map(|a| (a, true)),
            SelectionPolicy::ProductionOrLatest => {
                if let Some(a) = registry::get_production(pool, &self.family).await? {
                    Some((a, true))
                } else {
                    registry::list_recent(pool, &self.family, 1)
                        .await?
                        .into_iter()
                        .next()
                        .map(|a| (a, false))
                }
            }
        };

        let (artifact, used_production) =
            chosen.context("no model artifact available for family")?;

        {
            let cached = self.inner.read().expect("predictor cache lock poisoned");
            if let Some(gen) = cached.as_ref() {
                if gen.model_id == artifact.id && gen.version == artifact.version {
                    return Ok(CachedPredictor {
                        model_id: gen.model_id,
                        version: gen.version,
                        used_production: gen.used_production,
                        predictor: gen.predictor.clone(),
                    });
                }
            }
        }

        let predictor = Arc::new(PredictorModel::decode(&artifact.model_blob)?);
        let generation = Generation {
            model_id: artifact.id,
            version: artifact.version,
            predictor: predictor.clone(),
            used_production,
        };

        let result = CachedPredictor {
            model_id: generation.model_id,
            version: generation.version,
            used_production: generation.used_production,
            predictor: predictor.clone(),
        };

        *self.inner.write().expect("predictor cache lock poisoned") = Some(generation);
        Ok(result)
    }
}

//! The inference auto-loop tick: feature read → model select → predict
//! → threshold decision → batched log → cooldown-gated signal emission.

use std::sync::Mutex;
use std::time::Duration;

use bd_db::core::NewInferenceLog;
use bd_features::{FeatureEngine, FeatureError};
use bd_registry::{PredictorCache, SelectionPolicy};
use bd_schemas::{DECISION_BOTTOM, DECISION_HOLD};
use bd_settings::{keys, SettingsStore};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::batch::BatchHandle;
use crate::types::{BottomSignalCandidate, SignalSink, TickOutcome, TickStatus};

/// Per-call predict budget (spec §4.6): a timeout here is a transient
/// error, never a panic.
pub const PREDICT_TIMEOUT: Duration = Duration::from_millis(500);

pub struct InferenceLoop {
    family: String,
    symbol: String,
    interval_ms: i64,
    cache: PredictorCache,
    last_signal_at: Mutex<Option<chrono::DateTime<Utc>>>,
}

impl InferenceLoop {
    pub fn new(family: impl Into<String>, symbol: impl Into<String>, interval_ms: i64) -> Self {
        let family = family.into();
        Self {
            cache: PredictorCache::new(family.clone()),
            family,
            symbol: symbol.into(),
            interval_ms,
            last_signal_at: Mutex::new(None),
        }
    }

    /// Reads the effective loop interval (settings override config
    /// default), used as the `interval_secs` closure passed to
    /// `bd_settings::spawn_loop`.
    pub async fn effective_interval_secs(settings: &SettingsStore) -> u64 {
        settings
            .get_u64(keys::INFERENCE_AUTO_LOOP_INTERVAL_SEC, 10)
            .await
    }

    pub async fn tick(
        &self,
        pool: &PgPool,
        features: &FeatureEngine,
        settings: &SettingsStore,
        batch: &BatchHandle,
        sink: &dyn SignalSink,
    ) -> TickOutcome {
        let threshold = settings.get_f64(keys::INFERENCE_AUTO_THRESHOLD, 0.5).await;

        let snapshot = match features.compute_latest(&self.symbol, self.interval_ms).await {
            Ok(s) => s,
            Err(FeatureError::NoData) => {
                tracing::debug!(target: "inference", symbol = %self.symbol, "no_data, skipping tick");
                return TickOutcome {
                    status: TickStatus::NoData,
                    probability: None,
                    decision: None,
                    threshold,
                    model_version: None,
                    used_production: None,
                    feature_age_seconds: None,
                    hint: Some("insufficient warmup bars".to_string()),
                };
            }
        };

        let cached = match self.cache.get_or_refresh(pool, SelectionPolicy::ProductionOrLatest).await {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(target: "inference", %err, "no model artifact available");
                return TickOutcome {
                    status: TickStatus::NoModel,
                    probability: None,
                    decision: None,
                    threshold,
                    model_version: None,
                    used_production: None,
                    feature_age_seconds: None,
                    hint: Some("no model artifact registered".to_string()),
                };
            }
        };

        let predictor = cached.predictor.clone();
        let snap_for_predict = snapshot.clone();
        let predicted = tokio::time::timeout(
            PREDICT_TIMEOUT,
            tokio::task::spawn_blocking(move || predictor.predict(&snap_for_predict)),
        )
        .await;

        let probability = match predicted {
            Ok(Ok(Ok(p))) => p,
            Ok(Ok(Err(err))) => {
                tracing::warn!(target: "inference", %err, "predict failed");
                return TickOutcome {
                    status: TickStatus::InsufficientFeatures,
                    probability: None,
                    decision: None,
                    threshold,
                    model_version: Some(cached.version),
                    used_production: Some(cached.used_production),
                    feature_age_seconds: Some(age_seconds(snapshot.close_time_ms)),
                    hint: Some(err.to_string()),
                };
            }
            Ok(Err(join_err)) => {
                tracing::error!(target: "inference", %join_err, "predict task panicked");
                return TickOutcome {
                    status: TickStatus::InsufficientFeatures,
                    probability: None,
                    decision: None,
                    threshold,
                    model_version: Some(cached.version),
                    used_production: Some(cached.used_production),
                    feature_age_seconds: Some(age_seconds(snapshot.close_time_ms)),
                    hint: Some("predict task panicked".to_string()),
                };
            }
            Err(_elapsed) => {
                tracing::warn!(target: "inference", symbol = %self.symbol, "predict exceeded 500ms budget");
                return TickOutcome {
                    status: TickStatus::InsufficientFeatures,
                    probability: None,
                    decision: None,
                    threshold,
                    model_version: Some(cached.version),
                    used_production: Some(cached.used_production),
                    feature_age_seconds: Some(age_seconds(snapshot.close_time_ms)),
                    hint: Some("predict timed out".to_string()),
                };
            }
        };

        // Decision boundary is `>=`, not `>` (spec §8 boundary behavior).
        let decision: i8 = if probability >= threshold {
            DECISION_BOTTOM
        } else {
            DECISION_HOLD
        };

        let now = Utc::now();
        batch.enqueue(NewInferenceLog {
            id: Uuid::new_v4(),
            created_at: now,
            symbol: self.symbol.clone(),
            interval_ms: self.interval_ms,
            feature_close_time_ms: snapshot.close_time_ms,
            probability,
            threshold,
            decision: decision as i16,
            model_id: cached.model_id,
            model_version: cached.version,
            used_production: cached.used_production,
            extra_json: serde_json::Value::Null,
        });

        if decision == DECISION_BOTTOM {
            let cooldown_sec = settings.get_u64(keys::LIVE_TRADING_COOLDOWN_SEC, 300).await;
            let mut last = self.last_signal_at.lock().expect("last_signal_at lock poisoned");
            let elapsed_ok = last
                .map(|t| (now - t).num_seconds() >= cooldown_sec as i64)
                .unwrap_or(true);
            if elapsed_ok {
                *last = Some(now);
                let price_micros = match features.latest_close_micros(&self.symbol, self.interval_ms).await {
                    Ok(p) => p,
                    Err(_) => {
                        tracing::warn!(target: "inference", symbol = %self.symbol, "decision=1 but no close price available, suppressing signal");
                        *last = None;
                        return TickOutcome {
                            status: TickStatus::Ok,
                            probability: Some(probability),
                            decision: Some(decision),
                            threshold,
                            model_version: Some(cached.version),
                            used_production: Some(cached.used_production),
                            feature_age_seconds: Some(age_seconds(snapshot.close_time_ms)),
                            hint: Some("signal suppressed: no close price available".to_string()),
                        };
                    }
                };
                let atr_micros = snapshot
                    .features
                    .get("atr_14")
                    .map(|atr| (*atr * bd_schemas::MICROS_SCALE as f64).round() as i64);
                sink.emit(BottomSignalCandidate {
                    symbol: self.symbol.clone(),
                    interval_ms: self.interval_ms,
                    probability,
                    threshold,
                    feature_close_time_ms: snapshot.close_time_ms,
                    price_micros,
                    atr_micros,
                    model_id: cached.model_id,
                    model_version: cached.version,
                    emitted_at: now,
                });
            } else {
                tracing::debug!(target: "inference", symbol = %self.symbol, "decision=1 but cooldown active, suppressing signal");
            }
        }

        TickOutcome {
            status: TickStatus::Ok,
            probability: Some(probability),
            decision: Some(decision),
            threshold,
            model_version: Some(cached.version),
            used_production: Some(cached.used_production),
            feature_age_seconds: Some(age_seconds(snapshot.close_time_ms)),
            hint: None,
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }
}

fn age_seconds(close_time_ms: i64) -> i64 {
    let now_ms = Utc::now().timestamp_millis();
    ((now_ms - close_time_ms).max(0)) / 1000
}

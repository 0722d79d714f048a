//! Scenario: drift streak accumulates and resets on a production model
//! change. Skips gracefully when `BD_DATABASE_URL` is not set.

use bd_calibration::CalibrationMonitor;
use bd_registry::{BottomLogistic, PredictorModel};
use bd_schemas::{LabelParams, ModelMetrics};
use bd_settings::{keys, SettingsStore};
use chrono::{Duration, Utc};
use uuid::Uuid;

async fn register_production(pool: &sqlx::PgPool, family: &str, ece: f64) -> anyhow::Result<Uuid> {
    let model = PredictorModel::BottomLogistic(BottomLogistic {
        intercept: 0.0,
        weights: Default::default(),
    });
    let metrics = ModelMetrics {
        auc: 0.8,
        pr_auc: 0.8,
        brier: 0.1,
        ece,
        mce: ece * 2.0,
        reliability_bins: vec![],
        label_definition: "bottom".to_string(),
        label_params: LabelParams::default(),
    };
    let id = bd_registry::register(pool, family, 1, &metrics, &model.encode()).await?;
    bd_registry::set_production(pool, family, id).await?;
    Ok(id)
}

#[tokio::test]
async fn streak_builds_then_resets_on_new_production_model() -> anyhow::Result<()> {
    let url = match std::env::var(bd_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: BD_DATABASE_URL not set");
            return Ok(());
        }
    };
    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(2).connect(&url).await?;
    bd_db::migrate(&pool).await?;

    let symbol = format!("CAL{}", Uuid::new_v4().simple());
    let interval_ms = 60_000;
    let family = format!("calfamily_{}", Uuid::new_v4().simple());

    register_production(&pool, &family, 0.01).await?;

    let settings = SettingsStore::new(pool.clone());
    settings.load_all().await?;
    settings.put(keys::CALIBRATION_MONITOR_MIN_SAMPLES, serde_json::json!(5), true).await?;
    settings.put(keys::CALIBRATION_MONITOR_ABS_STREAK_TRIGGER, serde_json::json!(2), true).await?;
    settings.put(keys::CALIBRATION_MONITOR_ECE_ABS, serde_json::json!(0.05), true).await?;
    settings.put(keys::CALIBRATION_MONITOR_ABS_DELTA_MULTIPLIER, serde_json::json!(1.0), true).await?;

    // Badly miscalibrated realized rows: high predicted prob, all negative outcomes.
    for _ in 0..10 {
        bd_db::core::insert_inference_log(
            &pool,
            &bd_db::core::NewInferenceLog {
                id: Uuid::new_v4(),
                created_at: Utc::now() - Duration::seconds(10),
                symbol: symbol.clone(),
                interval_ms,
                feature_close_time_ms: 0,
                probability: 0.95,
                threshold: 0.5,
                decision: 1,
                model_id: Uuid::new_v4(),
                model_version: 1,
                used_production: true,
                extra_json: serde_json::Value::Null,
            },
        )
        .await?;
    }
    let rows = bd_db::core::select_unrealized_for_update(&pool, &symbol, interval_ms, Utc::now(), 10).await?;
    for row in rows {
        bd_db::core::mark_realized(&pool, row.id, false, Utc::now()).await?;
    }

    let monitor = CalibrationMonitor::new(family.clone());
    monitor.tick(&pool, &settings, &symbol, interval_ms).await?;
    monitor.tick(&pool, &settings, &symbol, interval_ms).await?;

    let status = monitor.status(&settings).await;
    assert!(status.abs_streak >= 2, "expected drift streak to build, got {}", status.abs_streak);
    assert!(status.recommend_retrain);

    // New production model: streak must reset even though inputs are unchanged.
    register_production(&pool, &family, 0.01).await?;
    monitor.tick(&pool, &settings, &symbol, interval_ms).await?;
    let status_after_reset = monitor.status(&settings).await;
    assert_eq!(status_after_reset.abs_streak, 1, "one tick after reset should count as the first");

    Ok(())
}

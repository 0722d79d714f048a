//! Scenario: the promotion gate's five-step algorithm (spec §4.9 / §8
//! scenario 4). Skips gracefully when `BD_DATABASE_URL` is not set.

use bd_promotion::{promote, PromotionCandidate, PromotionThresholds};
use bd_registry::{BottomLogistic, PredictorModel};
use bd_schemas::{LabelParams, ModelMetrics, PromotionDecision};
use uuid::Uuid;

fn metrics(auc: f64, ece: f64, brier: f64) -> ModelMetrics {
    ModelMetrics {
        auc,
        pr_auc: auc,
        brier,
        ece,
        mce: ece * 1.5,
        reliability_bins: vec![],
        label_definition: "bottom".to_string(),
        label_params: LabelParams::default(),
    }
}

async fn register(pool: &sqlx::PgPool, family: &str, version: i64, m: &ModelMetrics) -> anyhow::Result<Uuid> {
    let model = PredictorModel::BottomLogistic(BottomLogistic {
        intercept: 0.0,
        weights: Default::default(),
    });
    bd_registry::register(pool, family, version, m, &model.encode()).await
}

#[tokio::test]
async fn first_candidate_promotes_unconditionally_as_no_production() -> anyhow::Result<()> {
    let Some(pool) = connect().await? else { return Ok(()) };

    let family = format!("promofam_{}", Uuid::new_v4().simple());
    let candidate_metrics = metrics(0.70, 0.05, 0.15);
    let candidate_id = register(&pool, &family, 1, &candidate_metrics).await?;

    let thresholds = PromotionThresholds {
        min_auc_delta: 0.02,
        max_ece_delta: 0.01,
        min_val_samples: 200,
        cooldown_seconds: 0,
    };
    let candidate = PromotionCandidate {
        model_id: candidate_id,
        metrics: candidate_metrics,
        val_samples: 500,
    };

    let report = promote(&pool, &family, &candidate, thresholds, None).await?;
    assert_eq!(report.decision, PromotionDecision::Promoted);
    assert_eq!(report.reason, "no_production");

    let prod = bd_registry::get_production(&pool, &family).await?.unwrap();
    assert_eq!(prod.id, candidate_id);

    Ok(())
}

#[tokio::test]
async fn sufficient_auc_gain_with_bounded_ece_regression_promotes() -> anyhow::Result<()> {
    let Some(pool) = connect().await? else { return Ok(()) };

    let family = format!("promofam_{}", Uuid::new_v4().simple());
    let prod_metrics = metrics(0.70, 0.05, 0.15);
    let prod_id = register(&pool, &family, 1, &prod_metrics).await?;
    bd_registry::set_production(&pool, &family, prod_id).await?;

    let cand_metrics = metrics(0.73, 0.04, 0.14);
    let cand_id = register(&pool, &family, 2, &cand_metrics).await?;

    let thresholds = PromotionThresholds {
        min_auc_delta: 0.02,
        max_ece_delta: 0.01,
        min_val_samples: 200,
        cooldown_seconds: 0,
    };
    let candidate = PromotionCandidate {
        model_id: cand_id,
        metrics: cand_metrics,
        val_samples: 500,
    };

    let report = promote(&pool, &family, &candidate, thresholds, None).await?;
    assert_eq!(report.decision, PromotionDecision::Promoted);
    assert!((report.auc_improve - 0.03).abs() < 1e-9);
    assert!((report.ece_delta - (-0.01)).abs() < 1e-9);

    let prod = bd_registry::get_production(&pool, &family).await?.unwrap();
    assert_eq!(prod.id, cand_id);

    Ok(())
}

#[tokio::test]
async fn insufficient_val_samples_skips_before_any_comparison() -> anyhow::Result<()> {
    let Some(pool) = connect().await? else { return Ok(()) };

    let family = format!("promofam_{}", Uuid::new_v4().simple());
    let cand_metrics = metrics(0.99, 0.0, 0.0);
    let cand_id = register(&pool, &family, 1, &cand_metrics).await?;

    let thresholds = PromotionThresholds {
        min_auc_delta: 0.02,
        max_ece_delta: 0.01,
        min_val_samples: 200,
        cooldown_seconds: 0,
    };
    let candidate = PromotionCandidate {
        model_id: cand_id,
        metrics: cand_metrics,
        val_samples: 50,
    };

    let report = promote(&pool, &family, &candidate, thresholds, None).await?;
    assert_eq!(report.decision, PromotionDecision::Skipped);
    assert!(report.reason.starts_with("insufficient_val_samples"));
    assert!(bd_registry::get_production(&pool, &family).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn cooldown_blocks_rapid_reconsecutive_promotions() -> anyhow::Result<()> {
    let Some(pool) = connect().await? else { return Ok(()) };

    let family = format!("promofam_{}", Uuid::new_v4().simple());
    let m1 = metrics(0.70, 0.05, 0.15);
    let id1 = register(&pool, &family, 1, &m1).await?;

    let thresholds = PromotionThresholds {
        min_auc_delta: 0.0,
        max_ece_delta: 1.0,
        min_val_samples: 0,
        cooldown_seconds: 3600,
    };

    let c1 = PromotionCandidate {
        model_id: id1,
        metrics: m1,
        val_samples: 500,
    };
    let first = promote(&pool, &family, &c1, thresholds, None).await?;
    assert_eq!(first.decision, PromotionDecision::Promoted);

    let m2 = metrics(0.99, 0.0, 0.0);
    let id2 = register(&pool, &family, 2, &m2).await?;
    let c2 = PromotionCandidate {
        model_id: id2,
        metrics: m2,
        val_samples: 500,
    };
    let second = promote(&pool, &family, &c2, thresholds, None).await?;
    assert_eq!(second.decision, PromotionDecision::Skipped);
    assert!(second.reason.starts_with("cooldown_active"));

    let prod = bd_registry::get_production(&pool, &family).await?.unwrap();
    assert_eq!(prod.id, id1, "cooldown-blocked candidate must not become production");

    Ok(())
}

async fn connect() -> anyhow::Result<Option<sqlx::PgPool>> {
    let url = match std::env::var(bd_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: BD_DATABASE_URL not set");
            return Ok(None);
        }
    };
    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(2).connect(&url).await?;
    bd_db::migrate(&pool).await?;
    Ok(Some(pool))
}

//! Scenario: `run_once` resolves aged unrealized rows exactly once.
//!
//! Skips gracefully when `BD_DATABASE_URL` is not set.

use bd_schemas::LabelParams;
use chrono::{Duration, Utc};
use uuid::Uuid;

fn bar(symbol: &str, open_time_ms: i64, interval_ms: i64, close_micros: i64) -> bd_db::core::BarRow {
    bd_db::core::BarRow {
        symbol: symbol.to_string(),
        interval_ms,
        open_time_ms,
        close_time_ms: open_time_ms + interval_ms - 1,
        open_micros: close_micros,
        high_micros: close_micros + 1_000,
        low_micros: close_micros - 1_000,
        close_micros,
        volume_micros: 1_000_000,
        trade_count: 1,
        is_closed: true,
    }
}

#[tokio::test]
async fn resolves_row_and_is_idempotent_on_rerun() -> anyhow::Result<()> {
    let url = match std::env::var(bd_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: BD_DATABASE_URL not set");
            return Ok(());
        }
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;
    bd_db::migrate(&pool).await?;

    let symbol = format!("LBL{}", Uuid::new_v4().simple());
    let interval_ms = 60_000;
    let params = LabelParams {
        lookahead: 5,
        drawdown: 0.01,
        rebound: 0.01,
    };

    // Anchor bar plus 5 future bars: a clean drawdown-then-rebound shape.
    let closes = [100_000_000i64, 98_500_000, 97_000_000, 96_500_000, 98_000_000, 99_500_000];
    for (i, c) in closes.iter().enumerate() {
        bd_db::core::upsert_bar(&pool, &bar(&symbol, i as i64 * interval_ms, interval_ms, *c)).await?;
    }

    let anchor_close_time_ms = interval_ms - 1;
    let row_id = Uuid::new_v4();
    bd_db::core::insert_inference_log(
        &pool,
        &bd_db::core::NewInferenceLog {
            id: row_id,
            created_at: Utc::now() - Duration::hours(2),
            symbol: symbol.clone(),
            interval_ms,
            feature_close_time_ms: anchor_close_time_ms,
            probability: 0.8,
            threshold: 0.5,
            decision: 1,
            model_id: Uuid::new_v4(),
            model_version: 1,
            used_production: true,
            extra_json: serde_json::Value::Null,
        },
    )
    .await?;

    let first = bd_labeler::run_once(&pool, &symbol, interval_ms, 0, 10, params).await?;
    assert_eq!(first.labeled_count, 1);
    assert_eq!(first.pending_count, 0);

    let second = bd_labeler::run_once(&pool, &symbol, interval_ms, 0, 10, params).await?;
    assert_eq!(second.labeled_count, 0, "row already realized must not be reselected");

    Ok(())
}

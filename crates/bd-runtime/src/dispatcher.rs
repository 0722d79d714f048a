//! Claims pending outbox rows and dispatches them through a
//! `BrokerGateway`, the single choke-point a submit is ever allowed to
//! cross.
//!
//! This module is the only production call site of `bd_db::outbox_claim_batch`
//! (RT-1) — every other crate that needs to submit an order enqueues it
//! with `bd_db::outbox_enqueue` and lets this loop pick it up.

use bd_db::{outbox_claim_batch, outbox_mark_failed, outbox_mark_sent, OutboxRow};
use bd_execution::wiring::BrokerGateway;
use bd_execution::{BrokerAdapter, IntegrityGate, OutboxClaimToken, ReconcileGate, RiskGate, BrokerSubmitRequest};
use sqlx::PgPool;

/// Outcome of one dispatch pass, for logging/metrics at the call site.
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchOutcome {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Claim up to `batch_size` PENDING outbox rows and submit each through
/// `gateway`. A row whose `order_json` doesn't decode, or whose submit
/// errors (gate refusal or broker failure), is marked FAILED rather than
/// left CLAIMED — outbox rows never get stuck mid-dispatch.
pub async fn dispatch_once<B, IG, RG, CG>(
    pool: &PgPool,
    gateway: &BrokerGateway<B, IG, RG, CG>,
    dispatcher_id: &str,
    batch_size: i64,
) -> anyhow::Result<DispatchOutcome>
where
    B: BrokerAdapter,
    IG: IntegrityGate,
    RG: RiskGate,
    CG: ReconcileGate,
{
    let rows = outbox_claim_batch(pool, batch_size, dispatcher_id).await?;
    let mut outcome = DispatchOutcome {
        claimed: rows.len(),
        ..Default::default()
    };

    for row in rows {
        match dispatch_row(gateway, &row) {
            Ok(()) => {
                outbox_mark_sent(pool, &row.idempotency_key).await?;
                outcome.sent += 1;
            }
            Err(err) => {
                tracing::warn!(
                    target: "runtime",
                    outbox_id = row.outbox_id,
                    idempotency_key = %row.idempotency_key,
                    %err,
                    "outbox dispatch failed"
                );
                outbox_mark_failed(pool, &row.idempotency_key).await?;
                outcome.failed += 1;
            }
        }
    }

    Ok(outcome)
}

fn dispatch_row<B, IG, RG, CG>(
    gateway: &BrokerGateway<B, IG, RG, CG>,
    row: &OutboxRow,
) -> anyhow::Result<()>
where
    B: BrokerAdapter,
    IG: IntegrityGate,
    RG: RiskGate,
    CG: ReconcileGate,
{
    let req: BrokerSubmitRequest = serde_json::from_value(row.order_json.clone())?;
    let claim = OutboxClaimToken::from_claimed_row(row.outbox_id, row.idempotency_key.clone());
    gateway
        .submit(&claim, req)
        .map_err(|err| anyhow::anyhow!("broker submit refused: {err}"))?;
    Ok(())
}

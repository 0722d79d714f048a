//! `BrokerAdapter` implementation for `PaperBroker` — RT-8.
//!
//! `BrokerAdapter` methods take `&self`, but `PaperBroker`'s methods take
//! `&mut self`. `LockedPaperBroker` wraps the broker in a `Mutex` so it can
//! be shared behind the `&self` adapter methods that `BrokerGateway` expects,
//! while keeping `PaperBroker` itself free of synchronization concerns.

use std::sync::Mutex;

use bd_execution::{
    BrokerAdapter, BrokerCancelResponse, BrokerInvokeToken, BrokerReplaceRequest,
    BrokerReplaceResponse, BrokerSubmitRequest, BrokerSubmitResponse,
};
use bd_reconcile::{OrderStatus, Side};

use crate::types::{CancelRequest, ReplaceRequest, SubmitOrder};
use crate::PaperBroker;

/// Thread-safe wrapper around [`PaperBroker`] satisfying `bd_execution::BrokerAdapter`.
#[derive(Default)]
pub struct LockedPaperBroker {
    inner: Mutex<PaperBroker>,
}

impl LockedPaperBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PaperBroker::new()),
        }
    }

    /// Snapshot of current positions, for reconcile/inspection call sites.
    pub fn positions(&self) -> std::collections::BTreeMap<String, i64> {
        self.inner.lock().expect("paper broker mutex poisoned").positions()
    }

    /// Produce a broker snapshot compatible with `bd-reconcile`.
    pub fn snapshot(&self) -> (crate::types::BrokerMessageId, bd_reconcile::BrokerSnapshot) {
        self.inner.lock().expect("paper broker mutex poisoned").snapshot()
    }
}

fn status_str(status: &OrderStatus) -> &'static str {
    match status {
        OrderStatus::New => "new",
        OrderStatus::Accepted => "accepted",
        OrderStatus::PartiallyFilled => "partially_filled",
        OrderStatus::Filled => "filled",
        OrderStatus::Canceled => "canceled",
        OrderStatus::Rejected => "rejected",
        OrderStatus::Unknown => "unknown",
    }
}

/// Sign carries side: `quantity > 0` => BUY, `quantity < 0` => SELL.
/// Matches the convention produced by `bd_execution::targets_to_order_intents`.
fn side_and_qty(quantity: i32) -> (Side, i64) {
    if quantity >= 0 {
        (Side::Buy, quantity as i64)
    } else {
        (Side::Sell, (-quantity) as i64)
    }
}

impl BrokerAdapter for LockedPaperBroker {
    fn submit_order(
        &self,
        req: BrokerSubmitRequest,
        _token: &BrokerInvokeToken,
    ) -> Result<BrokerSubmitResponse, Box<dyn std::error::Error>> {
        let (side, qty) = side_and_qty(req.quantity);
        let mut broker = self.inner.lock().expect("paper broker mutex poisoned");
        let resp = broker.submit(SubmitOrder {
            client_order_id: req.order_id,
            symbol: req.symbol,
            side,
            qty,
        });

        Ok(BrokerSubmitResponse {
            broker_order_id: resp.broker_order_id,
            submitted_at: 0,
            status: status_str(&resp.snapshot.status).to_string(),
        })
    }

    fn cancel_order(
        &self,
        broker_order_id: &str,
        _token: &BrokerInvokeToken,
    ) -> Result<BrokerCancelResponse, Box<dyn std::error::Error>> {
        let mut broker = self.inner.lock().expect("paper broker mutex poisoned");
        broker.cancel(CancelRequest {
            client_order_id: broker_order_id.to_string(),
        });

        Ok(BrokerCancelResponse {
            broker_order_id: broker_order_id.to_string(),
            cancelled_at: 0,
            status: "canceled".to_string(),
        })
    }

    fn replace_order(
        &self,
        req: BrokerReplaceRequest,
        _token: &BrokerInvokeToken,
    ) -> Result<BrokerReplaceResponse, Box<dyn std::error::Error>> {
        let mut broker = self.inner.lock().expect("paper broker mutex poisoned");
        broker.replace(ReplaceRequest {
            client_order_id: req.broker_order_id.clone(),
            new_qty: req.quantity as i64,
        });

        Ok(BrokerReplaceResponse {
            broker_order_id: req.broker_order_id,
            replaced_at: 0,
            status: "accepted".to_string(),
        })
    }
}

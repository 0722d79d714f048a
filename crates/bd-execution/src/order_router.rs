//! Order Router: Deterministic execution boundary between internal engine and broker adapters.
//!
//! # Purpose
//! This module defines the thin, immutable boundary through which all order execution
//! requests must pass. It isolates the core execution engine from broker-specific
//! implementations, ensuring that routing logic remains deterministic and free of
//! strategy, risk, or accounting concerns.
//!
//! # Why This Boundary Exists
//! - Enforces separation of concerns between order generation (strategy/risk) and order delivery (broker)
//! - Provides a single choke-point for logging, metrics, and pre-flight validation
//! - Enables pluggable broker adapters (paper, live, etc.) without core engine changes
//!
//! # Why It Must Remain Thin
//! - Preserves deterministic behavior required for backtesting and simulation
//! - Avoids embedding business logic that belongs in risk or strategy modules
//! - Keeps the routing layer verifiable and low-risk
//!
//! `OrderRouter` itself is `pub(crate)` — the only way external code reaches a
//! broker adapter is through [`crate::gateway::BrokerGateway`], which evaluates
//! the gate checks before ever constructing a [`BrokerInvokeToken`].

use serde::{Deserialize, Serialize};

use crate::gateway::BrokerInvokeToken;

/// Convenience alias so all public items in this module can use `Result<T>`
/// without spelling out the error type everywhere.
type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Broker-agnostic order submission request.
///
/// All prices on this surface are integer micros (`Option<i64>`, 1 unit =
/// 1_000_000 micros) — see [`crate::prices`]. No `f64` crosses this boundary.
///
/// `Serialize`/`Deserialize` let this round-trip through `oms_outbox`'s
/// `order_json` column (bd-runtime's dispatcher is the only production
/// reader of that column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSubmitRequest {
    /// Internal order identifier. `BrokerGateway::submit` always overrides
    /// this with the outbox claim's idempotency key before it reaches the
    /// broker adapter (EB-3).
    pub order_id: String,
    pub symbol: String,
    pub quantity: i32,
    pub order_type: String,
    pub limit_price: Option<i64>,
    pub time_in_force: String,
}

/// Broker-agnostic order submission response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSubmitResponse {
    pub broker_order_id: String,
    pub submitted_at: u64,
    pub status: String,
}

/// Broker-agnostic order cancellation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerCancelResponse {
    pub broker_order_id: String,
    pub cancelled_at: u64,
    pub status: String,
}

/// Broker-agnostic order replacement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerReplaceRequest {
    /// Broker-assigned order identifier — resolved by the gateway through
    /// [`crate::id_map::BrokerOrderMap`] before this request is built.
    pub broker_order_id: String,
    pub quantity: i32,
    pub limit_price: Option<i64>,
    pub time_in_force: String,
}

/// Broker-agnostic order replacement response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerReplaceResponse {
    pub broker_order_id: String,
    pub replaced_at: u64,
    pub status: String,
}

/// Trait every broker adapter (paper, live, mock) must implement.
///
/// Every method takes a [`BrokerInvokeToken`], which can only be manufactured
/// inside [`crate::gateway::BrokerGateway`] — this makes the gateway the
/// single reachable caller of any adapter, regardless of what crate the
/// adapter lives in.
pub trait BrokerAdapter {
    fn submit_order(
        &self,
        req: BrokerSubmitRequest,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerSubmitResponse>;

    fn cancel_order(
        &self,
        broker_order_id: &str,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerCancelResponse>;

    fn replace_order(
        &self,
        req: BrokerReplaceRequest,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerReplaceResponse>;
}

/// Deterministic order router that delegates to a broker adapter.
///
/// `pub(crate)`: never re-exported from `lib.rs`. The only public entry
/// point into a broker adapter is [`crate::gateway::BrokerGateway`].
pub(crate) struct OrderRouter<B: BrokerAdapter> {
    broker: B,
}

impl<B: BrokerAdapter> OrderRouter<B> {
    pub(crate) fn new(broker: B) -> Self {
        Self { broker }
    }

    pub(crate) fn route_submit(
        &self,
        req: BrokerSubmitRequest,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerSubmitResponse> {
        self.broker.submit_order(req, token)
    }

    pub(crate) fn route_cancel(
        &self,
        broker_order_id: &str,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerCancelResponse> {
        self.broker.cancel_order(broker_order_id, token)
    }

    pub(crate) fn route_replace(
        &self,
        req: BrokerReplaceRequest,
        token: &BrokerInvokeToken,
    ) -> Result<BrokerReplaceResponse> {
        self.broker.replace_order(req, token)
    }
}

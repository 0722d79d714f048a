//! bd-execution
//!
//! PATCH 05: Execution Engine Contract (Target Position Model)
//! - Strategies output target positions (not orders)
//! - Engine converts (current_positions, targets) -> order intents
//! - Pure deterministic logic, no broker wiring
//!
//! PATCH L9 / EB-1/2/3: Broker Gateway
//! - `BrokerGateway` is the single choke-point through which all broker
//!   operations must flow; `OrderRouter` is crate-private and unreachable
//!   from outside this crate.
//! - Integer-micros price representation (`prices`) at the decision boundary.
//! - `BrokerOrderMap` (`id_map`) tracks internal -> broker order ID mappings.
//! - `oms::state_machine` is the explicit order lifecycle state machine.

mod controller;
mod engine;
mod gateway;
mod id_map;
mod order_router;
mod prices;
mod reconcile_guard;
mod types;

pub mod oms;

pub use engine::{
    on_bar, on_candidate, on_fill, targets_to_order_intents, BarUpdate, ControllerConfig,
    ControllerDecision, ControllerEvent, ControllerState, EntryGateConfig, ExitPolicyConfig,
    ExitReason, PartialLevel, PositionState, SymbolState, TrailMode,
};
pub use gateway::{
    intent_id_to_client_order_id, BrokerGateway, BrokerInvokeToken, GateRefusal, IntegrityGate,
    OutboxClaimToken, ReconcileGate, RiskGate, UnknownOrder,
};
pub use id_map::BrokerOrderMap;
pub use order_router::{
    BrokerAdapter, BrokerCancelResponse, BrokerReplaceRequest, BrokerReplaceResponse,
    BrokerSubmitRequest, BrokerSubmitResponse,
};
pub use prices::{micros_to_price, price_to_micros, PricingError, MICROS_PER_UNIT};
pub use reconcile_guard::ReconcileFreshnessGuard;
pub use types::{ExecutionDecision, OrderIntent, Side, StrategyOutput, TargetPosition};

#[cfg(feature = "testkit")]
pub use gateway::AllPass;

/// Production construction boundary for `BrokerGateway` — RT-2.
///
/// Gated behind `runtime-boundary`; only crates that mean to own a live
/// broker connection (bd-runtime) should enable that feature and build
/// their gateway through here rather than calling `BrokerGateway::new`
/// directly from scattered call sites.
#[cfg(feature = "runtime-boundary")]
pub mod wiring {
    pub use crate::gateway::BrokerGateway;
    pub use crate::order_router::BrokerAdapter;
}

use std::collections::BTreeMap;

/// Canonical type for current positions, keyed by symbol.
/// Signed quantity: +long, -short.
pub type PositionBook = BTreeMap<String, i64>;

/// Helper to build a PositionBook with minimal boilerplate in tests/callers.
pub fn position_book<I, S>(items: I) -> PositionBook
where
    I: IntoIterator<Item = (S, i64)>,
    S: Into<String>,
{
    let mut book = PositionBook::new();
    for (sym, qty) in items {
        book.insert(sym.into(), qty);
    }
    book
}

//! Broker Gateway — the SINGLE choke-point for all broker operations.
//!
//! # Invariant (enforced at both compile-time and runtime)
//!
//! **Compile-time:** `OrderRouter` is `pub(crate)` and is never re-exported
//! from `lib.rs`. External crates have no way to construct one, so the only
//! public surface that reaches a broker adapter is `BrokerGateway`.
//! `BrokerInvokeToken`'s inner field is `pub(crate)` too — the only place a
//! token can be manufactured is inside this module.
//!
//! **Runtime:** Every call to `submit` / `cancel` / `replace` evaluates three
//! gates in order and refuses with [`GateRefusal`] on the first failure:
//!
//! 1. [`IntegrityGate::is_armed`]  — system integrity is not disarmed/halted
//! 2. [`RiskGate::is_allowed`]     — risk engine allows this request
//! 3. [`ReconcileGate::is_clean`]  — most recent reconcile report is clean
//!
//! `cancel`/`replace` additionally require the internal order ID to resolve
//! through a caller-supplied [`crate::id_map::BrokerOrderMap`] — gates are
//! still evaluated first (EB-2), so a gate refusal and an [`UnknownOrder`]
//! refusal are always distinguishable by error type.
//!
//! `submit` additionally overrides the caller's `order_id` with the outbox
//! claim's idempotency key before it ever reaches the broker adapter (EB-3),
//! so a dispatcher cannot submit under an ID the outbox never recorded.

use crate::id_map::BrokerOrderMap;
use crate::order_router::{
    BrokerAdapter, BrokerCancelResponse, BrokerReplaceRequest, BrokerReplaceResponse,
    BrokerSubmitRequest, BrokerSubmitResponse, OrderRouter,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Gate traits
// ---------------------------------------------------------------------------

/// Evaluates whether the integrity engine currently permits broker dispatch.
///
/// Implementations typically bridge an `IntegrityState`-shaped type from the
/// integrity engine: `is_armed()` returns `true` iff neither `disarmed` nor
/// `halted` is set.
pub trait IntegrityGate {
    fn is_armed(&self) -> bool;
}

/// Evaluates whether the risk engine currently allows broker dispatch.
pub trait RiskGate {
    fn is_allowed(&self) -> bool;
}

/// Evaluates whether the most recent reconcile pass is clean and fresh.
pub trait ReconcileGate {
    fn is_clean(&self) -> bool;
}

// ---------------------------------------------------------------------------
// BrokerInvokeToken
// ---------------------------------------------------------------------------

/// Proof that a broker call originated from `BrokerGateway::enforce_gates`.
///
/// The inner field is `pub(crate)`, so external crates can name this type in
/// `BrokerAdapter` implementations but can never construct one themselves —
/// `BrokerInvokeToken(())` fails to compile outside `bd-execution`.
pub struct BrokerInvokeToken(pub(crate) ());

impl BrokerInvokeToken {
    fn new() -> Self {
        Self(())
    }

    #[cfg(test)]
    pub(crate) fn for_test_in_crate() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// OutboxClaimToken
// ---------------------------------------------------------------------------

/// Proof that an outbox row has been claimed and carries its idempotency key.
///
/// `_priv` is private, so the only public constructor is
/// [`OutboxClaimToken::from_claimed_row`] — callers cannot fabricate a claim
/// for a row they never actually claimed from `bd-db`.
#[derive(Debug, Clone)]
pub struct OutboxClaimToken {
    _priv: (),
    pub outbox_id: i64,
    pub idempotency_key: String,
}

impl OutboxClaimToken {
    /// Build a claim token from a row returned by `bd_db::outbox_claim_batch`.
    pub fn from_claimed_row(outbox_id: i64, idempotency_key: impl Into<String>) -> Self {
        Self {
            _priv: (),
            outbox_id,
            idempotency_key: idempotency_key.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// GateRefusal
// ---------------------------------------------------------------------------

/// The reason a broker operation was refused at the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRefusal {
    IntegrityDisarmed,
    RiskBlocked,
    ReconcileNotClean,
}

impl std::fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRefusal::IntegrityDisarmed => {
                write!(f, "GATE_REFUSED: integrity disarmed or halted")
            }
            GateRefusal::RiskBlocked => write!(f, "GATE_REFUSED: risk engine did not allow"),
            GateRefusal::ReconcileNotClean => write!(f, "GATE_REFUSED: reconcile is not clean"),
        }
    }
}

impl std::error::Error for GateRefusal {}

// ---------------------------------------------------------------------------
// UnknownOrder
// ---------------------------------------------------------------------------

/// Cancel/replace was refused because `internal_id` has no live mapping in
/// the caller's [`BrokerOrderMap`] — either it was never submitted by this
/// system, or it was already deregistered at a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOrder {
    pub internal_id: String,
}

impl std::fmt::Display for UnknownOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CANCEL_REPLACE_REFUSED: no broker mapping for internal order '{}'",
            self.internal_id
        )
    }
}

impl std::error::Error for UnknownOrder {}

// ---------------------------------------------------------------------------
// BrokerGateway
// ---------------------------------------------------------------------------

/// The SINGLE choke-point through which ALL broker operations must flow.
///
/// ```text
/// External code
///     │
///     └──► BrokerGateway::submit / cancel / replace
///                │
///                ├── enforce_gates (integrity → risk → reconcile)
///                │        └── GateRefusal   ◄── refused here if any fails
///                │
///                ├── BrokerOrderMap lookup (cancel/replace only)
///                │        └── UnknownOrder  ◄── refused if unmapped
///                │
///                └── OrderRouter::route_*   ◄── only reached if all clear
///                         └── BrokerAdapter::* (with a BrokerInvokeToken)
/// ```
pub struct BrokerGateway<B, IG, RG, CG>
where
    B: BrokerAdapter,
    IG: IntegrityGate,
    RG: RiskGate,
    CG: ReconcileGate,
{
    router: OrderRouter<B>,
    integrity: IG,
    risk: RG,
    reconcile: CG,
}

impl<B, IG, RG, CG> BrokerGateway<B, IG, RG, CG>
where
    B: BrokerAdapter,
    IG: IntegrityGate,
    RG: RiskGate,
    CG: ReconcileGate,
{
    /// Build a gateway wrapping a broker adapter and the three gate sources.
    pub fn new(broker: B, integrity: IG, risk: RG, reconcile: CG) -> Self {
        Self {
            router: OrderRouter::new(broker),
            integrity,
            risk,
            reconcile,
        }
    }

    fn enforce_gates(&self) -> std::result::Result<BrokerInvokeToken, GateRefusal> {
        if !self.integrity.is_armed() {
            return Err(GateRefusal::IntegrityDisarmed);
        }
        if !self.risk.is_allowed() {
            return Err(GateRefusal::RiskBlocked);
        }
        if !self.reconcile.is_clean() {
            return Err(GateRefusal::ReconcileNotClean);
        }
        Ok(BrokerInvokeToken::new())
    }

    /// Submit a new broker order.
    ///
    /// `req.order_id` is overridden with `claim.idempotency_key` before the
    /// request reaches the broker adapter (EB-3) — the caller cannot submit
    /// under an ID the outbox never recorded.
    pub fn submit(
        &self,
        claim: &OutboxClaimToken,
        req: BrokerSubmitRequest,
    ) -> Result<BrokerSubmitResponse> {
        let token = self.enforce_gates()?;
        let req = BrokerSubmitRequest {
            order_id: claim.idempotency_key.clone(),
            ..req
        };
        self.router.route_submit(req, &token).map_err(Into::into)
    }

    /// Cancel a broker order, identified by its internal order ID.
    ///
    /// Gates are evaluated before the map lookup (EB-2): a gate failure
    /// always produces `GateRefusal`, never `UnknownOrder`.
    pub fn cancel(&self, internal_id: &str, map: &BrokerOrderMap) -> Result<BrokerCancelResponse> {
        let token = self.enforce_gates()?;
        let broker_id = map.broker_id(internal_id).ok_or_else(|| UnknownOrder {
            internal_id: internal_id.to_string(),
        })?;
        self.router
            .route_cancel(broker_id, &token)
            .map_err(Into::into)
    }

    /// Replace a broker order, identified by its internal order ID.
    ///
    /// Gates are evaluated before the map lookup (EB-2), same as `cancel`.
    pub fn replace(
        &self,
        internal_id: &str,
        map: &BrokerOrderMap,
        quantity: i32,
        limit_price: Option<i64>,
        time_in_force: String,
    ) -> Result<BrokerReplaceResponse> {
        let token = self.enforce_gates()?;
        let broker_id = map.broker_id(internal_id).ok_or_else(|| UnknownOrder {
            internal_id: internal_id.to_string(),
        })?;
        let req = BrokerReplaceRequest {
            broker_order_id: broker_id.to_string(),
            quantity,
            limit_price,
            time_in_force,
        };
        self.router
            .route_replace(req, &token)
            .map_err(Into::into)
    }
}

// ---------------------------------------------------------------------------
// testkit: always-pass gate + gateway constructor for harness wiring
// ---------------------------------------------------------------------------

/// Gate stub that always passes all three checks. Gated behind `testkit` —
/// production wiring must supply real gates (RT-2).
#[cfg(feature = "testkit")]
pub struct AllPass;

#[cfg(feature = "testkit")]
impl IntegrityGate for AllPass {
    fn is_armed(&self) -> bool {
        true
    }
}

#[cfg(feature = "testkit")]
impl RiskGate for AllPass {
    fn is_allowed(&self) -> bool {
        true
    }
}

#[cfg(feature = "testkit")]
impl ReconcileGate for AllPass {
    fn is_clean(&self) -> bool {
        true
    }
}

#[cfg(feature = "testkit")]
impl<B: BrokerAdapter> BrokerGateway<B, AllPass, AllPass, AllPass> {
    /// Build a gateway with all gates pre-armed for test/harness use.
    ///
    /// Only compiled with `testkit`; must never appear in production
    /// dependency graphs (see the `testkit` feature comment in Cargo.toml).
    pub fn for_test(broker: B) -> Self {
        Self::new(broker, AllPass, AllPass, AllPass)
    }
}

#[cfg(feature = "testkit")]
impl OutboxClaimToken {
    /// Build a claim token without a real outbox claim, for test harnesses.
    pub fn for_test(idempotency_key: impl Into<String>) -> Self {
        Self::from_claimed_row(0, idempotency_key)
    }
}

#[cfg(feature = "testkit")]
impl BrokerInvokeToken {
    /// Manufacture a token outside `BrokerGateway`, for adapter-level unit
    /// tests that need to call `BrokerAdapter` methods directly. Gated
    /// behind `testkit` — production adapters only ever see a token that
    /// arrived from `enforce_gates`.
    pub fn for_test() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Idempotency derivation
// ---------------------------------------------------------------------------

/// Derive the stable `client_order_id` for a given intent ID.
///
/// This is the **canonical** derivation point: every call-site — first submit
/// or any subsequent retry — must use this function. Because the mapping is
/// deterministic (same `intent_id` ⟹ same output), retries automatically
/// reuse the same key, preventing broker-side duplicate submission.
pub fn intent_id_to_client_order_id(intent_id: &str) -> String {
    intent_id.to_string()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

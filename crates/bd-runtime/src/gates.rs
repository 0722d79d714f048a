//! Adapters bridging each engine's own state type to the single-method
//! gate traits `BrokerGateway` enforces.
//!
//! The orphan rule prevents implementing `bd_execution`'s foreign traits
//! for `bd_integrity`/`bd_risk`'s foreign types outside this crate or
//! their home crates, so this is where the newtype wrappers live in
//! production (the test-only equivalents are duplicated locally in
//! `bd-testkit` scenario tests, by design — see those files' doc
//! comments).

use std::sync::{Arc, RwLock};

use bd_execution::{IntegrityGate, RiskGate};
use bd_integrity::IntegrityState;
use bd_risk::RiskState;

/// Bridges `bd_integrity::IntegrityState` to `IntegrityGate`.
///
/// Armed means execution is not currently blocked by a disarm/halt
/// decision from the integrity engine.
#[derive(Clone)]
pub struct IntegrityAdapter(pub Arc<RwLock<IntegrityState>>);

impl IntegrityAdapter {
    pub fn new(state: IntegrityState) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    pub fn state(&self) -> Arc<RwLock<IntegrityState>> {
        self.0.clone()
    }
}

impl IntegrityGate for IntegrityAdapter {
    fn is_armed(&self) -> bool {
        let guard = self.0.read().expect("integrity state lock poisoned");
        !guard.is_execution_blocked()
    }
}

/// Bridges `bd_risk::RiskState` to `RiskGate`.
///
/// Allowed means neither a sticky halt nor a kill-switch disarm is in
/// effect. Limit checks themselves (`max_notional`, daily loss, etc.) run
/// per-order inside the Trading Controller before an order ever reaches
/// the outbox; this gate only covers the terminal halted/disarmed state.
#[derive(Clone)]
pub struct RiskAdapter(pub Arc<RwLock<RiskState>>);

impl RiskAdapter {
    pub fn new(state: RiskState) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    pub fn state(&self) -> Arc<RwLock<RiskState>> {
        self.0.clone()
    }
}

impl RiskGate for RiskAdapter {
    fn is_allowed(&self) -> bool {
        let guard = self.0.read().expect("risk state lock poisoned");
        !guard.halted && !guard.disarmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_adapter_reflects_execution_block() {
        let adapter = IntegrityAdapter::new(IntegrityState::new());
        assert!(adapter.is_armed());
    }

    #[test]
    fn risk_adapter_blocks_when_halted() {
        let mut state = RiskState::new(1, 100_000_000, 0);
        let adapter = RiskAdapter::new(state.clone());
        assert!(adapter.is_allowed());

        state.halted = true;
        *adapter.0.write().unwrap() = state;
        assert!(!adapter.is_allowed());
    }
}

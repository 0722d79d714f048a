//! Runtime orchestration: wires the ingest, inference, labeler, and
//! calibration loops together, dispatches the outbox through the broker
//! gateway choke-point, and owns cooperative shutdown.
//!
//! This crate is the only production caller of `bd_db`'s `runtime-claim`
//! outbox batch API and `bd_execution`'s `runtime-boundary` `wiring`
//! module — every other crate either goes through here or stays
//! offline/test-only (`bd-testkit`'s own orchestrator is the deterministic
//! in-process twin used by scenario tests).

pub mod config;
pub mod dispatcher;
pub mod gates;
pub mod orchestrator;

pub use dispatcher::{dispatch_once, DispatchOutcome};
pub use gates::{IntegrityAdapter, RiskAdapter};
pub use orchestrator::{Runtime, RuntimeConfig, RuntimeHandles};

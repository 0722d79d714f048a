//! Inference Auto-Loop: the periodic tick that turns a closed bar into
//! a scored, logged, and (threshold-gated) signaled prediction.

pub mod auto_loop;
pub mod batch;
pub mod types;

pub use auto_loop::{InferenceLoop, PREDICT_TIMEOUT};
pub use batch::{spawn_flusher, BatchHandle, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_MS};
pub use types::{BottomSignalCandidate, NullSignalSink, SignalSink, TickOutcome, TickStatus};

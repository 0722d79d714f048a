//! Settings & Scheduler: a DB-backed typed KV store with write-through
//! apply hooks, plus the scheduler that owns every periodic loop's timer.

pub mod keys;
pub mod scheduler;
pub mod store;

pub use scheduler::spawn_loop;
pub use store::{SettingChanged, SettingsStore};

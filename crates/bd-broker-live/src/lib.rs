//! Live exchange adapter: REST order routing + websocket kline stream.
//!
//! This crate supplies the two concrete implementations the rest of the
//! workspace only knows about through traits:
//! - [`rest::LiveBroker`] implements `bd_execution::BrokerAdapter` over a
//!   blocking REST client (submit/cancel/replace).
//! - [`ws::BinanceKlineStream`] implements `bd_ingest::realtime::KlineStream`
//!   over a Binance-style combined kline websocket stream.
//!
//! Neither module talks to the other; `bd-runtime` wires both into the
//! loops that use them.

pub mod rest;
pub mod ws;

pub use rest::{LiveBroker, LiveBrokerConfig};
pub use ws::BinanceKlineStream;

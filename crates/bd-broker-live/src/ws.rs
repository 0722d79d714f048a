//! Binance-style combined kline websocket stream.
//!
//! Implements `bd_ingest::realtime::KlineStream`. Each message on the
//! stream carries one kline update; `x: false` is an in-progress update
//! (emitted as a [`Tick`] at the kline's current close price so the
//! shared `Ingestor` partial-bar logic in `bd-ingest` stays the single
//! owner of coalescing), `x: true` is the closing update (emitted
//! directly as `StreamEvent::Close`, since Binance already hands us the
//! final OHLCV for the interval).

use bd_ingest::normalizer::price_to_micros;
use bd_ingest::realtime::{KlineStream, StreamEvent, Tick};
use bd_schemas::Bar;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

#[derive(Deserialize)]
struct CombinedEnvelope {
    data: KlineEvent,
}

#[derive(Deserialize)]
struct KlineEvent {
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time_ms: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "n")]
    trade_count: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "x")]
    is_final: bool,
}

fn interval_ms(code: &str) -> i64 {
    match code {
        "1m" => 60_000,
        "3m" => 180_000,
        "5m" => 300_000,
        "15m" => 900_000,
        "30m" => 1_800_000,
        "1h" => 3_600_000,
        "4h" => 14_400_000,
        "1d" => 86_400_000,
        _ => 60_000,
    }
}

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Live websocket `KlineStream` against a Binance-compatible combined
/// kline endpoint (`wss://.../stream?streams=<symbol>@kline_<interval>`).
pub struct BinanceKlineStream {
    url: String,
    symbol: String,
    socket: Option<Socket>,
}

impl BinanceKlineStream {
    pub fn new(url: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            symbol: symbol.into(),
            socket: None,
        }
    }

    fn parse(&self, text: &str) -> anyhow::Result<StreamEvent> {
        let envelope: CombinedEnvelope = serde_json::from_str(text)?;
        let k = envelope.data.kline;

        if k.is_final {
            let bar = Bar {
                open_time_ms: k.open_time_ms,
                close_time_ms: k.open_time_ms + interval_ms(&k.interval) - 1,
                interval_ms: interval_ms(&k.interval),
                open_micros: price_to_micros(&k.open, "open")?,
                high_micros: price_to_micros(&k.high, "high")?,
                low_micros: price_to_micros(&k.low, "low")?,
                close_micros: price_to_micros(&k.close, "close")?,
                volume_micros: price_to_micros(&k.volume, "volume")?,
                trade_count: k.trade_count,
                is_closed: true,
            };
            Ok(StreamEvent::Close(bar))
        } else {
            let close_micros = price_to_micros(&k.close, "close")?;
            Ok(StreamEvent::Tick(Tick {
                symbol: self.symbol.clone(),
                ts_ms: k.open_time_ms,
                price_micros: close_micros,
                size: 0,
            }))
        }
    }
}

#[async_trait::async_trait]
impl KlineStream for BinanceKlineStream {
    async fn next_event(&mut self) -> anyhow::Result<StreamEvent> {
        let socket = match self.socket.as_mut() {
            Some(s) => s,
            None => {
                self.reconnect().await?;
                self.socket.as_mut().expect("just reconnected")
            }
        };

        match socket.next().await {
            Some(Ok(Message::Text(text))) => self.parse(&text),
            Some(Ok(Message::Ping(payload))) => {
                socket.send(Message::Pong(payload)).await?;
                // A ping carries no kline data; recurse for the next real message.
                // async-trait already boxes this method's future, so the
                // recursive call doesn't blow up the future's size.
                self.next_event().await
            }
            Some(Ok(_)) => self.next_event().await,
            Some(Err(_)) | None => {
                self.socket = None;
                Ok(StreamEvent::Disconnected)
            }
        }
    }

    async fn reconnect(&mut self) -> anyhow::Result<()> {
        let (stream, _response) = tokio_tungstenite::connect_async(&self.url).await?;
        self.socket = Some(stream);
        Ok(())
    }
}

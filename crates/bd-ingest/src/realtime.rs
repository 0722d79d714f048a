//! Realtime OHLCV ingestion: partial-bar accumulation, bar close
//! persistence, gap detection/repair, and the reconnect/backoff loop that
//! drives a [`KlineStream`].
//!
//! This module does **not** implement a concrete exchange transport; the
//! [`KlineStream`] trait is the seam a websocket (or any other push
//! source) plugs into. Everything here is pure state-machine logic plus
//! `bd-db` writes, so it is exercised directly in tests without a live
//! socket.

use std::time::Duration;

use anyhow::{Context, Result};
use bd_schemas::Bar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::PgPool;
use tokio::sync::watch;

use crate::HistoricalProvider;

/// Force a synthetic close when a partial bar has lived longer than
/// `interval + WATCHDOG_GRACE_MS` without a real close event.
pub const WATCHDOG_GRACE_MS: i64 = 2_000;

/// Emit `partial_update` no more often than this many milliseconds.
pub const DEFAULT_PARTIAL_MIN_PERIOD_MS: i64 = 500;

// ---------------------------------------------------------------------------
// Ticks and the partial bucket
// ---------------------------------------------------------------------------

/// A single trade/quote update from the exchange stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub ts_ms: i64,
    pub price_micros: i64,
    pub size: i64,
}

/// In-memory accumulator for the currently-open bar of one
/// `(symbol, interval)` series. Owned by the [`Ingestor`]; readers get a
/// copy via [`Ingestor::partial_snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct PartialBarBucket {
    pub symbol: String,
    pub interval_ms: i64,
    pub open_time_ms: i64,
    pub open_micros: i64,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub volume_micros: i64,
    pub trade_count: i64,
}

impl PartialBarBucket {
    fn open(symbol: &str, interval_ms: i64, open_time_ms: i64, tick: &Tick) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval_ms,
            open_time_ms,
            open_micros: tick.price_micros,
            high_micros: tick.price_micros,
            low_micros: tick.price_micros,
            close_micros: tick.price_micros,
            volume_micros: tick.price_micros.saturating_mul(tick.size),
            trade_count: 1,
        }
    }

    fn merge(&mut self, tick: &Tick) {
        self.high_micros = self.high_micros.max(tick.price_micros);
        self.low_micros = self.low_micros.min(tick.price_micros);
        self.close_micros = tick.price_micros;
        self.volume_micros = self.volume_micros.saturating_add(tick.price_micros.saturating_mul(tick.size));
        self.trade_count += 1;
    }

    /// Materialize into a [`Bar`] at the series' close boundary.
    pub fn to_bar(&self, is_closed: bool) -> Bar {
        Bar {
            open_time_ms: self.open_time_ms,
            close_time_ms: self.open_time_ms + self.interval_ms - 1,
            interval_ms: self.interval_ms,
            open_micros: self.open_micros,
            high_micros: self.high_micros,
            low_micros: self.low_micros,
            close_micros: self.close_micros,
            volume_micros: self.volume_micros,
            trade_count: self.trade_count,
            is_closed,
        }
    }
}

fn bucket_open_time(ts_ms: i64, interval_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(interval_ms)
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Outcome of feeding one tick to the ingestor.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No event: either the bucket just opened and this is its first tick,
    /// or the coalescing window hasn't elapsed since the last emission.
    Coalesced,
    /// `partial_update`: the latest snapshot of the open bucket.
    PartialUpdate(PartialBarBucket),
}

/// Outcome of persisting a closed bar.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseOutcome {
    pub bar: Bar,
    /// `now - (open_time + interval)`, per the ordering contract.
    pub latency_ms: i64,
    /// `false` when the row already held identical content (replay, no
    /// event should be re-emitted downstream).
    pub changed: bool,
}

/// A bar force-closed by the watchdog because no real close arrived in
/// time.
#[derive(Debug, Clone, PartialEq)]
pub struct ForcedClose {
    pub bar: Bar,
    pub warning: String,
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

/// Owns the partial-bar bucket and the bookkeeping needed to implement
/// `onTick` / `onClose` / `watchdog` for one `(symbol, interval)` series.
pub struct Ingestor {
    symbol: String,
    interval_ms: i64,
    partial_min_period_ms: i64,
    partial: Option<PartialBarBucket>,
    last_emit_ms: i64,
}

impl Ingestor {
    pub fn new(symbol: impl Into<String>, interval_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            interval_ms,
            partial_min_period_ms: DEFAULT_PARTIAL_MIN_PERIOD_MS,
            partial: None,
            last_emit_ms: i64::MIN,
        }
    }

    pub fn with_partial_min_period_ms(mut self, ms: i64) -> Self {
        self.partial_min_period_ms = ms;
        self
    }

    /// Copy of the currently open bucket, if any.
    pub fn partial_snapshot(&self) -> Option<PartialBarBucket> {
        self.partial.clone()
    }

    /// Merge `tick` into the bucket for its `open_time`, rolling to a new
    /// bucket if the tick belongs to a later window than the one
    /// currently open (the previous bucket is dropped — a real `onClose`
    /// should have already persisted it before the next window's first
    /// tick arrives in a well-behaved stream).
    pub fn on_tick(&mut self, tick: Tick, now_ms: i64) -> TickOutcome {
        let open_time_ms = bucket_open_time(tick.ts_ms, self.interval_ms);

        match &mut self.partial {
            Some(bucket) if bucket.open_time_ms == open_time_ms => bucket.merge(&tick),
            _ => {
                self.partial = Some(PartialBarBucket::open(&self.symbol, self.interval_ms, open_time_ms, &tick));
                self.last_emit_ms = i64::MIN;
            }
        }

        if now_ms - self.last_emit_ms < self.partial_min_period_ms {
            return TickOutcome::Coalesced;
        }
        self.last_emit_ms = now_ms;
        TickOutcome::PartialUpdate(self.partial.clone().expect("just inserted"))
    }

    /// Persist a closed bar. Idempotent per [`bd_db::core::upsert_bar`]'s
    /// conditional-update rule: replaying identical content does not
    /// change the row, and `changed` reports that so callers skip
    /// re-emitting `partial_close`/`append` for a no-op replay.
    pub async fn on_close(&mut self, pool: &PgPool, bar: Bar, now_ms: i64) -> Result<CloseOutcome> {
        let row = bd_db::core::BarRow {
            symbol: self.symbol.clone(),
            interval_ms: bar.interval_ms,
            open_time_ms: bar.open_time_ms,
            close_time_ms: bar.close_time_ms,
            open_micros: bar.open_micros,
            high_micros: bar.high_micros,
            low_micros: bar.low_micros,
            close_micros: bar.close_micros,
            volume_micros: bar.volume_micros,
            trade_count: bar.trade_count,
            is_closed: true,
        };
        let changed = bd_db::core::upsert_bar(pool, &row).await.context("onClose upsert failed")?;

        if self.partial.as_ref().is_some_and(|p| p.open_time_ms == bar.open_time_ms) {
            self.partial = None;
        }

        let latency_ms = now_ms - (bar.open_time_ms + bar.interval_ms);
        Ok(CloseOutcome {
            bar: Bar { is_closed: true, ..bar },
            latency_ms,
            changed,
        })
    }

    /// If a partial bucket has outlived `interval + WATCHDOG_GRACE_MS`
    /// without a real close, force one using the last known values and
    /// clear the bucket. Returns `None` if nothing is overdue.
    pub fn watchdog(&mut self, now_ms: i64) -> Option<ForcedClose> {
        let bucket = self.partial.as_ref()?;
        let deadline = bucket.open_time_ms + bucket.interval_ms + WATCHDOG_GRACE_MS;
        if now_ms < deadline {
            return None;
        }
        let bar = bucket.to_bar(true);
        self.partial = None;
        Some(ForcedClose {
            warning: format!(
                "forced_close symbol={} open_time_ms={} overdue_ms={}",
                bar.open_time_ms,
                bar.open_time_ms,
                now_ms - deadline + WATCHDOG_GRACE_MS
            ),
            bar,
        })
    }
}

// ---------------------------------------------------------------------------
// Gap detection and repair
// ---------------------------------------------------------------------------

/// Scan the latest `lookback` closed bars for missing `open_time`s and
/// record a gap segment per contiguous run of absent slots.
pub async fn detect_gaps(
    pool: &PgPool,
    symbol: &str,
    interval_ms: i64,
    lookback: i64,
) -> Result<Vec<bd_db::core::GapSegmentRow>> {
    let bars = bd_db::core::fetch_latest_bars(pool, symbol, interval_ms, lookback).await?;
    if bars.len() < 2 {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for window in bars.windows(2) {
        let prev = &window[0];
        let next = &window[1];
        let delta = next.open_time_ms - prev.open_time_ms;
        if delta > interval_ms {
            let missing = delta / interval_ms - 1;
            bd_db::core::insert_gap_segment(
                pool,
                symbol,
                interval_ms,
                prev.open_time_ms + interval_ms,
                next.open_time_ms - interval_ms,
                missing,
            )
            .await?;
            found.push((prev.open_time_ms + interval_ms, next.open_time_ms - interval_ms));
        }
    }

    let open = bd_db::core::list_open_gaps(pool, symbol, interval_ms).await?;
    Ok(open
        .into_iter()
        .filter(|seg| found.iter().any(|(from, to)| seg.from_ts_ms == *from && seg.to_ts_ms == *to))
        .collect())
}

/// Fetch the missing range from `provider` and apply it as `repair`
/// writes. Closes the segment only once every slot in
/// `[from_ts_ms, to_ts_ms]` has a row.
pub async fn repair_gap(
    pool: &PgPool,
    seg: &bd_db::core::GapSegmentRow,
    provider: &dyn HistoricalProvider,
    timeframe: crate::Timeframe,
) -> Result<bool> {
    let start = chrono::DateTime::from_timestamp(seg.from_ts_ms / 1000, 0)
        .context("invalid from_ts_ms")?
        .date_naive();
    let end = chrono::DateTime::from_timestamp(seg.to_ts_ms / 1000, 0)
        .context("invalid to_ts_ms")?
        .date_naive();

    let bars = provider
        .fetch_bars(crate::FetchBarsRequest {
            symbols: vec![seg.symbol.clone()],
            timeframe,
            start,
            end,
        })
        .await
        .context("repair_gap fetch failed")?;

    for bar in &bars {
        let normalized = crate::normalizer::normalize(&crate::provider::RawBar {
            symbol: bar.symbol.clone(),
            timeframe: bar.timeframe.clone(),
            end_ts: bar.end_ts,
            open: bar.open.clone(),
            high: bar.high.clone(),
            low: bar.low.clone(),
            close: bar.close.clone(),
            volume: bar.volume,
            is_complete: bar.is_complete,
        })?;
        let open_time_ms = normalized.end_ts * 1000 - seg.interval_ms + 1;
        bd_db::core::upsert_bar(
            pool,
            &bd_db::core::BarRow {
                symbol: normalized.symbol.clone(),
                interval_ms: seg.interval_ms,
                open_time_ms,
                close_time_ms: normalized.end_ts * 1000,
                open_micros: normalized.open_micros,
                high_micros: normalized.high_micros,
                low_micros: normalized.low_micros,
                close_micros: normalized.close_micros,
                volume_micros: normalized.volume,
                trade_count: 0,
                is_closed: true,
            },
        )
        .await?;
    }

    let stored = bd_db::core::fetch_bars_range(pool, &seg.symbol, seg.interval_ms, seg.from_ts_ms, seg.to_ts_ms).await?;
    let expected_slots = (seg.to_ts_ms - seg.from_ts_ms) / seg.interval_ms + 1;
    let fully_filled = stored.len() as i64 >= expected_slots;

    if fully_filled {
        bd_db::core::set_gap_state(pool, seg.id, "closed").await?;
    } else {
        bd_db::core::set_gap_state(pool, seg.id, "repairing").await?;
    }
    Ok(fully_filled)
}

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

/// Exponential backoff with bounded jitter, seeded explicitly so retries
/// are reproducible in tests rather than drawing from global `rand`
/// state.
pub struct ReconnectBackoff {
    base_ms: u64,
    cap_ms: u64,
    jitter_max_ms: u64,
    attempt: u32,
    rng: StdRng,
}

impl ReconnectBackoff {
    pub fn new(seed: u64) -> Self {
        Self {
            base_ms: 1_500,
            cap_ms: 60_000,
            jitter_max_ms: 250,
            attempt: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Delay before the next reconnect attempt; grows exponentially from
    /// `base_ms`, capped at `cap_ms`, plus up to `jitter_max_ms` of extra
    /// jitter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base_ms.saturating_mul(1u64 << self.attempt.min(20));
        let capped = exp.min(self.cap_ms);
        let jitter = self.rng.gen_range(0..=self.jitter_max_ms);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(capped + jitter)
    }

    /// Reset after a successful reconnect so the next drop starts cold.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

// ---------------------------------------------------------------------------
// Stream seam
// ---------------------------------------------------------------------------

/// One event coming off an exchange push feed.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Tick(Tick),
    Close(Bar),
    /// The transport dropped; the driver loop should back off and call
    /// `reconnect`.
    Disconnected,
}

/// Pluggable push-source seam. A concrete websocket transport implements
/// this; tests and the driver loop only depend on the trait.
#[async_trait::async_trait]
pub trait KlineStream: Send {
    /// Blocks until the next event or the transport drops.
    async fn next_event(&mut self) -> Result<StreamEvent>;

    /// Re-establish the transport. Called by the driver loop after
    /// `Disconnected`, following the backoff delay.
    async fn reconnect(&mut self) -> Result<()>;
}

/// Drives one `KlineStream` to completion (until shutdown), feeding
/// events to `ingestor` and persisting closes via `pool`. Reconnects with
/// [`ReconnectBackoff`] on `Disconnected` / transport errors.
pub async fn run_stream(
    mut stream: Box<dyn KlineStream>,
    ingestor: &mut Ingestor,
    pool: &PgPool,
    mut backoff: ReconnectBackoff,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            event = stream.next_event() => {
                match event {
                    Ok(StreamEvent::Tick(tick)) => {
                        ingestor.on_tick(tick, now_ms);
                    }
                    Ok(StreamEvent::Close(bar)) => {
                        ingestor.on_close(pool, bar, now_ms).await?;
                        backoff.reset();
                    }
                    Ok(StreamEvent::Disconnected) | Err(_) => {
                        let delay = backoff.next_delay();
                        tokio::time::sleep(delay).await;
                        stream.reconnect().await?;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

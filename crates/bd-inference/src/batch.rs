//! Bounded batching queue for inference log writes.
//!
//! Grounded on `mqk-daemon`'s broadcast-bus task shape, narrowed to a
//! single `mpsc` producer/consumer: the auto-loop tick enqueues rows
//! without blocking on the DB, and a background flusher drains the
//! queue whenever it fills to `batch_size` or `flush_interval` elapses,
//! whichever comes first.

use std::time::Duration;

use bd_db::core::{self as db, NewInferenceLog};
use sqlx::PgPool;
use tokio::sync::mpsc;

pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
/// Grace period given to a final flush on shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Handle held by the tick loop; cloneable, cheap.
#[derive(Clone)]
pub struct BatchHandle {
    tx: mpsc::Sender<NewInferenceLog>,
}

impl BatchHandle {
    /// Enqueues a row without blocking. Drops and logs on a full channel
    /// rather than stalling the inference tick — a lost log row is a
    /// degraded-but-safe outcome, a stalled tick is not.
    pub fn enqueue(&self, row: NewInferenceLog) {
        if let Err(err) = self.tx.try_send(row) {
            tracing::warn!(target: "inference", %err, "inference log queue full, dropping row");
        }
    }
}

/// Spawns the flusher task and returns a handle plus its join handle.
/// `shutdown` fires a best-effort final flush (bounded by
/// [`SHUTDOWN_GRACE`]) before the task exits.
pub fn spawn_flusher(
    pool: PgPool,
    batch_size: usize,
    flush_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> (BatchHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<NewInferenceLog>(batch_size * 4);

    let handle = tokio::spawn(async move {
        let mut buf: Vec<NewInferenceLog> = Vec::with_capacity(batch_size);
        loop {
            tokio::select! {
                maybe_row = rx.recv() => {
                    match maybe_row {
                        Some(row) => {
                            buf.push(row);
                            if buf.len() >= batch_size {
                                flush(&pool, &mut buf).await;
                            }
                        }
                        None => {
                            flush(&pool, &mut buf).await;
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep(flush_interval) => {
                    flush(&pool, &mut buf).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = tokio::time::timeout(SHUTDOWN_GRACE, drain(&pool, &mut rx, &mut buf)).await;
                        return;
                    }
                }
            }
        }
    });

    (BatchHandle { tx }, handle)
}

async fn drain(
    pool: &PgPool,
    rx: &mut mpsc::Receiver<NewInferenceLog>,
    buf: &mut Vec<NewInferenceLog>,
) {
    while let Ok(row) = rx.try_recv() {
        buf.push(row);
    }
    flush(pool, buf).await;
}

async fn flush(pool: &PgPool, buf: &mut Vec<NewInferenceLog>) {
    if buf.is_empty() {
        return;
    }
    for row in buf.drain(..) {
        if let Err(err) = db::insert_inference_log(pool, &row).await {
            tracing::error!(target: "inference", %err, "failed to persist inference log row");
        }
    }
}

//! The scheduler owns one periodic task per loop (Ingestor, Inference,
//! Labeler, Calibration, Risk). Ticks are non-reentrant: a tick still
//! running when the next timer fires is skipped rather than queued,
//! because letting two ticks of the same loop overlap would double up
//! its single-writer DB work.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Spawns a loop that calls `interval_secs` before every sleep (so a
/// settings change takes effect on the very next tick boundary) and
/// `tick` on each fire, skipping the fire entirely if the previous
/// invocation of `tick` hasn't returned yet.
pub fn spawn_loop<F, Fut, I, IFut>(
    name: &'static str,
    interval_secs: I,
    tick: F,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    I: Fn() -> IFut + Send + Sync + 'static,
    IFut: Future<Output = u64> + Send + 'static,
{
    let in_flight = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        loop {
            let secs = interval_secs().await.max(1);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(target: "scheduler", loop_name = name, "shutdown signal received, exiting");
                        return;
                    }
                }
            }

            if *shutdown.borrow() {
                return;
            }

            if in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                tracing::warn!(target: "scheduler", loop_name = name, "tick skipped: previous tick still in flight");
                continue;
            }

            let flight = in_flight.clone();
            tick().await;
            flight.store(false, Ordering::Release);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn skips_reentrant_tick_when_previous_still_running() {
        let runs = Arc::new(AtomicU64::new(0));
        let runs2 = runs.clone();

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let handle = spawn_loop(
            "test",
            || async { 1u64 },
            move || {
                let runs2 = runs2.clone();
                async move {
                    runs2.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
            },
            shutdown_rx,
        );

        tokio::time::advance(Duration::from_secs(25)).await;
        let _ = shutdown_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        // With a 10s tick body and a 1s interval, only the first tick should
        // have started within the 25s window before the long tick returns.
        assert!(runs.load(Ordering::SeqCst) <= 3);
    }
}

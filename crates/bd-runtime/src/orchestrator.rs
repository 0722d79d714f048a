//! Owns the Trading Controller's state and wires every automatic loop
//! (inference, labeler, calibration) through `bd_settings::spawn_loop` —
//! the piece this crate's own module doc comment already promised and
//! `bd-daemon`'s HTTP surface never needed, since the daemon only serves
//! manual/eager endpoints.
//!
//! `ControllerSink` bridges `bd_inference::SignalSink`'s synchronous
//! `emit` into the async outbox write the Trading Controller needs,
//! mirroring `bd_inference::batch`'s bounded-queue-plus-background-task
//! split. A second `spawn_loop` drives `bd_execution::on_bar` per
//! tracked symbol so trailing stops/time stops/partials keep moving
//! between candidates, not just when a new bottom decision arrives.

use std::sync::{Arc, Mutex};

use bd_execution::{on_bar, on_candidate, on_fill, BarUpdate, ControllerState, OrderIntent, Side};
use bd_inference::{spawn_flusher, BatchHandle, BottomSignalCandidate, InferenceLoop, SignalSink};
use bd_risk::{evaluate as risk_evaluate, PdtContext, RequestKind, RiskAction, RiskInput, RiskState};
use bd_settings::{spawn_loop, SettingsStore};
use sqlx::PgPool;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{controller_config_from_settings, risk_config_from_settings};

/// One symbol/interval the runtime drives inference and the Trading
/// Controller for.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub family: String,
    pub symbol: String,
    pub interval_ms: i64,
    pub dispatcher_run_id: Uuid,
}

/// Join handles for every task `Runtime::start` spawns, plus the
/// shutdown sender driving all of them. Dropping this without calling
/// [`RuntimeHandles::shutdown`] leaves the tasks running until the
/// process exits — callers own an explicit shutdown the same way
/// `bd_inference::spawn_flusher`'s caller does.
pub struct RuntimeHandles {
    shutdown_tx: watch::Sender<bool>,
    inference: JoinHandle<()>,
    bar_maintenance: JoinHandle<()>,
    controller_consumer: JoinHandle<()>,
    flusher: JoinHandle<()>,
    labeler: JoinHandle<()>,
    calibration: JoinHandle<()>,
}

impl RuntimeHandles {
    /// Signals every spawned loop to exit and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = tokio::join!(
            self.inference,
            self.bar_maintenance,
            self.controller_consumer,
            self.flusher,
            self.labeler,
            self.calibration,
        );
    }
}

/// Bridges a candidate emitted by `InferenceLoop::tick` into a bounded
/// channel so `SignalSink::emit` (synchronous, called inline from the
/// tick) never blocks on the Trading Controller's DB writes.
pub struct ControllerSink {
    tx: mpsc::Sender<BottomSignalCandidate>,
}

impl SignalSink for ControllerSink {
    fn emit(&self, candidate: BottomSignalCandidate) {
        if let Err(err) = self.tx.try_send(candidate) {
            tracing::warn!(target: "runtime", %err, "controller candidate queue full, dropping signal");
        }
    }
}

fn day_id_from_ms(ms: i64) -> u32 {
    (ms / 86_400_000) as u32
}

fn intent_to_broker_submit_request(intent: &OrderIntent) -> bd_execution::BrokerSubmitRequest {
    bd_execution::BrokerSubmitRequest {
        order_id: format!("controller-{}", Uuid::new_v4()),
        symbol: intent.symbol.clone(),
        quantity: match intent.side {
            Side::Buy => intent.qty as i32,
            Side::Sell => -(intent.qty as i32),
        },
        order_type: "market".to_string(),
        limit_price: None,
        time_in_force: "day".to_string(),
    }
}

/// Enqueues every intent produced by an `on_candidate`/`on_bar` call.
/// `dispatcher::dispatch_once` is the only production reader of this
/// row (RT-1) — the controller never calls a broker adapter directly.
async fn enqueue_intents(pool: &PgPool, run_id: Uuid, intents: &[OrderIntent]) {
    for intent in intents {
        let req = intent_to_broker_submit_request(intent);
        let order_json = match serde_json::to_value(&req) {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(target: "runtime", %err, "failed to encode controller order intent");
                continue;
            }
        };
        if let Err(err) = bd_db::outbox_enqueue(pool, run_id, &req.order_id, order_json).await {
            tracing::error!(target: "runtime", %err, symbol = %intent.symbol, "failed to enqueue controller order");
        }
    }
}

/// A new entry's risk budget check (spec §4.11): exposure and ATR-stop
/// guards, evaluated against the session's running `RiskState`. Equity
/// tracking isn't wired to a live portfolio feed yet (see DESIGN.md), so
/// `equity_micros` stays at 0 — harmless for these two guards, since
/// daily-loss/drawdown only fire once a nonzero limit times against a
/// real equity curve.
fn entry_risk_budget_ok(
    risk_cfg: &bd_risk::RiskConfig,
    risk_state: &mut RiskState,
    day_id: u32,
    notional_micros: i64,
    atr_micros: Option<i64>,
    stop_distance_micros: Option<i64>,
) -> bool {
    let decision = risk_evaluate(
        risk_cfg,
        risk_state,
        &RiskInput {
            day_id,
            equity_micros: 0,
            reject_window_id: 0,
            request: RequestKind::NewOrder,
            is_risk_reducing: false,
            pdt: PdtContext::ok(),
            kill_switch: None,
            notional_micros,
            stop_distance_micros,
            atr_micros,
        },
    );
    matches!(decision.action, RiskAction::Allow)
}

async fn handle_candidate(
    pool: &PgPool,
    settings: &SettingsStore,
    controller_state: &Mutex<ControllerState>,
    risk_state: &Mutex<RiskState>,
    run_id: Uuid,
    candidate: BottomSignalCandidate,
) {
    let cfg = controller_config_from_settings(settings, candidate.interval_ms).await;
    if !cfg.enabled {
        return;
    }
    let risk_cfg = risk_config_from_settings(settings).await;
    let day_id = day_id_from_ms(candidate.feature_close_time_ms);
    let notional_micros = candidate.price_micros.saturating_mul(cfg.entry.base_size.max(0));

    let risk_budget_ok = {
        let mut rs = risk_state.lock().expect("risk state lock poisoned");
        entry_risk_budget_ok(&risk_cfg, &mut rs, day_id, notional_micros, candidate.atr_micros, None)
    };

    let decision = {
        let mut cs = controller_state.lock().expect("controller state lock poisoned");
        on_candidate(
            &cfg,
            &mut cs,
            &candidate.symbol,
            day_id,
            candidate.price_micros,
            true,
            risk_budget_ok,
        )
    };

    enqueue_intents(pool, run_id, &decision.intents).await;
}

fn spawn_controller_consumer(
    pool: PgPool,
    settings: Arc<SettingsStore>,
    controller_state: Arc<Mutex<ControllerState>>,
    risk_state: Arc<Mutex<RiskState>>,
    run_id: Uuid,
    mut shutdown: watch::Receiver<bool>,
) -> (ControllerSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<BottomSignalCandidate>(256);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_candidate = rx.recv() => {
                    match maybe_candidate {
                        Some(candidate) => {
                            handle_candidate(&pool, &settings, &controller_state, &risk_state, run_id, candidate).await;
                        }
                        None => return,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });

    (ControllerSink { tx }, handle)
}

/// Per-bar maintenance tick (spec §4.10 exit policy): fetches the
/// symbol's latest bar + `atr_14`, drives `on_bar`, and resolves any
/// resulting exit immediately via `on_fill` at the same bar's close —
/// the runtime has no live fill-confirmation channel from the broker
/// yet, so this tick treats the outbox enqueue as the fill (documented
/// simplification, see DESIGN.md).
async fn bar_maintenance_tick(
    pool: &PgPool,
    features: &bd_features::FeatureEngine,
    settings: &SettingsStore,
    controller_state: &Mutex<ControllerState>,
    run_id: Uuid,
    symbol: &str,
    interval_ms: i64,
) {
    let cfg = controller_config_from_settings(settings, interval_ms).await;
    if !cfg.enabled {
        return;
    }

    let snapshot = match features.compute_latest(symbol, interval_ms).await {
        Ok(s) => s,
        Err(_) => return,
    };
    let close_micros = match features.latest_close_micros(symbol, interval_ms).await {
        Ok(p) => p,
        Err(_) => return,
    };
    let atr_micros = snapshot
        .features
        .get("atr_14")
        .map(|atr| (*atr * bd_schemas::MICROS_SCALE as f64).round() as i64);
    let day_id = day_id_from_ms(snapshot.close_time_ms);

    let bar = BarUpdate {
        symbol: symbol.to_string(),
        day_id,
        high_micros: close_micros,
        low_micros: close_micros,
        close_micros,
        short_ma_micros: snapshot
            .features
            .get("sma_20")
            .map(|v| (*v * bd_schemas::MICROS_SCALE as f64).round() as i64),
        atr_micros,
    };

    let decision = {
        let mut cs = controller_state.lock().expect("controller state lock poisoned");
        on_bar(&cfg, &mut cs, &bar)
    };
    enqueue_intents(pool, run_id, &decision.intents).await;

    let exited = decision
        .events
        .iter()
        .any(|e| matches!(e, bd_execution::ControllerEvent::ExitSubmitted(_)));
    if exited {
        let fill_decision = {
            let mut cs = controller_state.lock().expect("controller state lock poisoned");
            on_fill(&cfg, &mut cs, symbol, close_micros)
        };
        enqueue_intents(pool, run_id, &fill_decision.intents).await;
    }
}

/// Production runtime: spawns the inference auto-loop, the Trading
/// Controller's candidate consumer and bar-maintenance loop, the
/// labeler loop, and the calibration monitor loop, all scheduled through
/// `bd_settings::spawn_loop` so every loop reacts to settings changes on
/// its own next tick boundary.
pub struct Runtime {
    handles: Option<RuntimeHandles>,
}

impl Runtime {
    pub fn start(pool: PgPool, settings: Arc<SettingsStore>, cfg: RuntimeConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (batch, flusher): (BatchHandle, JoinHandle<()>) = spawn_flusher(
            pool.clone(),
            bd_inference::batch::DEFAULT_BATCH_SIZE,
            std::time::Duration::from_millis(bd_inference::batch::DEFAULT_FLUSH_INTERVAL_MS),
            shutdown_rx.clone(),
        );

        let controller_state = Arc::new(Mutex::new(ControllerState::new()));
        let risk_state = Arc::new(Mutex::new(RiskState::new(0, 0, 0)));

        let (sink, controller_consumer) = spawn_controller_consumer(
            pool.clone(),
            settings.clone(),
            controller_state.clone(),
            risk_state.clone(),
            cfg.dispatcher_run_id,
            shutdown_rx.clone(),
        );

        let features = bd_features::FeatureEngine::new(pool.clone());
        let inference_loop = Arc::new(InferenceLoop::new(cfg.family.clone(), cfg.symbol.clone(), cfg.interval_ms));

        let inference = {
            let pool = pool.clone();
            let settings = settings.clone();
            let shutdown_rx = shutdown_rx.clone();
            let inference_loop = inference_loop.clone();
            let features = Arc::new(features);
            let batch = batch.clone();
            let sink: Arc<dyn SignalSink> = Arc::new(sink);

            let settings_for_interval = settings.clone();
            spawn_loop(
                "inference_auto_loop",
                move || {
                    let settings = settings_for_interval.clone();
                    async move { InferenceLoop::effective_interval_secs(&settings).await }
                },
                {
                    let pool = pool.clone();
                    let settings = settings.clone();
                    let inference_loop = inference_loop.clone();
                    let features = features.clone();
                    let batch = batch.clone();
                    let sink = sink.clone();
                    move || {
                        let pool = pool.clone();
                        let settings = settings.clone();
                        let inference_loop = inference_loop.clone();
                        let features = features.clone();
                        let batch = batch.clone();
                        let sink = sink.clone();
                        async move {
                            let _ = inference_loop
                                .tick(&pool, &features, &settings, &batch, sink.as_ref())
                                .await;
                        }
                    }
                },
                shutdown_rx,
            )
        };

        let bar_maintenance = {
            let pool = pool.clone();
            let settings = settings.clone();
            let symbol = cfg.symbol.clone();
            let interval_ms = cfg.interval_ms;
            let run_id = cfg.dispatcher_run_id;
            let controller_state = controller_state.clone();

            let settings_for_interval = settings.clone();
            spawn_loop(
                "controller_bar_maintenance",
                move || {
                    let settings = settings_for_interval.clone();
                    async move { settings.get_u64(bd_settings::keys::INFERENCE_AUTO_LOOP_INTERVAL_SEC, 10).await }
                },
                move || {
                    let pool = pool.clone();
                    let settings = settings.clone();
                    let symbol = symbol.clone();
                    let controller_state = controller_state.clone();
                    async move {
                        let features = bd_features::FeatureEngine::new(pool.clone());
                        bar_maintenance_tick(&pool, &features, &settings, &controller_state, run_id, &symbol, interval_ms).await;
                    }
                },
                shutdown_rx.clone(),
            )
        };

        let labeler = {
            let pool = pool.clone();
            let settings = settings.clone();
            let symbol = cfg.symbol.clone();
            let interval_ms = cfg.interval_ms;

            let settings_for_interval = settings.clone();
            spawn_loop(
                "labeler_auto_loop",
                move || {
                    let settings = settings_for_interval.clone();
                    async move { bd_labeler::scheduled::effective_interval_secs(&settings).await }
                },
                move || {
                    let pool = pool.clone();
                    let settings = settings.clone();
                    let symbol = symbol.clone();
                    async move {
                        if let Err(err) = bd_labeler::scheduled::tick(&pool, &settings, &symbol, interval_ms).await {
                            tracing::warn!(target: "runtime", %err, "labeler tick failed");
                        }
                    }
                },
                shutdown_rx.clone(),
            )
        };

        let calibration = {
            let pool = pool.clone();
            let settings = settings.clone();
            let symbol = cfg.symbol.clone();
            let interval_ms = cfg.interval_ms;
            let monitor = Arc::new(bd_calibration::CalibrationMonitor::new(cfg.family.clone()));

            let settings_for_interval = settings.clone();
            spawn_loop(
                "calibration_monitor_loop",
                move || {
                    let settings = settings_for_interval.clone();
                    async move { bd_calibration::CalibrationMonitor::effective_interval_secs(&settings).await }
                },
                move || {
                    let pool = pool.clone();
                    let settings = settings.clone();
                    let symbol = symbol.clone();
                    let monitor = monitor.clone();
                    async move {
                        if let Err(err) = monitor.tick(&pool, &settings, &symbol, interval_ms).await {
                            tracing::warn!(target: "runtime", %err, "calibration monitor tick failed");
                        }
                    }
                },
                shutdown_rx,
            )
        };

        Runtime {
            handles: Some(RuntimeHandles {
                shutdown_tx,
                inference,
                bar_maintenance,
                controller_consumer,
                flusher,
                labeler,
                calibration,
            }),
        }
    }

    /// Takes the handles out for an explicit `shutdown().await`. Panics
    /// if called twice.
    pub fn into_handles(mut self) -> RuntimeHandles {
        self.handles.take().expect("Runtime::into_handles called twice")
    }
}

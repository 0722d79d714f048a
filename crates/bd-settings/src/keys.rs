//! Namespaced setting keys, exhaustive per spec §6.3. Compile-time
//! constants so a typo in a key name is a build error, not a silent
//! no-op `put`.

pub const INFERENCE_AUTO_THRESHOLD: &str = "inference.auto.threshold";
pub const INFERENCE_AUTO_LOOP_INTERVAL_SEC: &str = "inference.auto.loop_interval_sec";

pub const LABELER_INTERVAL: &str = "labeler.interval";
pub const LABELER_MIN_AGE_SECONDS: &str = "labeler.min_age_seconds";
pub const LABELER_BATCH_LIMIT: &str = "labeler.batch_limit";
pub const LABELER_BOTTOM_LOOKAHEAD: &str = "labeler.bottom.lookahead";
pub const LABELER_BOTTOM_DRAWDOWN: &str = "labeler.bottom.drawdown";
pub const LABELER_BOTTOM_REBOUND: &str = "labeler.bottom.rebound";

pub const CALIBRATION_LIVE_WINDOW_SECONDS: &str = "calibration.live.window_seconds";
pub const CALIBRATION_LIVE_BINS: &str = "calibration.live.bins";
pub const CALIBRATION_EAGER_ENABLED: &str = "calibration.eager.enabled";
pub const CALIBRATION_EAGER_LIMIT: &str = "calibration.eager.limit";
pub const CALIBRATION_EAGER_MIN_AGE_SECONDS: &str = "calibration.eager.min_age_seconds";
pub const CALIBRATION_MONITOR_ECE_ABS: &str = "calibration.monitor.ece_abs";
pub const CALIBRATION_MONITOR_ECE_REL: &str = "calibration.monitor.ece_rel";
pub const CALIBRATION_MONITOR_ABS_STREAK_TRIGGER: &str = "calibration.monitor.abs_streak_trigger";
pub const CALIBRATION_MONITOR_REL_STREAK_TRIGGER: &str = "calibration.monitor.rel_streak_trigger";
pub const CALIBRATION_MONITOR_WINDOW_SECONDS: &str = "calibration.monitor.window_seconds";
pub const CALIBRATION_MONITOR_ABS_DELTA_MULTIPLIER: &str = "calibration.monitor.abs_delta_multiplier";
pub const CALIBRATION_MONITOR_RECOMMEND_COOLDOWN_SECONDS: &str =
    "calibration.monitor.recommend_cooldown_seconds";
pub const CALIBRATION_MONITOR_MIN_SAMPLES: &str = "calibration.monitor.min_samples";

pub const TRAINING_BOTTOM_MIN_LABELS: &str = "training.bottom.min_labels";
pub const TRAINING_BOTTOM_MIN_TRAIN_LABELS: &str = "training.bottom.min_train_labels";
pub const TRAINING_BOTTOM_OHLCV_FETCH_CAP: &str = "training.bottom.ohlcv_fetch_cap";

pub const PROMOTION_MIN_AUC_DELTA: &str = "promotion.min_auc_delta";
pub const PROMOTION_MAX_ECE_DELTA: &str = "promotion.max_ece_delta";
pub const PROMOTION_MIN_VAL_SAMPLES: &str = "promotion.min_val_samples";
pub const PROMOTION_COOLDOWN_SECONDS: &str = "promotion.cooldown_seconds";

pub const RISK_MAX_NOTIONAL: &str = "risk.max_notional";
pub const RISK_MAX_DAILY_LOSS: &str = "risk.max_daily_loss";
pub const RISK_MAX_DRAWDOWN: &str = "risk.max_drawdown";
pub const RISK_ATR_MULTIPLE: &str = "risk.atr_multiple";

pub const LIVE_TRADING_ENABLED: &str = "live_trading.enabled";
pub const LIVE_TRADING_COOLDOWN_SEC: &str = "live_trading.cooldown_sec";
pub const LIVE_TRADING_BASE_SIZE: &str = "live_trading.base_size";
pub const LIVE_TRADING_TRAILING_TAKE_PROFIT_PCT: &str = "live_trading.trailing_take_profit_pct";
pub const LIVE_TRADING_MAX_HOLDING_SECONDS: &str = "live_trading.max_holding_seconds";
/// The single scale-in authority (§9 Open Question resolution): no other
/// scale-in key exists, so there is nothing else to reconcile against it.
pub const LIVE_SCALE_IN_ENABLED: &str = "live_scale_in.enabled";

pub const EXIT_ENABLE_NEW_POLICY: &str = "exit.enable_new_policy";
pub const EXIT_TRAIL_MODE: &str = "exit.trail.mode";
pub const EXIT_TRAIL_MULTIPLIER: &str = "exit.trail.multiplier";
pub const EXIT_TRAIL_PERCENT: &str = "exit.trail.percent";
pub const EXIT_TIME_STOP_BARS: &str = "exit.time_stop.bars";
pub const EXIT_PARTIAL_ENABLED: &str = "exit.partial.enabled";
pub const EXIT_PARTIAL_LEVELS: &str = "exit.partial.levels";
pub const EXIT_COOLDOWN_BARS: &str = "exit.cooldown.bars";
pub const EXIT_DAILY_LOSS_CAP_R: &str = "exit.daily_loss_cap_r";
pub const EXIT_FREEZE_ON_EXIT: &str = "exit.freeze_on_exit";

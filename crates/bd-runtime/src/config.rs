//! Resolves `bd_risk::RiskConfig` and `bd_execution::ControllerConfig`
//! from `bd_settings`. Both engines stay settings-agnostic on purpose
//! (pure `evaluate`/`on_*` functions over caller-owned state), so the
//! translation from namespaced keys to their config structs lives here,
//! the same way `bd_labeler::scheduled`/`bd_calibration` read settings
//! at their own call sites rather than inside the pure engines.

use bd_execution::{ControllerConfig, EntryGateConfig, ExitPolicyConfig, PartialLevel, TrailMode};
use bd_risk::RiskConfig;
use bd_settings::{keys, SettingsStore};

const MICROS_SCALE: f64 = 1_000_000.0;

fn dollars_to_micros(v: f64) -> i64 {
    (v * MICROS_SCALE).round() as i64
}

/// Reads `risk.max_notional`, `risk.max_daily_loss`, `risk.max_drawdown`,
/// `risk.atr_multiple` (spec §4.11's four guards); everything else keeps
/// `RiskConfig::sane_defaults()`'s values since no setting key exists for
/// them yet.
pub async fn risk_config_from_settings(settings: &SettingsStore) -> RiskConfig {
    let defaults = RiskConfig::sane_defaults();
    RiskConfig {
        daily_loss_limit_micros: dollars_to_micros(
            settings.get_f64(keys::RISK_MAX_DAILY_LOSS, 0.0).await,
        ),
        max_drawdown_limit_micros: dollars_to_micros(
            settings.get_f64(keys::RISK_MAX_DRAWDOWN, 0.0).await,
        ),
        max_notional_micros: dollars_to_micros(settings.get_f64(keys::RISK_MAX_NOTIONAL, 0.0).await),
        atr_multiple_micros: dollars_to_micros(settings.get_f64(keys::RISK_ATR_MULTIPLE, 0.0).await),
        ..defaults
    }
}

#[derive(serde::Deserialize)]
struct RawPartialLevel {
    r_multiple: f64,
    fraction: f64,
}

async fn partial_levels_from_settings(settings: &SettingsStore) -> Vec<PartialLevel> {
    if !settings.get_bool(keys::EXIT_PARTIAL_ENABLED, false).await {
        return Vec::new();
    }
    let Some(raw) = settings.get(keys::EXIT_PARTIAL_LEVELS).await else {
        return Vec::new();
    };
    let Ok(levels) = serde_json::from_value::<Vec<RawPartialLevel>>(raw) else {
        tracing::warn!(target: "runtime", "exit.partial.levels is not a valid level list, ignoring");
        return Vec::new();
    };
    levels
        .into_iter()
        .map(|l| PartialLevel {
            r_multiple_micros: dollars_to_micros(l.r_multiple),
            fraction_micros: dollars_to_micros(l.fraction),
        })
        .collect()
}

/// Resolves the Trading Controller's config from `live_trading.*`,
/// `live_scale_in.enabled`, and `exit.*`. `exit.enable_new_policy` picks
/// between the legacy single-value exit fields
/// (`live_trading.trailing_take_profit_pct` / `max_holding_seconds`, no
/// partials, no cooldown) and the full policy under `exit.*`.
/// `interval_ms` converts `live_trading.max_holding_seconds` into bars
/// for the legacy time stop.
pub async fn controller_config_from_settings(settings: &SettingsStore, interval_ms: i64) -> ControllerConfig {
    let enabled = settings.get_bool(keys::LIVE_TRADING_ENABLED, false).await;
    let base_size = settings.get_u64(keys::LIVE_TRADING_BASE_SIZE, 0).await as i64;
    let scale_in_enabled = settings.get_bool(keys::LIVE_SCALE_IN_ENABLED, false).await;

    let entry = EntryGateConfig {
        base_size,
        confirm_pct_micros: None,
        confirm_above_short_ma: false,
        max_bars_pending_entry: 0,
        scale_in_enabled,
    };

    let use_new_policy = settings.get_bool(keys::EXIT_ENABLE_NEW_POLICY, false).await;

    let exit = if use_new_policy {
        let trail_mode = match settings.get_string(keys::EXIT_TRAIL_MODE, "percent").await.as_str() {
            "atr" => TrailMode::Atr,
            _ => TrailMode::Percent,
        };
        ExitPolicyConfig {
            trail_mode,
            trail_percent_micros: dollars_to_micros(settings.get_f64(keys::EXIT_TRAIL_PERCENT, 0.05).await),
            trail_atr_multiplier_micros: dollars_to_micros(
                settings.get_f64(keys::EXIT_TRAIL_MULTIPLIER, 2.0).await,
            ),
            time_stop_bars: settings.get_u64(keys::EXIT_TIME_STOP_BARS, 0).await as u32,
            partial_levels: partial_levels_from_settings(settings).await,
            cooldown_bars: settings.get_u64(keys::EXIT_COOLDOWN_BARS, 0).await as u32,
            daily_loss_cap_r_micros: dollars_to_micros(
                settings.get_f64(keys::EXIT_DAILY_LOSS_CAP_R, 0.0).await,
            ),
            freeze_on_exit: settings.get_bool(keys::EXIT_FREEZE_ON_EXIT, false).await,
        }
    } else {
        let trail_pct = settings
            .get_f64(keys::LIVE_TRADING_TRAILING_TAKE_PROFIT_PCT, 0.05)
            .await;
        let max_holding_secs = settings.get_u64(keys::LIVE_TRADING_MAX_HOLDING_SECONDS, 0).await;
        let interval_secs = (interval_ms / 1000).max(1) as u64;
        let time_stop_bars = (max_holding_secs / interval_secs.max(1)) as u32;

        ExitPolicyConfig {
            trail_mode: TrailMode::Percent,
            trail_percent_micros: dollars_to_micros(trail_pct),
            trail_atr_multiplier_micros: 0,
            time_stop_bars,
            partial_levels: Vec::new(),
            cooldown_bars: 0,
            daily_loss_cap_r_micros: 0,
            freeze_on_exit: false,
        }
    };

    ControllerConfig { enabled, entry, exit }
}

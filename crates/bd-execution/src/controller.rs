//! Trading Controller: the position state machine and exit policy that
//! turns an inference loop's bottom-detection signal into order intents.
//!
//! `flat -> pending_entry -> long -> pending_exit -> flat`, mirroring
//! `bd_risk::engine`'s shape — a pure `evaluate`-style function plus
//! explicit caller-owned state, no broker or settings access inside the
//! crate. `on_candidate`/`on_bar`/`on_fill` are the three call sites the
//! runtime wiring drives; `on_fill` only runs once the broker gateway
//! confirms a submitted exit, which is what makes `pending_exit` a real
//! state rather than a same-tick formality.
//!
//! ATR for the `Atr` trail mode is never computed here: `BarUpdate`
//! carries `atr_micros` straight from `bd_features`'s `atr_14`, the
//! crate's single source of truth for it.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{OrderIntent, Side};

const MICROS_SCALE: i64 = 1_000_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    PendingEntry,
    Long,
    PendingExit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrailMode {
    Percent,
    Atr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExitReason {
    TrailingStop,
    TimeStop,
}

/// One partial take-profit rung: at `r_multiple_micros` unrealized R,
/// sell `fraction_micros` of the remaining position. Levels fire at most
/// once each, in the order they appear in `ExitPolicyConfig::partial_levels`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialLevel {
    pub r_multiple_micros: i64,
    pub fraction_micros: i64,
}

/// Exit side of the controller (spec §4.10): trailing stop, time stop,
/// partial take-profits, cooldown-after-exit, daily loss cap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitPolicyConfig {
    pub trail_mode: TrailMode,
    /// Used when `trail_mode == Percent`, e.g. `50_000` == 5%.
    pub trail_percent_micros: i64,
    /// Used when `trail_mode == Atr`, e.g. `2_000_000` == 2.0x ATR.
    pub trail_atr_multiplier_micros: i64,
    /// 0 disables the time stop.
    pub time_stop_bars: u32,
    pub partial_levels: Vec<PartialLevel>,
    /// Bars a symbol stays in `Flat` with new entries blocked after a
    /// full exit fills.
    pub cooldown_bars: u32,
    /// Cumulative realized loss in R across the session; 0 disables.
    pub daily_loss_cap_r_micros: i64,
    /// When true, a scale-in request is refused once any partial
    /// take-profit has fired on the current position.
    pub freeze_on_exit: bool,
}

/// Entry side of the controller: decision gate + optional confirmation
/// + optional scale-in while already long.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryGateConfig {
    pub base_size: i64,
    /// Require `(close - pending_entry_low) / pending_entry_low >=` this
    /// fraction before confirming entry. `None` skips the rebound check.
    pub confirm_pct_micros: Option<i64>,
    /// Require close above the caller-supplied short moving average
    /// before confirming entry.
    pub confirm_above_short_ma: bool,
    /// Give up waiting for confirmation after this many bars and return
    /// to `Flat`. 0 disables the timeout (wait indefinitely).
    pub max_bars_pending_entry: u32,
    /// Allow adding to an existing `Long` position on a fresh candidate.
    pub scale_in_enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub enabled: bool,
    pub entry: EntryGateConfig,
    pub exit: ExitPolicyConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolState {
    pub symbol: String,
    pub position: PositionState,
    pub entry_price_micros: i64,
    pub qty: i64,
    pub initial_risk_micros: i64,
    pub highest_close_since_entry_micros: i64,
    pub trailing_stop_micros: i64,
    pub bars_since_entry: u32,
    pub pending_entry_low_micros: i64,
    pub bars_in_pending_entry: u32,
    pub cooldown_bars_remaining: u32,
    pub partial_levels_filled: BTreeSet<usize>,
    pub atr_micros: Option<i64>,
    pub pending_exit_reason: Option<ExitReason>,
}

impl SymbolState {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            position: PositionState::Flat,
            entry_price_micros: 0,
            qty: 0,
            initial_risk_micros: 0,
            highest_close_since_entry_micros: 0,
            trailing_stop_micros: 0,
            bars_since_entry: 0,
            pending_entry_low_micros: 0,
            bars_in_pending_entry: 0,
            cooldown_bars_remaining: 0,
            partial_levels_filled: BTreeSet::new(),
            atr_micros: None,
            pending_exit_reason: None,
        }
    }
}

/// All controller state, across symbols plus the session-wide daily loss
/// cap. Persisted/owned by the caller (the runtime wiring layer), the
/// same shape as `bd_risk::RiskState`.
#[derive(Clone, Debug, Default)]
pub struct ControllerState {
    pub symbols: BTreeMap<String, SymbolState>,
    pub day_id: u32,
    pub session_realized_loss_r_micros: i64,
    pub daily_halted: bool,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControllerEvent {
    EnteredPendingEntry,
    EntryConfirmed,
    EntryTimedOut,
    ScaledIn,
    ExitSubmitted(ExitReason),
    ExitFilled,
    PartialTakeProfit { level_index: usize, qty: i64 },
    CooldownStarted { bars: u32 },
    DailyLossCapHalted,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerDecision {
    pub intents: Vec<OrderIntent>,
    pub events: Vec<ControllerEvent>,
}

/// One bar's worth of market data for a symbol already tracked by the
/// controller (or about to be, via `on_candidate`). `atr_micros` is the
/// Wilder-smoothed ATR in micros, sourced from `bd_features`'s `atr_14`
/// feature — the controller never recomputes ATR itself, since
/// `bd-features` is the single source of truth for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarUpdate {
    pub symbol: String,
    pub day_id: u32,
    pub high_micros: i64,
    pub low_micros: i64,
    pub close_micros: i64,
    pub short_ma_micros: Option<i64>,
    pub atr_micros: Option<i64>,
}

fn roll_day(state: &mut ControllerState, day_id: u32) {
    if day_id != state.day_id {
        state.day_id = day_id;
        state.session_realized_loss_r_micros = 0;
        state.daily_halted = false;
    }
}

fn percent_trail(high_micros: i64, trail_percent_micros: i64) -> i64 {
    high_micros - (high_micros * trail_percent_micros) / MICROS_SCALE
}

fn atr_trail(high_micros: i64, atr_micros: i64, multiplier_micros: i64) -> i64 {
    high_micros - (atr_micros * multiplier_micros) / MICROS_SCALE
}

fn initial_stop(cfg: &ExitPolicyConfig, entry_price_micros: i64, atr_micros: Option<i64>) -> i64 {
    match cfg.trail_mode {
        TrailMode::Percent => percent_trail(entry_price_micros, cfg.trail_percent_micros),
        TrailMode::Atr => atr_trail(entry_price_micros, atr_micros.unwrap_or(0), cfg.trail_atr_multiplier_micros),
    }
}

fn enter_long(cfg: &ControllerConfig, sym: &mut SymbolState, price_micros: i64, out: &mut ControllerDecision) {
    let stop = initial_stop(&cfg.exit, price_micros, sym.atr_micros);

    sym.position = PositionState::Long;
    sym.entry_price_micros = price_micros;
    sym.qty = cfg.entry.base_size;
    sym.highest_close_since_entry_micros = price_micros;
    sym.bars_since_entry = 0;
    sym.partial_levels_filled.clear();
    sym.trailing_stop_micros = stop;
    sym.initial_risk_micros = (price_micros - stop).max(1);

    out.events.push(ControllerEvent::EntryConfirmed);
    out.intents.push(OrderIntent::new(sym.symbol.clone(), Side::Buy, sym.qty));
}

fn scale_in(cfg: &ControllerConfig, sym: &mut SymbolState, price_micros: i64, out: &mut ControllerDecision) {
    let add_qty = cfg.entry.base_size;
    if add_qty <= 0 {
        return;
    }
    let total_qty = sym.qty + add_qty;
    sym.entry_price_micros = (sym.entry_price_micros * sym.qty + price_micros * add_qty) / total_qty;
    sym.qty = total_qty;

    out.events.push(ControllerEvent::ScaledIn);
    out.intents.push(OrderIntent::new(sym.symbol.clone(), Side::Buy, add_qty));
}

/// Entry gate: a bottom decision arrives for `symbol`. `risk_budget_ok` is
/// the Risk Engine's verdict for opening this position (the controller
/// does not evaluate risk itself — see `bd_risk::evaluate`).
pub fn on_candidate(
    cfg: &ControllerConfig,
    state: &mut ControllerState,
    symbol: &str,
    day_id: u32,
    price_micros: i64,
    decision_is_bottom: bool,
    risk_budget_ok: bool,
) -> ControllerDecision {
    roll_day(state, day_id);
    let mut out = ControllerDecision::default();

    if !cfg.enabled || state.daily_halted || !decision_is_bottom || !risk_budget_ok {
        return out;
    }

    let sym = state
        .symbols
        .entry(symbol.to_string())
        .or_insert_with(|| SymbolState::flat(symbol));

    match sym.position {
        PositionState::Flat => {
            if sym.cooldown_bars_remaining > 0 {
                return out;
            }
            sym.position = PositionState::PendingEntry;
            sym.pending_entry_low_micros = price_micros;
            sym.bars_in_pending_entry = 0;
            out.events.push(ControllerEvent::EnteredPendingEntry);

            let no_confirmation_required =
                cfg.entry.confirm_pct_micros.is_none() && !cfg.entry.confirm_above_short_ma;
            if no_confirmation_required {
                enter_long(cfg, sym, price_micros, &mut out);
            }
        }
        PositionState::Long if cfg.entry.scale_in_enabled => {
            let frozen = cfg.exit.freeze_on_exit && !sym.partial_levels_filled.is_empty();
            if sym.cooldown_bars_remaining == 0 && !frozen {
                scale_in(cfg, sym, price_micros, &mut out);
            }
        }
        _ => {}
    }

    out
}

fn submit_exit(sym: &mut SymbolState, reason: ExitReason, out: &mut ControllerDecision) {
    if sym.qty <= 0 {
        sym.position = PositionState::Flat;
        return;
    }
    out.intents.push(OrderIntent::new(sym.symbol.clone(), Side::Sell, sym.qty));
    sym.position = PositionState::PendingExit;
    sym.pending_exit_reason = Some(reason);
    out.events.push(ControllerEvent::ExitSubmitted(reason));
}

fn apply_partial_take_profits(cfg: &ExitPolicyConfig, sym: &mut SymbolState, close_micros: i64, out: &mut ControllerDecision) {
    if cfg.partial_levels.is_empty() || sym.qty <= 0 {
        return;
    }
    let risk = sym.initial_risk_micros.max(1);
    let r_multiple = (close_micros - sym.entry_price_micros) * MICROS_SCALE / risk;

    for (idx, level) in cfg.partial_levels.iter().enumerate() {
        if sym.partial_levels_filled.contains(&idx) || r_multiple < level.r_multiple_micros {
            continue;
        }
        let qty_to_sell = ((sym.qty * level.fraction_micros) / MICROS_SCALE).clamp(0, sym.qty);
        if qty_to_sell > 0 {
            out.intents.push(OrderIntent::new(sym.symbol.clone(), Side::Sell, qty_to_sell));
            sym.qty -= qty_to_sell;
            sym.partial_levels_filled.insert(idx);
            out.events.push(ControllerEvent::PartialTakeProfit { level_index: idx, qty: qty_to_sell });
        }
    }
}

/// Bar-driven maintenance: ATR update, cooldown countdown, entry
/// confirmation, trailing-stop/time-stop/partial-take-profit exits.
pub fn on_bar(cfg: &ControllerConfig, state: &mut ControllerState, bar: &BarUpdate) -> ControllerDecision {
    roll_day(state, bar.day_id);
    let mut out = ControllerDecision::default();

    let sym = match state.symbols.get_mut(&bar.symbol) {
        Some(s) => s,
        None => return out,
    };

    if bar.atr_micros.is_some() {
        sym.atr_micros = bar.atr_micros;
    }

    match sym.position {
        PositionState::Flat => {
            if sym.cooldown_bars_remaining > 0 {
                sym.cooldown_bars_remaining -= 1;
            }
        }
        PositionState::PendingEntry => {
            sym.pending_entry_low_micros = sym.pending_entry_low_micros.min(bar.low_micros);
            sym.bars_in_pending_entry += 1;

            let rebound_ok = cfg
                .entry
                .confirm_pct_micros
                .map(|pct| {
                    let low = sym.pending_entry_low_micros.max(1);
                    let rebound = (bar.close_micros - low) * MICROS_SCALE / low;
                    rebound >= pct
                })
                .unwrap_or(false);

            let ma_ok = cfg.entry.confirm_above_short_ma
                && bar.short_ma_micros.map(|ma| bar.close_micros > ma).unwrap_or(false);

            if rebound_ok || ma_ok {
                enter_long(cfg, sym, bar.close_micros, &mut out);
            } else if cfg.entry.max_bars_pending_entry > 0
                && sym.bars_in_pending_entry >= cfg.entry.max_bars_pending_entry
            {
                sym.position = PositionState::Flat;
                out.events.push(ControllerEvent::EntryTimedOut);
            }
        }
        PositionState::Long => {
            sym.bars_since_entry += 1;
            sym.highest_close_since_entry_micros = sym.highest_close_since_entry_micros.max(bar.close_micros);

            let candidate_stop = match cfg.exit.trail_mode {
                TrailMode::Percent => percent_trail(bar.high_micros, cfg.exit.trail_percent_micros),
                TrailMode::Atr => atr_trail(bar.high_micros, sym.atr_micros.unwrap_or(0), cfg.exit.trail_atr_multiplier_micros),
            };
            sym.trailing_stop_micros = sym.trailing_stop_micros.max(candidate_stop);

            if bar.low_micros <= sym.trailing_stop_micros {
                submit_exit(sym, ExitReason::TrailingStop, &mut out);
            } else if cfg.exit.time_stop_bars > 0 && sym.bars_since_entry >= cfg.exit.time_stop_bars {
                submit_exit(sym, ExitReason::TimeStop, &mut out);
            } else {
                apply_partial_take_profits(&cfg.exit, sym, bar.close_micros, &mut out);
            }
        }
        PositionState::PendingExit => {
            // Awaiting `on_fill` confirmation from the broker gateway.
        }
    }

    out
}

/// Finalizes a `PendingExit` once the broker gateway confirms the fill:
/// resolves realized R, starts the cooldown, and applies the daily loss
/// cap if the session's cumulative realized loss now breaches it.
pub fn on_fill(cfg: &ControllerConfig, state: &mut ControllerState, symbol: &str, fill_price_micros: i64) -> ControllerDecision {
    let mut out = ControllerDecision::default();

    let sym = match state.symbols.get_mut(symbol) {
        Some(s) => s,
        None => return out,
    };
    if sym.position != PositionState::PendingExit {
        return out;
    }

    let risk = sym.initial_risk_micros.max(1);
    let realized_r = (fill_price_micros - sym.entry_price_micros) * MICROS_SCALE / risk;

    sym.position = PositionState::Flat;
    sym.qty = 0;
    sym.cooldown_bars_remaining = cfg.exit.cooldown_bars;
    sym.partial_levels_filled.clear();
    sym.pending_exit_reason = None;

    out.events.push(ControllerEvent::ExitFilled);
    if cfg.exit.cooldown_bars > 0 {
        out.events.push(ControllerEvent::CooldownStarted { bars: cfg.exit.cooldown_bars });
    }

    if realized_r < 0 {
        state.session_realized_loss_r_micros += -realized_r;
        if cfg.exit.daily_loss_cap_r_micros > 0
            && state.session_realized_loss_r_micros >= cfg.exit.daily_loss_cap_r_micros
        {
            state.daily_halted = true;
            out.events.push(ControllerEvent::DailyLossCapHalted);
        }
    }

    out
}

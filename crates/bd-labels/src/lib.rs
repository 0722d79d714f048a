//! The bottom-event label rule.
//!
//! This is the one piece of business logic the spec calls out as a
//! contract: `bd-training`'s dataset construction and `bd-labeler`'s
//! realized-outcome resolution must both call [`label_bottom_event`] rather
//! than keep their own copies, or "live" and "trained" labels could drift
//! apart on any future tuning of the rule.

use bd_schemas::LabelParams;

/// Outcome of applying the bottom-event rule at a single index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOutcome {
    /// `t + H <= n - 1` and the rule fired: drawdown `>= D` followed by a
    /// rebound `>= R`.
    Positive,
    /// `t + H <= n - 1` and the rule did not fire.
    Negative,
    /// `t + H > n - 1`: not enough future closes to evaluate the window.
    Pending,
}

impl LabelOutcome {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            LabelOutcome::Positive => Some(true),
            LabelOutcome::Negative => Some(false),
            LabelOutcome::Pending => None,
        }
    }
}

/// Apply the bottom-event rule at index `t` of `closes`.
///
/// ```text
/// p0 = c[t]
/// window = c[t+1 .. t+H]
/// j = argmin(window)
/// drop = (window[j] - p0) / p0
/// if drop <= -D:
///     rise = (max(window[j..end]) - window[j]) / window[j]
///     y = Positive if rise >= R else Negative
/// else:
///     y = Negative
/// ```
///
/// Only inter-bar closes are consulted; intra-bar highs/lows never enter
/// the rule (spec §9 open question on intra-bar simultaneity is moot here
/// by construction — this function's signature has no intra-bar inputs).
pub fn label_bottom_event(closes: &[f64], t: usize, params: LabelParams) -> LabelOutcome {
    let n = closes.len();
    if n == 0 || t >= n {
        return LabelOutcome::Pending;
    }
    let h = params.lookahead;
    if h == 0 || t + h > n - 1 {
        return LabelOutcome::Pending;
    }

    let p0 = closes[t];
    if !p0.is_finite() || p0 == 0.0 {
        return LabelOutcome::Pending;
    }

    let window = &closes[t + 1..=t + h];
    if window.iter().any(|c| !c.is_finite()) {
        return LabelOutcome::Pending;
    }

    let (j, min_val) = window
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, v)| (i, *v))
        .expect("window is non-empty: h > 0");

    let drop = (min_val - p0) / p0;
    if drop > -params.drawdown {
        return LabelOutcome::Negative;
    }

    let rebound_window = &window[j..];
    let max_after_min = rebound_window
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if min_val == 0.0 {
        return LabelOutcome::Pending;
    }
    let rise = (max_after_min - min_val) / min_val;

    if rise >= params.rebound {
        LabelOutcome::Positive
    } else {
        LabelOutcome::Negative
    }
}

/// Apply [`label_bottom_event`] at every index of `closes`, for dataset
/// construction. Trailing indices within `lookahead` of the end come back
/// `Pending`.
pub fn label_all(closes: &[f64], params: LabelParams) -> Vec<LabelOutcome> {
    (0..closes.len())
        .map(|t| label_bottom_event(closes, t, params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(lookahead: usize, drawdown: f64, rebound: f64) -> LabelParams {
        LabelParams {
            lookahead,
            drawdown,
            rebound,
        }
    }

    /// Seed scenario 1: positive label with rebound.
    #[test]
    fn bottom_label_positive_with_rebound() {
        let closes = [100.0, 99.5, 99.0, 98.5, 98.0, 98.6, 99.2];
        let out = label_bottom_event(&closes, 0, params(6, 0.01, 0.01));
        assert_eq!(out, LabelOutcome::Positive);
    }

    /// Seed scenario 2: drawdown met but rebound insufficient.
    #[test]
    fn bottom_label_negative_no_rebound() {
        let closes = [100.0, 99.0, 98.0, 97.0, 96.0, 96.1, 96.2];
        let out = label_bottom_event(&closes, 0, params(6, 0.01, 0.01));
        assert_eq!(out, LabelOutcome::Negative);
    }

    #[test]
    fn drawdown_not_met_is_negative() {
        let closes = [100.0, 99.9, 99.8, 99.9, 100.0, 100.1, 100.2];
        let out = label_bottom_event(&closes, 0, params(6, 0.01, 0.01));
        assert_eq!(out, LabelOutcome::Negative);
    }

    #[test]
    fn insufficient_lookahead_is_pending() {
        let closes = [100.0, 99.0, 98.0];
        let out = label_bottom_event(&closes, 0, params(6, 0.01, 0.01));
        assert_eq!(out, LabelOutcome::Pending);
    }

    #[test]
    fn boundary_t_plus_h_equals_n_minus_1_is_evaluated() {
        // n = 7, h = 6: t=0 has t+h == n-1 == 6, must NOT be pending.
        let closes = [100.0, 99.0, 98.0, 97.0, 96.0, 96.1, 96.2];
        assert_eq!(closes.len(), 7);
        let out = label_bottom_event(&closes, 0, params(6, 0.01, 0.01));
        assert_ne!(out, LabelOutcome::Pending);
    }

    #[test]
    fn idempotent_relabeling_same_closes() {
        let closes = [100.0, 99.5, 99.0, 98.5, 98.0, 98.6, 99.2, 99.0, 98.9];
        let p = params(6, 0.01, 0.01);
        let first = label_all(&closes, p);
        let second = label_all(&closes, p);
        assert_eq!(first, second);
    }

    #[test]
    fn nan_close_in_window_is_pending_not_panic() {
        let closes = [100.0, 99.0, f64::NAN, 97.0, 96.0, 96.1, 96.2];
        let out = label_bottom_event(&closes, 0, params(6, 0.01, 0.01));
        assert_eq!(out, LabelOutcome::Pending);
    }
}

//! Shared evaluation metrics: AUC, PR-AUC, Brier, ECE, MCE and reliability
//! binning.
//!
//! This is the single implementation `bd-training` uses to evaluate a
//! freshly fit model and `bd-calibration` uses to score live traffic
//! against production — by construction the two are comparable, which is
//! the whole point of a drift comparison.

use bd_schemas::ReliabilityBin;

/// Area under the ROC curve via the Mann-Whitney U statistic: the
/// probability a random positive scores above a random negative (ties
/// count as half a win). Returns `0.5` (no-information) when either class
/// is empty.
pub fn auc(probs: &[f64], labels: &[bool]) -> f64 {
    assert_eq!(probs.len(), labels.len());
    let n_pos = labels.iter().filter(|&&y| y).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    // Rank probs ascending, averaging ranks across ties.
    let mut idx: Vec<usize> = (0..probs.len()).collect();
    idx.sort_by(|&a, &b| probs[a].partial_cmp(&probs[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0_f64; probs.len()];
    let mut i = 0;
    while i < idx.len() {
        let mut j = i;
        while j + 1 < idx.len() && probs[idx[j + 1]] == probs[idx[i]] {
            j += 1;
        }
        // Ranks are 1-based; average rank for the tied block.
        let avg_rank = ((i + 1) + (j + 1)) as f64 / 2.0;
        for k in idx.iter().take(j + 1).skip(i) {
            ranks[*k] = avg_rank;
        }
        i = j + 1;
    }

    let rank_sum_pos: f64 = (0..probs.len()).filter(|&i| labels[i]).map(|i| ranks[i]).sum();
    let u = rank_sum_pos - (n_pos as f64 * (n_pos as f64 + 1.0)) / 2.0;
    u / (n_pos as f64 * n_neg as f64)
}

/// Area under the precision-recall curve, via trapezoidal integration over
/// the set of thresholds present in `probs` (descending), plus the
/// recall=0 boundary point.
pub fn pr_auc(probs: &[f64], labels: &[bool]) -> f64 {
    assert_eq!(probs.len(), labels.len());
    let n_pos = labels.iter().filter(|&&y| y).count();
    if n_pos == 0 {
        return 0.0;
    }

    let mut idx: Vec<usize> = (0..probs.len()).collect();
    idx.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut points: Vec<(f64, f64)> = Vec::with_capacity(idx.len() + 1);
    points.push((0.0, 1.0)); // recall=0, precision defined as 1.0 by convention

    let mut tp = 0u64;
    let mut fp = 0u64;
    let mut i = 0;
    while i < idx.len() {
        let mut j = i;
        let thr = probs[idx[i]];
        while j < idx.len() && probs[idx[j]] == thr {
            if labels[idx[j]] {
                tp += 1;
            } else {
                fp += 1;
            }
            j += 1;
        }
        let recall = tp as f64 / n_pos as f64;
        let precision = tp as f64 / (tp + fp).max(1) as f64;
        points.push((recall, precision));
        i = j;
    }

    let mut area = 0.0;
    for w in points.windows(2) {
        let (r0, p0) = w[0];
        let (r1, p1) = w[1];
        area += (r1 - r0) * (p0 + p1) / 2.0;
    }
    area.max(0.0)
}

/// Mean squared error between predicted probability and realized outcome.
pub fn brier(probs: &[f64], labels: &[bool]) -> f64 {
    assert_eq!(probs.len(), labels.len());
    if probs.is_empty() {
        return 0.0;
    }
    let sum: f64 = probs
        .iter()
        .zip(labels)
        .map(|(p, y)| {
            let yf = if *y { 1.0 } else { 0.0 };
            (p - yf) * (p - yf)
        })
        .sum();
    sum / probs.len() as f64
}

/// Build `bins` equal-width reliability bins over `[0, 1]`, then merge any
/// bin with `count < min_bin_samples` into its (lower-edge) neighbor,
/// repeating until every remaining bin clears the minimum or only one bin
/// is left. Matches spec §4.8's "adjacent-merge to reach minimum" rule.
pub fn reliability_bins(
    probs: &[f64],
    labels: &[bool],
    bins: usize,
    min_bin_samples: u64,
) -> Vec<ReliabilityBin> {
    assert_eq!(probs.len(), labels.len());
    let bins = bins.max(1);

    // raw[b] = (sum_prob, sum_label, count)
    let mut raw: Vec<(f64, f64, u64)> = vec![(0.0, 0.0, 0); bins];
    for (p, y) in probs.iter().zip(labels) {
        let clamped = p.clamp(0.0, 1.0);
        let mut idx = (clamped * bins as f64) as usize;
        if idx >= bins {
            idx = bins - 1;
        }
        raw[idx].0 += p;
        raw[idx].1 += if *y { 1.0 } else { 0.0 };
        raw[idx].2 += 1;
    }

    // Merge chains of consecutive bins left-to-right until each chain's
    // count clears the minimum (or we run out of bins to merge into).
    let mut merged: Vec<(f64, f64, u64)> = Vec::new();
    for (sum_p, sum_y, count) in raw {
        if let Some(last) = merged.last_mut() {
            if last.2 < min_bin_samples {
                last.0 += sum_p;
                last.1 += sum_y;
                last.2 += count;
                continue;
            }
        }
        merged.push((sum_p, sum_y, count));
    }
    // A final run below the minimum merges backward into its predecessor.
    while merged.len() > 1 && merged.last().unwrap().2 < min_bin_samples {
        let last = merged.pop().unwrap();
        let prev = merged.last_mut().unwrap();
        prev.0 += last.0;
        prev.1 += last.1;
        prev.2 += last.2;
    }

    merged
        .into_iter()
        .enumerate()
        .filter(|(_, (_, _, count))| *count > 0)
        .map(|(i, (sum_p, sum_y, count))| ReliabilityBin {
            bin_index: i,
            count,
            mean_pred_prob: sum_p / count as f64,
            empirical_prob: sum_y / count as f64,
        })
        .collect()
}

/// Expected Calibration Error: `sum_b (count_b / N) * |mean_pred_prob_b -
/// empirical_prob_b|`.
pub fn ece(bins: &[ReliabilityBin], n: u64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    bins.iter()
        .map(|b| (b.count as f64 / n as f64) * (b.mean_pred_prob - b.empirical_prob).abs())
        .sum()
}

/// Maximum Calibration Error: `max_b |mean_pred_prob_b - empirical_prob_b|`.
pub fn mce(bins: &[ReliabilityBin]) -> f64 {
    bins.iter()
        .map(|b| (b.mean_pred_prob - b.empirical_prob).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auc_perfect_separation_is_one() {
        let probs = [0.1, 0.2, 0.8, 0.9];
        let labels = [false, false, true, true];
        assert!((auc(&probs, &labels) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn auc_no_info_with_one_class_is_half() {
        let probs = [0.1, 0.2, 0.3];
        let labels = [true, true, true];
        assert_eq!(auc(&probs, &labels), 0.5);
    }

    #[test]
    fn brier_bounds_zero_to_one() {
        let probs = [0.0, 0.5, 1.0];
        let labels = [false, true, true];
        let b = brier(&probs, &labels);
        assert!((0.0..=1.0).contains(&b));
    }

    #[test]
    fn reliability_bins_sum_to_sample_count() {
        let probs = [0.05, 0.15, 0.55, 0.65, 0.95];
        let labels = [false, true, true, false, true];
        let bins = reliability_bins(&probs, &labels, 10, 1);
        let total: u64 = bins.iter().map(|b| b.count).sum();
        assert_eq!(total, probs.len() as u64);
    }

    #[test]
    fn ece_and_mce_bounded_when_sample_gated() {
        let probs = [0.1, 0.1, 0.1, 0.9, 0.9, 0.9];
        let labels = [false, false, false, true, true, true];
        let bins = reliability_bins(&probs, &labels, 10, 2);
        let e = ece(&bins, probs.len() as u64);
        let m = mce(&bins);
        assert!((0.0..=1.0).contains(&e));
        assert!((0.0..=1.0).contains(&m));
        // Perfectly calibrated here: mean_pred == empirical in both bins.
        assert!(e < 1e-9);
        assert!(m < 1e-9);
    }

    #[test]
    fn small_bin_merges_into_neighbor() {
        // Single sample in the top bin must merge left rather than stand
        // alone below min_bin_samples.
        let probs = [0.05, 0.05, 0.05, 0.99];
        let labels = [false, false, true, true];
        let bins = reliability_bins(&probs, &labels, 10, 2);
        assert!(bins.iter().all(|b| b.count >= 2));
    }
}

//! Class-weighted logistic regression fit by batch gradient descent.
//!
//! Minority-class resampling is driven by the seeded [`SplitMix64`] PRNG
//! (never `rand`'s thread-local generator) so two runs with identical
//! `seed` and inputs produce byte-for-byte identical weights.

use std::collections::{BTreeMap, BTreeSet};

use bd_registry::BottomLogistic;

use crate::dataset::Example;
use crate::rng::SplitMix64;

const LEARNING_RATE: f64 = 0.1;
const ITERATIONS: usize = 500;
const L2_LAMBDA: f64 = 1e-4;

/// Resamples the minority class with replacement (seeded) until both
/// classes are equally represented, then fits a logistic regression via
/// batch gradient descent.
pub fn fit_logistic(examples: &[Example], seed: u64) -> BottomLogistic {
    let feature_names: BTreeSet<String> = examples
        .iter()
        .flat_map(|e| e.features.keys().cloned())
        .collect();
    let feature_names: Vec<String> = feature_names.into_iter().collect();

    let balanced = balance_classes(examples, seed);

    let mut weights: BTreeMap<String, f64> = feature_names.iter().map(|f| (f.clone(), 0.0)).collect();
    let mut intercept = 0.0;

    let n = balanced.len().max(1) as f64;

    for _ in 0..ITERATIONS {
        let mut grad_intercept = 0.0;
        let mut grad_weights: BTreeMap<String, f64> =
            feature_names.iter().map(|f| (f.clone(), 0.0)).collect();

        for ex in &balanced {
            let z = intercept
                + feature_names
                    .iter()
                    .map(|f| weights[f] * ex.features.get(f).copied().unwrap_or(0.0))
                    .sum::<f64>();
            let p = 1.0 / (1.0 + (-z).exp());
            let y = if ex.label { 1.0 } else { 0.0 };
            let err = p - y;

            grad_intercept += err;
            for f in &feature_names {
                *grad_weights.get_mut(f).unwrap() += err * ex.features.get(f).copied().unwrap_or(0.0);
            }
        }

        intercept -= LEARNING_RATE * (grad_intercept / n);
        for f in &feature_names {
            let reg = L2_LAMBDA * weights[f];
            *weights.get_mut(f).unwrap() -= LEARNING_RATE * (grad_weights[f] / n + reg);
        }
    }

    BottomLogistic { intercept, weights }
}

fn balance_classes(examples: &[Example], seed: u64) -> Vec<Example> {
    let positives: Vec<&Example> = examples.iter().filter(|e| e.label).collect();
    let negatives: Vec<&Example> = examples.iter().filter(|e| !e.label).collect();

    if positives.is_empty() || negatives.is_empty() {
        return examples.to_vec();
    }

    let (minority, majority) = if positives.len() < negatives.len() {
        (&positives, &negatives)
    } else {
        (&negatives, &positives)
    };

    let mut rng = SplitMix64::new(seed);
    let mut out: Vec<Example> = majority.iter().map(|e| (*e).clone()).collect();
    for _ in 0..majority.len() {
        let idx = rng.gen_range(minority.len());
        out.push(minority[idx].clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn example(x: f64, label: bool) -> Example {
        let mut features = BTreeMap::new();
        features.insert("x".to_string(), x);
        Example {
            close_time_ms: 0,
            features,
            label,
        }
    }

    #[test]
    fn fit_separates_obviously_separable_classes() {
        let mut examples = Vec::new();
        for i in 0..50 {
            examples.push(example(-10.0 - i as f64, true));
            examples.push(example(10.0 + i as f64, false));
        }
        let model = fit_logistic(&examples, 123);
        let w = model.weights["x"];
        assert!(w < 0.0, "expected negative weight, got {w}");
    }

    #[test]
    fn deterministic_across_runs() {
        let mut examples = Vec::new();
        for i in 0..30 {
            examples.push(example(-1.0 - i as f64 * 0.1, true));
            examples.push(example(1.0 + i as f64 * 0.1, false));
        }
        let a = fit_logistic(&examples, 7);
        let b = fit_logistic(&examples, 7);
        assert_eq!(a.intercept, b.intercept);
        assert_eq!(a.weights, b.weights);
    }
}

//! Platt scaling: maps decision values to probabilities of the positive class with a
//! fitted sigmoid `P(+1 | f) = 1 / (1 + exp(A f + B))`.
//!
//! The parameters minimize the cross-entropy against smoothed targets
//! `(N+ + 1) / (N+ + 2)` and `1 / (N- + 2)`, which keeps a separable training set
//! from driving the sigmoid to a step. The minimizer is Newton's method with a
//! backtracking line search.

use serde::{Deserialize, Serialize};

const MAX_ITERATIONS: usize = 100;
const MIN_STEP: f64 = 1e-10;
/// Added to the Hessian diagonal so it stays positive definite.
const HESSIAN_RIDGE: f64 = 1e-12;
const GRADIENT_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattScaling {
    pub a: f64,
    pub b: f64,
}

impl PlattScaling {
    /// Fits the sigmoid to decision values and their true labels (+1 / -1).
    pub fn fit(decisions: &[f64], signs: &[f64]) -> Self {
        let prior_pos = signs.iter().filter(|&&y| y > 0.0).count() as f64;
        let prior_neg = signs.len() as f64 - prior_pos;
        let hi_target = (prior_pos + 1.0) / (prior_pos + 2.0);
        let lo_target = 1.0 / (prior_neg + 2.0);
        let targets: Vec<f64> = signs
            .iter()
            .map(|&y| if y > 0.0 { hi_target } else { lo_target })
            .collect();

        let mut a = 0.0;
        let mut b = ((prior_neg + 1.0) / (prior_pos + 1.0)).ln();
        let mut objective = cross_entropy(decisions, &targets, a, b);

        let mut iteration = 0;
        while iteration < MAX_ITERATIONS {
            let mut h11 = HESSIAN_RIDGE;
            let mut h22 = HESSIAN_RIDGE;
            let mut h21 = 0.0;
            let mut g1 = 0.0;
            let mut g2 = 0.0;
            for (&f, &t) in decisions.iter().zip(&targets) {
                let (p, q) = sigmoid_pair(f * a + b);
                let d2 = p * q;
                h11 += f * f * d2;
                h22 += d2;
                h21 += f * d2;
                let d1 = t - p;
                g1 += f * d1;
                g2 += d1;
            }
            if g1.abs() < GRADIENT_TOLERANCE && g2.abs() < GRADIENT_TOLERANCE {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let delta_a = -(h22 * g1 - h21 * g2) / det;
            let delta_b = -(-h21 * g1 + h11 * g2) / det;
            let directional = g1 * delta_a + g2 * delta_b;

            let mut step = 1.0;
            while step >= MIN_STEP {
                let new_a = a + step * delta_a;
                let new_b = b + step * delta_b;
                let new_objective = cross_entropy(decisions, &targets, new_a, new_b);
                if new_objective < objective + 1e-4 * step * directional {
                    a = new_a;
                    b = new_b;
                    objective = new_objective;
                    break;
                }
                step /= 2.0;
            }
            if step < MIN_STEP {
                log::debug!("Platt scaling line search stopped after {iteration} iterations");
                break;
            }
            iteration += 1;
        }
        if iteration >= MAX_ITERATIONS {
            log::warn!("Platt scaling reached the iteration limit ({MAX_ITERATIONS})");
        }
        log::debug!("Platt sigmoid: A = {a:.6}, B = {b:.6}");
        Self { a, b }
    }

    /// Probability of the positive class for one decision value.
    pub fn probability(&self, decision: f64) -> f64 {
        sigmoid_pair(decision * self.a + self.b).0
    }
}

/// Returns `(1 / (1 + e^x), e^x / (1 + e^x))` evaluated without overflow.
#[inline]
fn sigmoid_pair(x: f64) -> (f64, f64) {
    if x >= 0.0 {
        let e = (-x).exp();
        (e / (1.0 + e), 1.0 / (1.0 + e))
    } else {
        let e = x.exp();
        (1.0 / (1.0 + e), e / (1.0 + e))
    }
}

fn cross_entropy(decisions: &[f64], targets: &[f64], a: f64, b: f64) -> f64 {
    decisions
        .iter()
        .zip(targets)
        .map(|(&f, &t)| {
            let x = f * a + b;
            if x >= 0.0 {
                t * x + (-x).exp().ln_1p()
            } else {
                (t - 1.0) * x + x.exp().ln_1p()
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn positive_decisions_map_to_high_probability() {
        let decisions = [2.1, 1.7, 0.9, 1.2, 0.4, -0.3, -1.1, -1.8, -0.6, -2.2];
        let signs = [1.0, 1.0, 1.0, 1.0, -1.0, 1.0, -1.0, -1.0, -1.0, -1.0];
        let platt = PlattScaling::fit(&decisions, &signs);
        assert!(platt.a < 0.0, "slope should be negative, got {}", platt.a);
        assert!(platt.probability(2.0) > 0.8);
        assert!(platt.probability(-2.0) < 0.2);
        assert!(platt.probability(1.0) > platt.probability(0.0));
    }

    #[test]
    fn probabilities_stay_inside_unit_interval() {
        let platt = PlattScaling { a: -50.0, b: 0.0 };
        for f in [-1e6, -10.0, 0.0, 10.0, 1e6] {
            let p = platt.probability(f);
            assert!((0.0..=1.0).contains(&p), "{p}");
        }
        assert_abs_diff_eq!(platt.probability(0.0), 0.5);
    }

    #[test]
    fn uninformative_decisions_recover_class_prior() {
        let decisions = [0.0; 6];
        let signs = [1.0, 1.0, -1.0, -1.0, -1.0, -1.0];
        let platt = PlattScaling::fit(&decisions, &signs);
        // Smoothed targets: 3/4 for 2 positives, 1/6 for 4 negatives.
        let expected = (2.0 * 0.75 + 4.0 * (1.0 / 6.0)) / 6.0;
        assert_abs_diff_eq!(platt.probability(0.0), expected, epsilon = 1e-4);
    }
}

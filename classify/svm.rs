//! # Soft-Margin Support-Vector Classifier
//!
//! A two-class C-SVC with a radial basis function kernel
//! `K(x, y) = exp(-sigma * |x - y|^2)`, trained by sequential minimal optimization.
//!
//! The dual problem
//!
//! ```text
//!     min  1/2 a'Qa - e'a    subject to  y'a = 0,  0 <= a_i <= C
//!     Q_ij = y_i y_j K(x_i, x_j)
//! ```
//!
//! is solved two coordinates at a time. The working pair is chosen with second-order
//! information: `i` maximizes the violation of the optimality conditions and `j`
//! maximizes the guaranteed decrease of the objective for that `i`. The full kernel
//! matrix is precomputed; reference cohorts are small enough for that.
//!
//! Decision value: `f(x) = sum_i coef_i K(sv_i, x) - rho`, with `coef_i = y_i a_i`.
//! Positive values predict the positive class.

use crate::config::HyperParameters;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stopping tolerance on the maximal violating pair.
const EPS: f64 = 1e-3;
/// Replaces non-positive curvature along the working direction.
const TAU: f64 = 1e-12;
/// Solver iteration cap is `max(MIN_ITERATIONS, ITERATIONS_PER_ROW * rows)`.
const MIN_ITERATIONS: usize = 1_000_000;
const ITERATIONS_PER_ROW: usize = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SvmError {
    #[error("Cannot train a classifier on zero samples or zero features.")]
    Empty,
    #[error("Training needs both classes, but every training sample is {0}.")]
    SingleClass(&'static str),
    #[error("Training data has {rows} rows but {labels} labels.")]
    LabelCount { rows: usize, labels: usize },
    #[error("Training data contains non-finite values.")]
    NonFinite,
    #[error("The hyperparameter grid is empty.")]
    EmptyGrid,
    #[error("Kernel width and cost must be finite and positive (sigma = {sigma}, cost = {cost}).")]
    InvalidHyperParameters { sigma: f64, cost: f64 },
}

/// A trained kernel machine: support vectors with their signed dual coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSvm {
    pub sigma: f64,
    pub cost: f64,
    pub rho: f64,
    /// Support vectors as rows, in the standardized feature space.
    pub support_vectors: Array2<f64>,
    /// `y_i * alpha_i` for each support vector.
    pub coefficients: Array1<f64>,
}

#[inline]
pub fn rbf_kernel(a: ArrayView1<f64>, b: ArrayView1<f64>, sigma: f64) -> f64 {
    let squared_distance: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    (-sigma * squared_distance).exp()
}

impl KernelSvm {
    /// Trains on `rows` (samples x features) with labels `signs` in {+1, -1}.
    pub fn train(
        rows: ArrayView2<f64>,
        signs: &[f64],
        params: HyperParameters,
    ) -> Result<Self, SvmError> {
        let n = rows.nrows();
        if n == 0 || rows.ncols() == 0 {
            return Err(SvmError::Empty);
        }
        if signs.len() != n {
            return Err(SvmError::LabelCount {
                rows: n,
                labels: signs.len(),
            });
        }
        if !(params.sigma.is_finite() && params.sigma > 0.0 && params.cost.is_finite() && params.cost > 0.0) {
            return Err(SvmError::InvalidHyperParameters {
                sigma: params.sigma,
                cost: params.cost,
            });
        }
        if rows.iter().any(|v| !v.is_finite()) {
            return Err(SvmError::NonFinite);
        }
        if signs.iter().all(|&y| y > 0.0) {
            return Err(SvmError::SingleClass("Virulent"));
        }
        if signs.iter().all(|&y| y < 0.0) {
            return Err(SvmError::SingleClass("Avirulent"));
        }

        let kernel = Array2::from_shape_fn((n, n), |(i, j)| {
            rbf_kernel(rows.row(i), rows.row(j), params.sigma)
        });
        let solution = Smo::new(&kernel, signs, params.cost).solve();
        if !solution.converged {
            log::warn!(
                "Support-vector solver reached its iteration cap ({}) before converging; using the current solution",
                solution.iterations
            );
        }

        let support: Vec<usize> = (0..n).filter(|&i| solution.alpha[i] > 0.0).collect();
        log::debug!(
            "SVM (sigma = {}, cost = {}): {} support vectors of {n} rows after {} iterations, rho = {:.6}",
            params.sigma,
            params.cost,
            support.len(),
            solution.iterations,
            solution.rho
        );

        Ok(Self {
            sigma: params.sigma,
            cost: params.cost,
            rho: solution.rho,
            support_vectors: rows.select(Axis(0), &support),
            coefficients: support.iter().map(|&i| signs[i] * solution.alpha[i]).collect(),
        })
    }

    pub fn decision_value(&self, row: ArrayView1<f64>) -> f64 {
        self.support_vectors
            .axis_iter(Axis(0))
            .zip(self.coefficients.iter())
            .map(|(sv, &coef)| coef * rbf_kernel(sv, row, self.sigma))
            .sum::<f64>()
            - self.rho
    }

    /// Decision values for every row of `rows`.
    pub fn decision_values(&self, rows: ArrayView2<f64>) -> Array1<f64> {
        rows.axis_iter(Axis(0)).map(|row| self.decision_value(row)).collect()
    }

    pub fn n_support(&self) -> usize {
        self.coefficients.len()
    }
}

struct SmoSolution {
    alpha: Vec<f64>,
    rho: f64,
    iterations: usize,
    converged: bool,
}

/// Dual coordinate-descent state over a precomputed kernel matrix.
struct Smo<'a> {
    kernel: &'a Array2<f64>,
    y: &'a [f64],
    cost: f64,
    alpha: Vec<f64>,
    /// Gradient of the dual objective, `Q a - e`.
    gradient: Vec<f64>,
}

impl<'a> Smo<'a> {
    fn new(kernel: &'a Array2<f64>, y: &'a [f64], cost: f64) -> Self {
        let n = y.len();
        Self {
            kernel,
            y,
            cost,
            alpha: vec![0.0; n],
            gradient: vec![-1.0; n],
        }
    }

    #[inline]
    fn q(&self, i: usize, j: usize) -> f64 {
        self.y[i] * self.y[j] * self.kernel[[i, j]]
    }

    #[inline]
    fn is_upper_bound(&self, i: usize) -> bool {
        self.alpha[i] >= self.cost
    }

    #[inline]
    fn is_lower_bound(&self, i: usize) -> bool {
        self.alpha[i] <= 0.0
    }

    fn solve(mut self) -> SmoSolution {
        let n = self.y.len();
        let max_iterations = MIN_ITERATIONS.max(ITERATIONS_PER_ROW.saturating_mul(n));
        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iterations {
            let Some((i, j)) = self.select_working_set() else {
                converged = true;
                break;
            };
            iterations += 1;
            self.update_pair(i, j);
        }
        let rho = self.rho();
        SmoSolution {
            alpha: self.alpha,
            rho,
            iterations,
            converged,
        }
    }

    /// Second-order working-set selection. `None` once the maximal violation is
    /// within tolerance.
    fn select_working_set(&self) -> Option<(usize, usize)> {
        let n = self.y.len();
        let mut g_max = f64::NEG_INFINITY;
        let mut i_best = None;
        for t in 0..n {
            if self.y[t] > 0.0 {
                if !self.is_upper_bound(t) && -self.gradient[t] >= g_max {
                    g_max = -self.gradient[t];
                    i_best = Some(t);
                }
            } else if !self.is_lower_bound(t) && self.gradient[t] >= g_max {
                g_max = self.gradient[t];
                i_best = Some(t);
            }
        }

        let mut g_max2 = f64::NEG_INFINITY;
        let mut j_best = None;
        let mut obj_diff_min = f64::INFINITY;
        for j in 0..n {
            let (violation, grad_diff, quad_coef) = if self.y[j] > 0.0 {
                if self.is_lower_bound(j) {
                    continue;
                }
                let grad_diff = g_max + self.gradient[j];
                let quad = i_best.map(|i| {
                    self.kernel[[i, i]] + self.kernel[[j, j]] - 2.0 * self.y[i] * self.q(i, j)
                });
                (self.gradient[j], grad_diff, quad)
            } else {
                if self.is_upper_bound(j) {
                    continue;
                }
                let grad_diff = g_max - self.gradient[j];
                let quad = i_best.map(|i| {
                    self.kernel[[i, i]] + self.kernel[[j, j]] + 2.0 * self.y[i] * self.q(i, j)
                });
                (-self.gradient[j], grad_diff, quad)
            };

            g_max2 = g_max2.max(violation);
            if grad_diff > 0.0 {
                if let Some(quad) = quad_coef {
                    let curvature = if quad > 0.0 { quad } else { TAU };
                    let obj_diff = -(grad_diff * grad_diff) / curvature;
                    if obj_diff <= obj_diff_min {
                        j_best = Some(j);
                        obj_diff_min = obj_diff;
                    }
                }
            }
        }

        if g_max + g_max2 < EPS {
            return None;
        }
        match (i_best, j_best) {
            (Some(i), Some(j)) => Some((i, j)),
            _ => None,
        }
    }

    /// Moves `alpha_i` and `alpha_j` along the feasible line, clipped to the box.
    fn update_pair(&mut self, i: usize, j: usize) {
        let c = self.cost;
        let q_ij = self.q(i, j);
        let quad_base = self.kernel[[i, i]] + self.kernel[[j, j]];
        let old_ai = self.alpha[i];
        let old_aj = self.alpha[j];
        let mut ai = old_ai;
        let mut aj = old_aj;

        if self.y[i] != self.y[j] {
            let quad = quad_base + 2.0 * q_ij;
            let quad = if quad > 0.0 { quad } else { TAU };
            let delta = (-self.gradient[i] - self.gradient[j]) / quad;
            let diff = ai - aj;
            ai += delta;
            aj += delta;
            if diff > 0.0 {
                if aj < 0.0 {
                    aj = 0.0;
                    ai = diff;
                }
            } else if ai < 0.0 {
                ai = 0.0;
                aj = -diff;
            }
            // Both bounds equal C, so the box corner test reduces to the sign of diff.
            if diff > 0.0 {
                if ai > c {
                    ai = c;
                    aj = c - diff;
                }
            } else if aj > c {
                aj = c;
                ai = c + diff;
            }
        } else {
            let quad = quad_base - 2.0 * q_ij;
            let quad = if quad > 0.0 { quad } else { TAU };
            let delta = (self.gradient[i] - self.gradient[j]) / quad;
            let sum = ai + aj;
            ai -= delta;
            aj += delta;
            if sum > c {
                if ai > c {
                    ai = c;
                    aj = sum - c;
                }
            } else if aj < 0.0 {
                aj = 0.0;
                ai = sum;
            }
            if sum > c {
                if aj > c {
                    aj = c;
                    ai = sum - c;
                }
            } else if ai < 0.0 {
                ai = 0.0;
                aj = sum;
            }
        }

        self.alpha[i] = ai;
        self.alpha[j] = aj;
        let delta_i = ai - old_ai;
        let delta_j = aj - old_aj;
        for k in 0..self.y.len() {
            self.gradient[k] += self.q(i, k) * delta_i + self.q(j, k) * delta_j;
        }
    }

    /// Bias from free support vectors, or the midpoint of the feasible interval when
    /// every multiplier sits at a bound.
    fn rho(&self) -> f64 {
        let mut upper = f64::INFINITY;
        let mut lower = f64::NEG_INFINITY;
        let mut free_count = 0usize;
        let mut free_sum = 0.0;
        for i in 0..self.y.len() {
            let y_grad = self.y[i] * self.gradient[i];
            if self.is_upper_bound(i) {
                if self.y[i] < 0.0 {
                    upper = upper.min(y_grad);
                } else {
                    lower = lower.max(y_grad);
                }
            } else if self.is_lower_bound(i) {
                if self.y[i] > 0.0 {
                    upper = upper.min(y_grad);
                } else {
                    lower = lower.max(y_grad);
                }
            } else {
                free_count += 1;
                free_sum += y_grad;
            }
        }
        if free_count > 0 {
            free_sum / free_count as f64
        } else {
            (upper + lower) / 2.0
        }
    }
}

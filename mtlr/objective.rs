// mtlr/objective.rs

//! # Regularized MTLR Likelihood
//!
//! The weight matrix `W` has shape `(p + 1) x m`: row 0 holds the per-boundary biases,
//! rows `1..=p` the feature weights, and column `j` belongs to boundary `t_{j+1}`. For a
//! subject with linear scores `a_j = w_j . [1, x]`, transition index `k` receives the
//! score `s_k = a_k + ... + a_{m-1}` (with `s_m = 0`), and
//!
//! ```text
//! log L = logsumexp_{k in window} s_k - logsumexp_{k in 0..=m} s_k
//! ```
//!
//! Exact observations have a one-element window; censored ones marginalize over every
//! admissible transition. Both sums are evaluated with a single reverse pass per subject.
//!
//! The penalty acts on feature weights only:
//!
//! ```text
//! R(W) = 1 / (2 C1) * sum_j |theta_j|^2 + C1 * kappa / 2 * sum_j |theta_{j+1} - theta_j|^2
//! ```
//!
//! The second term is a first-order difference penalty along the time axis, which ties
//! neighbouring regressors together. The objective handed to the optimizer is
//! `(-sum_i log L_i + R(W)) / N`.

use crate::encode::TransitionWindow;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectiveError {
    #[error("Parameter vector has length {found}, but the objective expects {expected}.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error(
        "The objective evaluated to a non-finite value ({value}); no training signal can be trusted."
    )]
    NonFinite { value: f64 },
}

/// Value and gradient of an objective at one parameter vector.
#[derive(Debug, Clone)]
pub struct ObjectiveState {
    pub value: f64,
    pub gradient: Array1<f64>,
}

/// A smooth objective over a flat parameter vector.
pub trait Objective {
    fn dim(&self) -> usize;
    fn evaluate(&self, params: &Array1<f64>) -> Result<ObjectiveState, ObjectiveError>;
}

/// Strengths of the ridge and adjacent-column difference penalties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    pub c1: f64,
    pub smoothness: f64,
}

impl Penalty {
    pub fn new(c1: f64, smoothness: f64) -> Self {
        Self { c1, smoothness }
    }

    #[inline]
    pub fn ridge_weight(&self) -> f64 {
        1.0 / self.c1
    }

    #[inline]
    pub fn difference_weight(&self) -> f64 {
        self.c1 * self.smoothness
    }
}

/// First-order difference penalty `S = D'D` over `num_columns` time columns.
///
/// With fewer than two columns there is nothing to difference and `S` is zero.
pub fn difference_penalty_matrix(num_columns: usize) -> Array2<f64> {
    if num_columns < 2 {
        return Array2::zeros((num_columns, num_columns));
    }
    let eye = Array2::<f64>::eye(num_columns);
    let d = &eye.slice(s![1.., ..]) - &eye.slice(s![..-1, ..]);
    d.t().dot(&d)
}

/// Numerically stable `log(sum(exp(values)))`.
#[inline]
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Fills `scores[k] = a[k] + ... + a[m-1]` for `k` in `0..=m`.
#[inline]
pub fn transition_scores(linear: ArrayView1<f64>, scores: &mut [f64]) {
    let m = linear.len();
    scores[m] = 0.0;
    for k in (0..m).rev() {
        scores[k] = scores[k + 1] + linear[k];
    }
}

/// Linear scores `X W_features + b` for every subject and boundary.
pub fn linear_scores(x: ArrayView2<f64>, weights: ArrayView2<f64>) -> Array2<f64> {
    let mut linear = x.dot(&weights.slice(s![1.., ..]));
    linear += &weights.row(0);
    linear
}

/// Per-subject log-likelihood and its derivative with respect to the linear scores.
///
/// `grad_linear[c]` receives `d(-log L)/d a_c = P_all(k <= c) - P_window(k <= c)`.
fn subject_term(
    linear: ArrayView1<f64>,
    window: TransitionWindow,
    scores: &mut [f64],
    grad_linear: Option<&mut [f64]>,
) -> f64 {
    let m = linear.len();
    transition_scores(linear, scores);
    let log_norm = log_sum_exp(&scores[..=m]);
    let log_window = log_sum_exp(&scores[window.first..=window.last]);

    if let Some(grad) = grad_linear {
        let mut cum_all = 0.0;
        let mut cum_window = 0.0;
        for c in 0..m {
            cum_all += (scores[c] - log_norm).exp();
            if window.contains(c) {
                cum_window += (scores[c] - log_window).exp();
            }
            // Past the window every admissible transition has been counted.
            let window_mass = if c >= window.last { 1.0 } else { cum_window };
            grad[c] = cum_all.min(1.0) - window_mass;
        }
    }

    log_window - log_norm
}

/// Log-likelihood of each subject under `weights` (unpenalized).
pub fn log_likelihoods(
    x: ArrayView2<f64>,
    windows: &[TransitionWindow],
    weights: ArrayView2<f64>,
) -> Array1<f64> {
    let linear = linear_scores(x, weights);
    let mut scores = vec![0.0; weights.ncols() + 1];
    linear
        .outer_iter()
        .zip(windows.iter())
        .map(|(row, &window)| subject_term(row, window, &mut scores, None))
        .collect()
}

/// The full MTLR training objective.
pub struct MtlrObjective<'a> {
    x: ArrayView2<'a, f64>,
    windows: &'a [TransitionWindow],
    num_points: usize,
    penalty: Penalty,
    difference: Array2<f64>,
}

impl<'a> MtlrObjective<'a> {
    pub fn new(
        x: ArrayView2<'a, f64>,
        windows: &'a [TransitionWindow],
        num_points: usize,
        penalty: Penalty,
    ) -> Self {
        Self {
            x,
            windows,
            num_points,
            penalty,
            difference: difference_penalty_matrix(num_points),
        }
    }

    #[inline]
    pub fn num_features(&self) -> usize {
        self.x.ncols()
    }

    #[inline]
    pub fn weight_shape(&self) -> (usize, usize) {
        (self.num_features() + 1, self.num_points)
    }

    /// Reshapes a flat parameter vector into the weight matrix.
    pub fn weights_from_params(&self, params: &Array1<f64>) -> Result<Array2<f64>, ObjectiveError> {
        let (rows, cols) = self.weight_shape();
        if params.len() != rows * cols {
            return Err(ObjectiveError::DimensionMismatch {
                expected: rows * cols,
                found: params.len(),
            });
        }
        Ok(Array2::from_shape_fn((rows, cols), |(r, c)| params[r * cols + c]))
    }

    /// Penalty value and its gradient for the full weight matrix (bias row untouched).
    fn penalty_terms(&self, weights: ArrayView2<f64>) -> (f64, Array2<f64>) {
        let theta = weights.slice(s![1.., ..]);
        let ridge = self.penalty.ridge_weight();
        let diff = self.penalty.difference_weight();
        let theta_s = theta.dot(&self.difference);

        let value = 0.5 * ridge * theta.iter().map(|v| v * v).sum::<f64>()
            + 0.5 * diff * (&theta * &theta_s).sum();

        let mut grad = Array2::<f64>::zeros(weights.raw_dim());
        grad.slice_mut(s![1.., ..])
            .assign(&(&theta * ridge + &theta_s * diff));
        (value, grad)
    }
}

impl Objective for MtlrObjective<'_> {
    fn dim(&self) -> usize {
        let (rows, cols) = self.weight_shape();
        rows * cols
    }

    fn evaluate(&self, params: &Array1<f64>) -> Result<ObjectiveState, ObjectiveError> {
        let weights = self.weights_from_params(params)?;
        let n = self.windows.len().max(1) as f64;
        let m = self.num_points;

        let linear = linear_scores(self.x, weights.view());
        let mut grad_linear = Array2::<f64>::zeros(linear.raw_dim());
        let mut scores = vec![0.0; m + 1];
        let mut subject_grad = vec![0.0; m];
        let mut neg_log_lik = 0.0;
        for ((row, &window), mut grad_row) in linear
            .outer_iter()
            .zip(self.windows.iter())
            .zip(grad_linear.outer_iter_mut())
        {
            neg_log_lik -= subject_term(row, window, &mut scores, Some(&mut subject_grad[..]));
            grad_row.assign(&ArrayView1::from(&subject_grad[..]));
        }

        let (penalty_value, mut gradient) = self.penalty_terms(weights.view());
        let value = (neg_log_lik + penalty_value) / n;
        if !value.is_finite() {
            return Err(ObjectiveError::NonFinite { value });
        }

        gradient
            .row_mut(0)
            .scaled_add(1.0, &grad_linear.sum_axis(Axis(0)));
        gradient
            .slice_mut(s![1.., ..])
            .scaled_add(1.0, &self.x.t().dot(&grad_linear));
        gradient.mapv_inplace(|g| g / n);

        Ok(ObjectiveState {
            value,
            gradient: Array1::from_iter(gradient.iter().copied()),
        })
    }
}

/// Optimizes a subset of another objective's parameters, holding the rest fixed.
pub struct Restricted<'a, O: Objective> {
    inner: &'a O,
    template: Array1<f64>,
    active: Vec<usize>,
}

impl<'a, O: Objective> Restricted<'a, O> {
    pub fn new(inner: &'a O, template: Array1<f64>, active: Vec<usize>) -> Self {
        Self {
            inner,
            template,
            active,
        }
    }

    /// Scatters the active parameters into a copy of the template.
    pub fn expand(&self, params: &Array1<f64>) -> Array1<f64> {
        let mut full = self.template.clone();
        for (&idx, &value) in self.active.iter().zip(params.iter()) {
            full[idx] = value;
        }
        full
    }

    pub fn initial(&self) -> Array1<f64> {
        self.active.iter().map(|&idx| self.template[idx]).collect()
    }
}

impl<O: Objective> Objective for Restricted<'_, O> {
    fn dim(&self) -> usize {
        self.active.len()
    }

    fn evaluate(&self, params: &Array1<f64>) -> Result<ObjectiveState, ObjectiveError> {
        if params.len() != self.active.len() {
            return Err(ObjectiveError::DimensionMismatch {
                expected: self.active.len(),
                found: params.len(),
            });
        }
        let state = self.inner.evaluate(&self.expand(params))?;
        Ok(ObjectiveState {
            value: state.value,
            gradient: self.active.iter().map(|&idx| state.gradient[idx]).collect(),
        })
    }
}

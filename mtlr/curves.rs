// mtlr/curves.rs

//! Turns a fitted weight matrix into per-subject survival curves.
//!
//! For one subject the transition index `k` has probability `softmax_k(s_k)` and
//! survival past boundary `t_j` is the tail mass `S(t_j) = sum_{k >= j} P(k)`.

use crate::model::{ModelError, MtlrModel};
use crate::objective::{linear_scores, log_sum_exp, transition_scores};
use crate::smooth::SmoothError;
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, Zip, s};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Feature value in row {row}, column {column} is not finite.")]
    NonFiniteFeature { row: usize, column: usize },

    #[error("Query time {value} is not finite.")]
    NonFiniteTime { value: f64 },

    #[error("Got {times} evaluation times for {rows} rows.")]
    TimeCountMismatch { times: usize, rows: usize },

    #[error("Could not smooth a predicted curve: {0}")]
    Smooth(#[from] SmoothError),
}

/// Query rows whose features fall outside the ranges seen in training, and query
/// times past the last grid point.
///
/// Predictions are still produced; this is informational.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "{} of {total} rows have features outside the training range and {} query times lie past the last grid point {grid_end}.",
    .rows.len(),
    .times.len()
)]
pub struct PredictionRangeWarning {
    pub rows: Vec<usize>,
    pub total: usize,
    /// Query times where survival is extrapolated rather than interpolated.
    pub times: Vec<f64>,
    pub grid_end: f64,
}

impl PredictionRangeWarning {
    /// `None` when nothing is out of range; otherwise the warning, already logged.
    pub fn check(rows: Vec<usize>, total: usize, times: Vec<f64>, grid_end: f64) -> Option<Self> {
        if rows.is_empty() && times.is_empty() {
            return None;
        }
        let warning = Self {
            rows,
            total,
            times,
            grid_end,
        };
        log::warn!("{warning}");
        Some(warning)
    }
}

/// Survival curves for a batch of subjects, one column per subject.
///
/// Column 0 holds the boundaries `[0, t_1, ..., t_m]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivalCurveMatrix {
    data: Array2<f64>,
}

impl SurvivalCurveMatrix {
    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.data.column(0)
    }

    pub fn num_curves(&self) -> usize {
        self.data.ncols() - 1
    }

    pub fn curve(&self, subject: usize) -> ArrayView1<'_, f64> {
        self.data.column(subject + 1)
    }
}

#[derive(Debug, Clone)]
pub struct CurvePrediction {
    pub curves: SurvivalCurveMatrix,
    pub range_warning: Option<PredictionRangeWarning>,
}

/// Predicts a survival curve for every row of raw (unstandardized) `features`.
pub fn predict_curves(
    model: &MtlrModel,
    features: ArrayView2<f64>,
) -> Result<CurvePrediction, PredictionError> {
    let curves = survival_curves(model, features)?;
    let range_warning = PredictionRangeWarning::check(
        model.rows_outside_training_range(features),
        features.nrows(),
        Vec::new(),
        model.time_grid.last(),
    );
    Ok(CurvePrediction {
        curves,
        range_warning,
    })
}

/// Curves without the range check, for callers that report their own warning.
pub(crate) fn survival_curves(
    model: &MtlrModel,
    features: ArrayView2<f64>,
) -> Result<SurvivalCurveMatrix, PredictionError> {
    if let Some(((row, column), _)) = features.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(PredictionError::NonFiniteFeature { row, column });
    }
    let x = model.standardize(features)?;
    let linear = linear_scores(x.view(), model.weights.view());

    let m = model.num_points();
    let mut survival = Array2::<f64>::zeros((features.nrows(), m + 1));
    Zip::from(survival.rows_mut())
        .and(linear.rows())
        .par_for_each(|out, row| survival_from_linear(row, out));

    let mut data = Array2::<f64>::zeros((m + 1, features.nrows() + 1));
    data.column_mut(0)
        .assign(&ArrayView1::from(&model.time_grid.boundaries()[..]));
    data.slice_mut(s![.., 1..]).assign(&survival.t());
    Ok(SurvivalCurveMatrix { data })
}

/// Writes `S(t_0), ..., S(t_m)` for one subject given its linear scores.
fn survival_from_linear(linear: ArrayView1<f64>, mut out: ArrayViewMut1<f64>) {
    let m = linear.len();
    let mut scores = vec![0.0; m + 1];
    transition_scores(linear, &mut scores);
    let log_norm = log_sum_exp(&scores);

    let mut tail = 0.0;
    for j in (0..=m).rev() {
        tail += (scores[j] - log_norm).exp();
        out[j] = tail;
    }
    out[0] = 1.0;

    let mut running = 1.0_f64;
    for value in out.iter_mut() {
        running = running.min(value.clamp(0.0, 1.0));
        *value = running;
    }
}

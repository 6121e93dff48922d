// mtlr/stats.rs

//! Point statistics derived from predicted survival curves.
//!
//! Inside the time grid every statistic reads the monotone cubic interpolant of the
//! curve. Past the last grid point `t_m` the curve is continued along the straight
//! line from `(0, 1)` through `(t_m, S(t_m))` until it reaches zero.

use crate::curves::{PredictionError, PredictionRangeWarning, survival_curves};
use crate::model::MtlrModel;
use crate::smooth::MonotoneCurve;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

const MEDIAN_LEVEL: f64 = 0.5;
const BISECTION_STEPS: usize = 200;

/// Which summary of each predicted curve to report.
///
/// There are two probability lookups. `ProbAtEvent` takes one query time per subject
/// (the per-subject "probability at time" of the R `predict` interface). `ProbAtTime`
/// evaluates a shared list of times for every subject and gives one column per time.
#[derive(Debug, Clone, PartialEq)]
pub enum Statistic {
    Mean,
    Median,
    /// Survival probability at each of these times, for every subject.
    ProbAtTime(Vec<f64>),
    /// Survival probability of subject `i` at its own time `times[i]`.
    ProbAtEvent(Vec<f64>),
}

impl Statistic {
    /// Output column names, one per value reported for a subject.
    pub fn column_names(&self) -> Vec<String> {
        match self {
            Statistic::Mean => vec!["mean_survival_time".to_string()],
            Statistic::Median => vec!["median_survival_time".to_string()],
            Statistic::ProbAtTime(times) => times.iter().map(|t| format!("survival_at_{t}")).collect(),
            Statistic::ProbAtEvent(_) => vec!["survival_at_event".to_string()],
        }
    }

    fn query_times(&self) -> &[f64] {
        match self {
            Statistic::ProbAtTime(times) | Statistic::ProbAtEvent(times) => times,
            Statistic::Mean | Statistic::Median => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatisticPrediction {
    pub columns: Vec<String>,
    /// One row per subject, one column per entry of `columns`.
    pub values: Array2<f64>,
    pub range_warning: Option<PredictionRangeWarning>,
}

/// Predicts `statistic` for every row of raw `features`.
pub fn predict_statistic(
    model: &MtlrModel,
    features: ArrayView2<f64>,
    statistic: &Statistic,
) -> Result<StatisticPrediction, PredictionError> {
    if let Some(&value) = statistic.query_times().iter().find(|t| !t.is_finite()) {
        return Err(PredictionError::NonFiniteTime { value });
    }
    if let Statistic::ProbAtEvent(times) = statistic {
        if times.len() != features.nrows() {
            return Err(PredictionError::TimeCountMismatch {
                times: times.len(),
                rows: features.nrows(),
            });
        }
    }

    let curves = &survival_curves(model, features)?;
    let times = curves.times().to_vec();
    let columns = statistic.column_names();

    let rows: Vec<Vec<f64>> = (0..curves.num_curves())
        .into_par_iter()
        .map(|i| -> Result<Vec<f64>, PredictionError> {
            let curve = MonotoneCurve::new(times.clone(), curves.curve(i).to_vec())?;
            Ok(match statistic {
                Statistic::Mean => vec![mean_survival_time(&curve)],
                Statistic::Median => vec![median_survival_time(&curve)],
                Statistic::ProbAtTime(query) => query
                    .iter()
                    .map(|&t| survival_probability_at(&curve, t))
                    .collect(),
                Statistic::ProbAtEvent(query) => vec![survival_probability_at(&curve, query[i])],
            })
        })
        .collect::<Result<_, PredictionError>>()?;

    let mut values = Array2::<f64>::zeros((rows.len(), columns.len()));
    for (mut out, row) in values.outer_iter_mut().zip(rows) {
        for (slot, v) in out.iter_mut().zip(row) {
            *slot = v;
        }
    }

    let grid_end = model.time_grid.last();
    let beyond_grid = statistic
        .query_times()
        .iter()
        .copied()
        .filter(|&t| t > grid_end)
        .collect();
    let range_warning = PredictionRangeWarning::check(
        model.rows_outside_training_range(features),
        features.nrows(),
        beyond_grid,
        grid_end,
    );

    Ok(StatisticPrediction {
        columns,
        values,
        range_warning,
    })
}

/// Slope magnitude of the line from `(0, 1)` through the last point of `curve`.
pub fn extrapolation_slope(curve: &MonotoneCurve) -> f64 {
    (1.0 - curve.end_value()) / curve.end_time()
}

/// Area under the survival curve, including the extrapolated triangle past `t_m`.
pub fn mean_survival_time(curve: &MonotoneCurve) -> f64 {
    let slope = extrapolation_slope(curve);
    if slope <= 0.0 {
        return f64::INFINITY;
    }
    let last = curve.end_value();
    curve.integral() + last * last / (2.0 * slope)
}

/// First time the curve reaches one half.
pub fn median_survival_time(curve: &MonotoneCurve) -> f64 {
    let last = curve.end_value();
    if last > MEDIAN_LEVEL {
        let slope = extrapolation_slope(curve);
        if slope <= 0.0 {
            return f64::INFINITY;
        }
        return curve.end_time() + (last - MEDIAN_LEVEL) / slope;
    }

    let (times, values) = (curve.times(), curve.values());
    let j = values.partition_point(|&v| v > MEDIAN_LEVEL);
    if values[j] == MEDIAN_LEVEL || j == 0 {
        return times[j];
    }

    let (mut lo, mut hi) = (times[j - 1], times[j]);
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if curve.value(mid) > MEDIAN_LEVEL {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Survival probability at `t`, extrapolated linearly (floored at zero) past `t_m`.
pub fn survival_probability_at(curve: &MonotoneCurve, t: f64) -> f64 {
    if t <= 0.0 {
        1.0
    } else if t <= curve.end_time() {
        curve.value(t)
    } else {
        (1.0 - extrapolation_slope(curve) * t).max(0.0)
    }
}

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("A time grid needs at least one time point.")]
    Empty,

    #[error("Time point {value} at position {index} is not finite and positive.")]
    InvalidPoint { index: usize, value: f64 },

    #[error(
        "Time points must be strictly increasing, but {value} at position {index} follows {previous}."
    )]
    NotIncreasing {
        index: usize,
        previous: f64,
        value: f64,
    },

    #[error("Cannot place time points without any event times.")]
    NoEventTimes,
}

/// The ordered cut points `t_1 < ... < t_m` at which survival is modeled.
///
/// The grid is implicitly anchored at `t_0 = 0`, so a grid of `m` points has `m + 1`
/// boundaries and `m + 1` intervals (the last one open-ended).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct TimeGrid {
    points: Vec<f64>,
}

impl TimeGrid {
    pub fn new(points: Vec<f64>) -> Result<Self, GridError> {
        if points.is_empty() {
            return Err(GridError::Empty);
        }
        for (index, &value) in points.iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(GridError::InvalidPoint { index, value });
            }
            if index > 0 && value <= points[index - 1] {
                return Err(GridError::NotIncreasing {
                    index,
                    previous: points[index - 1],
                    value,
                });
            }
        }
        Ok(Self { points })
    }

    /// Default grid size for `n` subjects: `ceil(sqrt(n))`.
    pub fn default_size(n_subjects: usize) -> usize {
        ((n_subjects as f64).sqrt().ceil() as usize).max(1)
    }

    /// Places `num_points` cut points at interior quantiles of the observed times.
    ///
    /// Quantile levels are `k / (num_points + 1)` for `k = 1..=num_points`, interpolated
    /// linearly between order statistics. Coincident quantiles collapse to one point, so
    /// heavily tied data can produce a shorter grid than requested.
    pub fn from_quantiles(times: ArrayView1<f64>, num_points: usize) -> Result<Self, GridError> {
        let mut sorted: Vec<f64> = times
            .iter()
            .copied()
            .filter(|t| t.is_finite() && *t > 0.0)
            .collect();
        if sorted.is_empty() {
            return Err(GridError::NoEventTimes);
        }
        sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = sorted.len();
        let mut points: Vec<f64> = (1..=num_points.max(1))
            .map(|k| {
                let p = k as f64 / (num_points.max(1) as f64 + 1.0);
                let float_idx = (n as f64 - 1.0) * p;
                let lower_idx = float_idx.floor() as usize;
                let upper_idx = float_idx.ceil() as usize;
                if lower_idx == upper_idx {
                    sorted[lower_idx]
                } else {
                    let fraction = float_idx - lower_idx as f64;
                    sorted[lower_idx] * (1.0 - fraction) + sorted[upper_idx] * fraction
                }
            })
            .collect();
        points.dedup_by(|a, b| (*a - *b).abs() <= f64::EPSILON * b.abs().max(1.0));
        Self::new(points)
    }

    /// Number of cut points `m`.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    #[inline]
    pub fn last(&self) -> f64 {
        self.points[self.points.len() - 1]
    }

    /// `[0, t_1, ..., t_m]`.
    pub fn boundaries(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.points.len() + 1);
        out.push(0.0);
        out.extend_from_slice(&self.points);
        out
    }

    /// `#{j : t_j < time}`.
    #[inline]
    pub fn count_below(&self, time: f64) -> usize {
        self.points.partition_point(|&t| t < time)
    }

    /// `#{j : t_j <= time}`.
    #[inline]
    pub fn count_at_or_below(&self, time: f64) -> usize {
        self.points.partition_point(|&t| t <= time)
    }
}

impl TryFrom<Vec<f64>> for TimeGrid {
    type Error = GridError;

    fn try_from(points: Vec<f64>) -> Result<Self, Self::Error> {
        TimeGrid::new(points)
    }
}

impl From<TimeGrid> for Vec<f64> {
    fn from(grid: TimeGrid) -> Self {
        grid.points
    }
}

//! Sequence encoding of survival records over a time grid.
//!
//! A subject whose event falls in `(t_k, t_{k+1}]` (with `t_0 = 0`, `t_{m+1} = inf`) has
//! the label sequence "alive at `t_0..t_k`, dead at `t_{k+1}..t_m`", so the sequence is
//! determined by the single transition index `k` in `0..=m`. Censoring leaves `k`
//! partially unknown; the admissible values always form a contiguous window, which is
//! all the likelihood needs to marginalize over them.

use crate::data::{CensorType, SurvivalRecord};
use crate::grid::TimeGrid;
use ndarray::Array2;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error(
        "Unrecognized censoring code {0}; expected 0 (right), 1 (event), 2 (left) or 3 (interval)."
    )]
    UnknownCensorCode(i64),

    #[error("Unrecognized censoring label '{0}'.")]
    UnknownCensorLabel(String),

    #[error("Subject {subject} has time {time}, which cannot be placed on the time grid.")]
    Unrepresentable { subject: usize, time: f64 },

    #[error("Interval-censored subject {subject} has no upper bound.")]
    MissingUpperBound { subject: usize },

    #[error(
        "Interval-censored subject {subject} has bounds ({lower}, {upper}] that admit no transition."
    )]
    EmptyWindow {
        subject: usize,
        lower: f64,
        upper: f64,
    },
}

/// The contiguous range of transition indices consistent with one subject's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionWindow {
    pub first: usize,
    pub last: usize,
}

impl TransitionWindow {
    #[inline]
    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    #[inline]
    pub fn contains(&self, k: usize) -> bool {
        (self.first..=self.last).contains(&k)
    }
}

fn placeable(time: f64, subject: usize) -> Result<f64, EncodingError> {
    if time.is_finite() && time > 0.0 {
        Ok(time)
    } else {
        Err(EncodingError::Unrepresentable { subject, time })
    }
}

/// Encodes a single record. Times past the last grid point clip to the open-ended
/// final interval.
pub fn encode_record(
    record: &SurvivalRecord,
    grid: &TimeGrid,
    subject: usize,
) -> Result<TransitionWindow, EncodingError> {
    let m = grid.len();
    let time = placeable(record.time, subject)?;
    let window = match record.censor {
        CensorType::Uncensored => {
            let k = grid.count_below(time);
            TransitionWindow { first: k, last: k }
        }
        CensorType::Right => TransitionWindow {
            first: grid.count_at_or_below(time),
            last: m,
        },
        CensorType::Left => TransitionWindow {
            first: 0,
            last: grid.count_below(time),
        },
        CensorType::Interval => {
            let upper = record
                .upper
                .ok_or(EncodingError::MissingUpperBound { subject })?;
            let upper = placeable(upper, subject)?;
            let first = grid.count_at_or_below(time);
            let last = grid.count_below(upper);
            if first > last {
                return Err(EncodingError::EmptyWindow {
                    subject,
                    lower: time,
                    upper,
                });
            }
            TransitionWindow { first, last }
        }
    };
    Ok(window)
}

/// Encoded targets for a whole dataset.
#[derive(Debug, Clone)]
pub struct EncodedTargets {
    windows: Vec<TransitionWindow>,
    num_points: usize,
}

impl EncodedTargets {
    pub fn encode(records: &[SurvivalRecord], grid: &TimeGrid) -> Result<Self, EncodingError> {
        let windows = records
            .iter()
            .enumerate()
            .map(|(i, record)| encode_record(record, grid, i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            windows,
            num_points: grid.len(),
        })
    }

    #[inline]
    pub fn windows(&self) -> &[TransitionWindow] {
        &self.windows
    }

    /// Renders the `N x (m + 1)` alive-indicator matrix, column `j` being boundary `t_j`.
    ///
    /// Determined entries are exactly 0 or 1. Entries inside a censoring window hold the
    /// share of admissible transitions under which the subject is still alive at `t_j`.
    pub fn alive_matrix(&self) -> Array2<f64> {
        let m = self.num_points;
        let mut out = Array2::<f64>::zeros((self.windows.len(), m + 1));
        for (i, window) in self.windows.iter().enumerate() {
            let total = window.len() as f64;
            for j in 0..=m {
                // Alive at t_j exactly when the transition index is at least j.
                let alive = if j <= window.first {
                    window.len()
                } else if j > window.last {
                    0
                } else {
                    window.last - j + 1
                };
                out[[i, j]] = alive as f64 / total;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> TimeGrid {
        TimeGrid::new(vec![1.0, 2.0, 3.0, 4.0]).unwrap()
    }

    #[test]
    fn event_on_a_boundary_is_dead_from_that_boundary_on() {
        let targets = EncodedTargets::encode(&[SurvivalRecord::uncensored(2.0)], &grid()).unwrap();
        assert_eq!(targets.windows()[0], TransitionWindow { first: 1, last: 1 });
        let alive = targets.alive_matrix();
        assert_eq!(alive.row(0).to_vec(), vec![1.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn windows_follow_censoring_type() {
        let records = [
            SurvivalRecord::right(2.0),
            SurvivalRecord::right(2.5),
            SurvivalRecord::left(2.5),
            SurvivalRecord::interval(1.0, 3.5),
            SurvivalRecord::uncensored(9.0),
        ];
        let targets = EncodedTargets::encode(&records, &grid()).unwrap();
        let windows = targets.windows();
        assert_eq!(windows[0], TransitionWindow { first: 2, last: 4 });
        assert_eq!(windows[1], TransitionWindow { first: 2, last: 4 });
        assert_eq!(windows[2], TransitionWindow { first: 0, last: 2 });
        assert_eq!(windows[3], TransitionWindow { first: 1, last: 3 });
        assert_eq!(windows[4], TransitionWindow { first: 4, last: 4 });
    }

    #[test]
    fn censored_rows_render_soft_targets() {
        let targets = EncodedTargets::encode(&[SurvivalRecord::right(2.0)], &grid()).unwrap();
        let alive = targets.alive_matrix();
        // Fixed alive up to the censoring time, marginalized afterwards.
        assert_eq!(alive[[0, 0]], 1.0);
        assert_eq!(alive[[0, 2]], 1.0);
        assert!((alive[[0, 3]] - 2.0 / 3.0).abs() < 1e-12);
        assert!((alive[[0, 4]] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn non_finite_times_cannot_be_encoded() {
        let err = EncodedTargets::encode(&[SurvivalRecord::uncensored(f64::NAN)], &grid())
            .unwrap_err();
        assert!(matches!(err, EncodingError::Unrepresentable { subject: 0, .. }));

        let err = encode_record(&SurvivalRecord::interval(1.0, f64::INFINITY), &grid(), 3)
            .unwrap_err();
        assert!(matches!(err, EncodingError::Unrepresentable { subject: 3, .. }));
    }
}

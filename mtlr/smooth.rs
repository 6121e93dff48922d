// mtlr/smooth.rs

//! Monotone cubic interpolation of a discrete survival curve.
//!
//! Slopes follow Fritsch–Carlson: interior nodes take a weighted harmonic mean of the
//! neighbouring secants (zero where the secants disagree in sign or vanish), and the
//! end slopes come from a one-sided three-point formula limited to three times the
//! end secant. With those slopes a piecewise cubic Hermite interpolant never
//! overshoots the data, so a non-increasing curve stays non-increasing.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SmoothError {
    #[error("At least two nodes are required, got {0}.")]
    TooFewNodes(usize),
    #[error("Got {times} times but {values} values.")]
    LengthMismatch { times: usize, values: usize },
    #[error("Node times must be finite and strictly increasing (position {0}).")]
    NotIncreasing(usize),
}

#[derive(Debug, Clone)]
pub struct MonotoneCurve {
    times: Vec<f64>,
    values: Vec<f64>,
    slopes: Vec<f64>,
}

impl MonotoneCurve {
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Result<Self, SmoothError> {
        if times.len() != values.len() {
            return Err(SmoothError::LengthMismatch {
                times: times.len(),
                values: values.len(),
            });
        }
        if times.len() < 2 {
            return Err(SmoothError::TooFewNodes(times.len()));
        }
        for i in 0..times.len() {
            let increasing = i == 0 || times[i] > times[i - 1];
            if !times[i].is_finite() || !increasing {
                return Err(SmoothError::NotIncreasing(i));
            }
        }
        let slopes = pchip_slopes(&times, &values);
        Ok(Self {
            times,
            values,
            slopes,
        })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn end_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn end_value(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// Interpolated value, held constant outside the node range and clamped to `[0, 1]`.
    pub fn value(&self, t: f64) -> f64 {
        let last = self.times.len() - 1;
        if t <= self.times[0] {
            return self.values[0];
        }
        if t >= self.times[last] {
            return self.values[last];
        }
        // First node strictly after t; t lies in [times[i - 1], times[i]).
        let i = self.times.partition_point(|&x| x <= t);
        if self.times[i - 1] == t {
            return self.values[i - 1];
        }
        hermite(
            self.times[i - 1],
            self.times[i],
            self.values[i - 1],
            self.values[i],
            self.slopes[i - 1],
            self.slopes[i],
            t,
        )
        .clamp(0.0, 1.0)
    }

    /// Exact integral of the interpolant between the first and last node.
    pub fn integral(&self) -> f64 {
        (1..self.times.len())
            .map(|i| {
                let h = self.times[i] - self.times[i - 1];
                h * (self.values[i - 1] + self.values[i]) / 2.0
                    + h * h * (self.slopes[i - 1] - self.slopes[i]) / 12.0
            })
            .sum()
    }
}

fn pchip_slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / h[i]).collect();
    if n == 2 {
        return vec![delta[0], delta[0]];
    }

    let mut d = vec![0.0; n];
    for k in 1..n - 1 {
        if delta[k - 1] * delta[k] > 0.0 {
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            d[k] = (w1 + w2) / (w1 / delta[k - 1] + w2 / delta[k]);
        }
    }
    d[0] = end_slope(h[0], h[1], delta[0], delta[1]);
    d[n - 1] = end_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);
    d
}

/// One-sided three-point slope at an end node, limited so the end segment stays monotone.
fn end_slope(h0: f64, h1: f64, delta0: f64, delta1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * delta0 - h0 * delta1) / (h0 + h1);
    if d * delta0 <= 0.0 {
        0.0
    } else if d.abs() > 3.0 * delta0.abs() {
        3.0 * delta0
    } else {
        d
    }
}

#[inline]
fn hermite(x0: f64, x1: f64, y0: f64, y1: f64, m0: f64, m1: f64, t: f64) -> f64 {
    let h = x1 - x0;
    let s = (t - x0) / h;
    let s2 = s * s;
    let s3 = s2 * s;
    (2.0 * s3 - 3.0 * s2 + 1.0) * y0
        + (s3 - 2.0 * s2 + s) * h * m0
        + (-2.0 * s3 + 3.0 * s2) * y1
        + (s3 - s2) * h * m1
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn survival_like() -> MonotoneCurve {
        MonotoneCurve::new(
            vec![0.0, 1.0, 2.5, 3.0, 6.0],
            vec![1.0, 0.9, 0.9, 0.4, 0.05],
        )
        .unwrap()
    }

    #[test]
    fn nodes_are_reproduced_exactly() {
        let curve = survival_like();
        for (&t, &v) in curve.times().iter().zip(curve.values()) {
            assert_eq!(curve.value(t), v);
        }
    }

    #[test]
    fn interpolant_is_non_increasing_and_bounded() {
        let curve = survival_like();
        let mut previous = curve.value(0.0);
        for step in 1..=600 {
            let t = step as f64 * 0.01;
            let v = curve.value(t);
            assert!(v <= previous + 1e-12, "rose at t = {t}");
            assert!((0.0..=1.0).contains(&v));
            previous = v;
        }
    }

    #[test]
    fn flat_stretch_stays_flat() {
        let curve = survival_like();
        for t in [1.2, 1.7, 2.3] {
            assert_abs_diff_eq!(curve.value(t), 0.9, epsilon = 1e-12);
        }
    }

    #[test]
    fn integral_of_a_line_is_exact() {
        let curve = MonotoneCurve::new(vec![0.0, 1.0, 2.0, 4.0], vec![1.0, 0.75, 0.5, 0.0]).unwrap();
        assert_abs_diff_eq!(curve.integral(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn integral_matches_numerical_quadrature() {
        let curve = survival_like();
        let steps = 60_000;
        let width = curve.end_time() / steps as f64;
        let riemann: f64 = (0..steps)
            .map(|i| curve.value((i as f64 + 0.5) * width) * width)
            .sum();
        assert_abs_diff_eq!(curve.integral(), riemann, epsilon = 1e-6);
    }

    #[test]
    fn rejects_unsorted_times() {
        let err = MonotoneCurve::new(vec![0.0, 2.0, 1.0], vec![1.0, 0.5, 0.2]).unwrap_err();
        assert_eq!(err, SmoothError::NotIncreasing(2));
    }
}

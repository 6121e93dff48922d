use crate::objective::Penalty;
use crate::optimizer::OptimizerOptions;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("C1 must be finite and positive, but was {0}.")]
    InvalidC1(f64),
    #[error("The smoothness weight must be finite and non-negative, but was {0}.")]
    InvalidSmoothness(f64),
    #[error("The convergence tolerance must be finite and positive, but was {0}.")]
    InvalidTolerance(f64),
    #[error("At least one time interval is required.")]
    NoIntervals,
}

/// Everything that controls a single MTLR fit.
///
/// Missing keys in a TOML file fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Regularization strength. Small values shrink weights toward zero; large values
    /// let the adjacent-column smoothness term dominate.
    pub c1: f64,
    /// Relative weight of the difference penalty between neighbouring time columns.
    pub smoothness: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Explicit time grid. When absent the quantile heuristic is used.
    pub time_points: Option<Vec<f64>>,
    /// Grid size for the quantile heuristic; defaults to `ceil(sqrt(N))`.
    pub num_intervals: Option<usize>,
    /// Center and scale features before fitting.
    pub standardize: bool,
    /// Fit the per-boundary biases alone first and start from them.
    pub train_biases: bool,
    /// Fit on uncensored subjects first and start the full fit from that solution.
    pub train_uncensored: bool,
    /// Starting weights, shape `(p + 1) x m`, in standardized feature units.
    #[serde(skip)]
    pub warm_start: Option<Array2<f64>>,
}

impl Default for FitConfig {
    fn default() -> Self {
        let optimizer = OptimizerOptions::default();
        Self {
            c1: 1.0,
            smoothness: 1.0,
            max_iterations: optimizer.max_iterations,
            tolerance: optimizer.tolerance,
            time_points: None,
            num_intervals: None,
            standardize: true,
            train_biases: true,
            train_uncensored: true,
            warm_start: None,
        }
    }
}

impl FitConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: FitConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.c1.is_finite() || self.c1 <= 0.0 {
            return Err(ConfigError::InvalidC1(self.c1));
        }
        if !self.smoothness.is_finite() || self.smoothness < 0.0 {
            return Err(ConfigError::InvalidSmoothness(self.smoothness));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ConfigError::InvalidTolerance(self.tolerance));
        }
        if self.num_intervals == Some(0) {
            return Err(ConfigError::NoIntervals);
        }
        Ok(())
    }

    pub fn penalty(&self) -> Penalty {
        Penalty::new(self.c1, self.smoothness)
    }

    pub fn optimizer_options(&self) -> OptimizerOptions {
        OptimizerOptions {
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
            ..OptimizerOptions::default()
        }
    }

    /// The same settings with a different C1, as used when scanning candidates.
    pub fn with_c1(&self, c1: f64) -> Self {
        Self {
            c1,
            ..self.clone()
        }
    }
}

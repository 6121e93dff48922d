// mtlr/estimate.rs

//! # Model Estimation
//!
//! Orchestrates a complete MTLR fit:
//!
//! 1.  **Time grid:** caller-supplied points, or `ceil(sqrt(N))` interior quantiles of
//!     the observed times. Chosen once here and frozen into the model.
//! 2.  **Standardization:** features are centered and scaled so one C1 means the same
//!     thing for every column.
//! 3.  **Encoding:** every record becomes a window of admissible transition points.
//! 4.  **Warm starts:** unless the caller supplies starting weights, the biases are fit
//!     alone first, then all weights are fit on the uncensored subjects, and that
//!     solution seeds the final fit.
//! 5.  **Joint optimization:** one BFGS run over the whole flattened weight matrix, so
//!     the coupling between time columns is never broken into per-column fits.

use crate::config::{ConfigError, FitConfig};
use crate::data::SurvivalData;
use crate::encode::{EncodedTargets, EncodingError, TransitionWindow};
use crate::grid::{GridError, TimeGrid};
use crate::model::{FeatureScaling, MtlrModel, TrainingSummary};
use crate::objective::{MtlrObjective, Objective, ObjectiveError, Restricted};
use crate::optimizer::{
    ConvergenceWarning, OptimizationResult, OptimizerError, OptimizerOptions, minimize,
};
use ndarray::{Array1, ArrayView2, Axis};
use thiserror::Error;

/// A comprehensive error type for the model fitting process.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("Invalid fit configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not build the time grid: {0}")]
    Grid(#[from] GridError),

    #[error("Could not encode survival records: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Objective(#[from] ObjectiveError),

    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    #[error("Warm-start weights are {found:?}, but this fit needs {expected:?}.")]
    WarmStartShape {
        found: (usize, usize),
        expected: (usize, usize),
    },
}

/// A fitted model plus any convergence problem the caller should know about.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub model: MtlrModel,
    pub warning: Option<ConvergenceWarning>,
}

/// Fits an MTLR model to `data`.
pub fn fit(data: &SurvivalData, config: &FitConfig) -> Result<FitOutcome, FitError> {
    config.validate()?;
    let n_censored = data
        .records()
        .iter()
        .filter(|r| r.censor.is_censored())
        .count();
    log::info!(
        "Fitting MTLR on {} subjects ({} censored) with {} features, C1 = {}.",
        data.n_subjects(),
        n_censored,
        data.n_features(),
        config.c1
    );

    let grid = select_time_grid(data, config)?;
    log::info!(
        "Time grid has {} points spanning ({:.4}, {:.4}].",
        grid.len(),
        grid.points()[0],
        grid.last()
    );

    let scaling = if config.standardize {
        FeatureScaling::fit(data.features().view())
    } else {
        FeatureScaling::identity(data.n_features())
    };
    let x = scaling.apply(data.features().view());
    let targets = EncodedTargets::encode(data.records(), &grid)?;

    let objective = MtlrObjective::new(x.view(), targets.windows(), grid.len(), config.penalty());
    let uncensored = data.uncensored_indices();
    let start = internal::initial_params(
        &objective,
        x.view(),
        targets.windows(),
        &uncensored,
        config,
    )?;
    let result = minimize(&objective, start, &config.optimizer_options())?;
    let weights = objective.weights_from_params(&result.params)?;

    log::info!(
        "MTLR fit finished after {} iterations with objective {:.6}.",
        result.iterations,
        result.value
    );

    let OptimizationResult {
        value,
        iterations,
        status,
        warning,
        ..
    } = result;

    let model = MtlrModel {
        feature_names: data.feature_names().to_vec(),
        time_grid: grid,
        feature_ranges: internal::feature_ranges(data.features().view()),
        scaling,
        training: TrainingSummary {
            c1: config.c1,
            smoothness: config.smoothness,
            n_subjects: data.n_subjects(),
            n_censored,
            objective: value,
            iterations,
            status,
        },
        weights,
    };

    Ok(FitOutcome { model, warning })
}

/// The caller's time points if given, otherwise the quantile heuristic.
pub fn select_time_grid(data: &SurvivalData, config: &FitConfig) -> Result<TimeGrid, GridError> {
    match &config.time_points {
        Some(points) => TimeGrid::new(points.clone()),
        None => {
            let size = config
                .num_intervals
                .unwrap_or_else(|| TimeGrid::default_size(data.n_subjects()));
            TimeGrid::from_quantiles(data.times().view(), size)
        }
    }
}

/// Internal module for the warm-start sequence.
mod internal {
    use super::*;

    pub(super) fn feature_ranges(features: ArrayView2<f64>) -> Vec<(f64, f64)> {
        features
            .axis_iter(Axis(1))
            .map(|column| {
                let min = column.iter().copied().fold(f64::INFINITY, f64::min);
                let max = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (min, max)
            })
            .collect()
    }

    pub(super) fn initial_params(
        objective: &MtlrObjective<'_>,
        x: ArrayView2<f64>,
        windows: &[TransitionWindow],
        uncensored: &[usize],
        config: &FitConfig,
    ) -> Result<Array1<f64>, FitError> {
        let (rows, cols) = objective.weight_shape();
        if let Some(warm) = &config.warm_start {
            if warm.dim() != (rows, cols) {
                return Err(FitError::WarmStartShape {
                    found: warm.dim(),
                    expected: (rows, cols),
                });
            }
            return Ok(warm.iter().copied().collect());
        }

        let options = config.optimizer_options();
        let mut start = Array1::<f64>::zeros(objective.dim());

        if config.train_biases {
            start = fit_biases(objective, start, cols, &options)?;
        }

        if config.train_uncensored {
            if !uncensored.is_empty() && uncensored.len() < windows.len() {
                log::debug!(
                    "Pre-fitting on {} uncensored subjects.",
                    uncensored.len()
                );
                let x_exact = x.select(Axis(0), uncensored);
                let exact_windows: Vec<TransitionWindow> =
                    uncensored.iter().map(|&i| windows[i]).collect();
                let exact = MtlrObjective::new(
                    x_exact.view(),
                    &exact_windows,
                    cols,
                    config.penalty(),
                );
                start = minimize(&exact, start, &options)?.params;
            }
        }

        Ok(start)
    }

    /// Optimizes the bias row alone, with every feature weight held at its start value.
    fn fit_biases(
        objective: &MtlrObjective<'_>,
        start: Array1<f64>,
        num_points: usize,
        options: &OptimizerOptions,
    ) -> Result<Array1<f64>, FitError> {
        let biases = Restricted::new(objective, start, (0..num_points).collect());
        let result = minimize(&biases, biases.initial(), options)?;
        log::debug!(
            "Bias-only warm start reached objective {:.6}.",
            result.value
        );
        Ok(biases.expand(&result.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CensorType, SurvivalRecord};
    use ndarray::{Array2, array};

    fn small_data() -> SurvivalData {
        let features = array![
            [0.1],
            [0.9],
            [0.4],
            [1.3],
            [-0.2],
            [0.7],
            [1.1],
            [-0.5],
            [0.3],
            [0.0]
        ];
        let records = vec![
            SurvivalRecord::uncensored(4.0),
            SurvivalRecord::uncensored(1.0),
            SurvivalRecord::right(3.0),
            SurvivalRecord::uncensored(0.5),
            SurvivalRecord::uncensored(6.0),
            SurvivalRecord::left(2.0),
            SurvivalRecord::interval(0.5, 2.5),
            SurvivalRecord::right(7.0),
            SurvivalRecord::uncensored(3.5),
            SurvivalRecord::uncensored(5.0),
        ];
        SurvivalData::new(features, records, vec!["marker".to_string()]).unwrap()
    }

    #[test]
    fn fit_uses_caller_time_points() {
        let config = FitConfig {
            time_points: Some(vec![1.0, 2.0, 4.0, 6.0]),
            ..FitConfig::default()
        };
        let outcome = fit(&small_data(), &config).unwrap();
        assert_eq!(outcome.model.time_grid.points(), &[1.0, 2.0, 4.0, 6.0]);
        assert_eq!(outcome.model.weights.dim(), (2, 4));
        assert_eq!(outcome.model.training.n_censored, 4);
        assert!(outcome.model.weights.iter().all(|w| w.is_finite()));
    }

    #[test]
    fn default_grid_has_ceil_sqrt_points() {
        let data = small_data();
        let grid = select_time_grid(&data, &FitConfig::default()).unwrap();
        assert!(grid.len() <= TimeGrid::default_size(data.n_subjects()));
        assert!(grid.len() >= 2);
        assert_eq!(data.censor_types()[5], CensorType::Left);
    }

    #[test]
    fn warm_start_shape_is_checked() {
        let config = FitConfig {
            time_points: Some(vec![1.0, 2.0, 4.0]),
            warm_start: Some(Array2::zeros((3, 3))),
            ..FitConfig::default()
        };
        let err = fit(&small_data(), &config).unwrap_err();
        assert!(matches!(
            err,
            FitError::WarmStartShape {
                found: (3, 3),
                expected: (2, 3)
            }
        ));
    }

    #[test]
    fn warm_start_at_the_optimum_stays_there() {
        let base = FitConfig {
            time_points: Some(vec![1.0, 3.0, 5.0]),
            ..FitConfig::default()
        };
        let first = fit(&small_data(), &base).unwrap();
        let restarted = fit(
            &small_data(),
            &FitConfig {
                warm_start: Some(first.model.weights.clone()),
                ..base
            },
        )
        .unwrap();
        assert!(restarted.model.training.objective <= first.model.training.objective + 1e-9);
    }
}

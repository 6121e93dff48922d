// mtlr/optimizer.rs

//! BFGS minimization of an [`Objective`] over its flat parameter vector.
//!
//! Fitting is best-effort: when the solver runs out of iterations or its line search
//! stalls, the best iterate is still returned, together with a [`ConvergenceWarning`]
//! the caller is expected to surface. Only failures of the objective itself (a
//! non-finite value anywhere along the path) abort the fit.

use crate::objective::{Objective, ObjectiveError};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use thiserror::Error;
use wolfe_bfgs::{Bfgs, BfgsError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerOptions {
    /// Gradient-norm tolerance on the sample-normalized objective.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Relative objective decrease below which an iteration counts as no progress.
    pub relative_tolerance: f64,
    /// Consecutive no-progress iterations before the solver gives up.
    pub stall_iterations: usize,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iterations: 5000,
            relative_tolerance: 1e-10,
            stall_iterations: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    Converged,
    IterationCap,
    LineSearchStalled,
}

/// A fit that finished without meeting the tolerance. Never an error by itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvergenceWarning {
    #[error(
        "BFGS reached the iteration cap of {max_iterations} without meeting the tolerance; using the best iterate (objective {value:.6}, gradient norm {gradient_norm:.2e})."
    )]
    IterationCap {
        max_iterations: usize,
        value: f64,
        gradient_norm: f64,
    },

    #[error(
        "BFGS line search stalled after {iterations} iterations; using the best iterate (objective {value:.6}, gradient norm {gradient_norm:.2e})."
    )]
    LineSearchStalled {
        iterations: usize,
        value: f64,
        gradient_norm: f64,
    },
}

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Objective evaluation failed: {0}")]
    Objective(#[from] ObjectiveError),

    #[error("BFGS optimization failed: {0}")]
    Solver(String),
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub params: Array1<f64>,
    pub value: f64,
    pub iterations: usize,
    pub gradient_norm: f64,
    pub status: ConvergenceStatus,
    pub warning: Option<ConvergenceWarning>,
}

pub fn minimize<O: Objective>(
    objective: &O,
    initial: Array1<f64>,
    options: &OptimizerOptions,
) -> Result<OptimizationResult, OptimizerError> {
    if initial.len() != objective.dim() {
        return Err(ObjectiveError::DimensionMismatch {
            expected: objective.dim(),
            found: initial.len(),
        }
        .into());
    }

    let initial_state = objective.evaluate(&initial)?;
    let initial_norm = initial_state.gradient.dot(&initial_state.gradient).sqrt();
    if initial.is_empty() || initial_norm <= options.tolerance {
        return Ok(OptimizationResult {
            params: initial,
            value: initial_state.value,
            iterations: 0,
            gradient_norm: initial_norm,
            status: ConvergenceStatus::Converged,
            warning: None,
        });
    }
    log::debug!(
        "Starting BFGS with {} parameters (objective {:.6}).",
        initial.len(),
        initial_state.value
    );

    let failure: RefCell<Option<ObjectiveError>> = RefCell::new(None);
    let cost_and_grad = |params: &Array1<f64>| -> (f64, Array1<f64>) {
        match objective.evaluate(params) {
            Ok(state) => (state.value, state.gradient),
            Err(err) => {
                failure.borrow_mut().get_or_insert(err);
                (f64::INFINITY, Array1::from_elem(params.len(), f64::NAN))
            }
        }
    };

    let outcome = Bfgs::new(initial.clone(), cost_and_grad)
        .with_tolerance(options.tolerance)
        .with_max_iterations(options.max_iterations)
        .with_no_improve_stop(options.relative_tolerance, options.stall_iterations)
        .run();

    if let Some(err) = failure.into_inner() {
        return Err(err.into());
    }

    let (solution, status) = match outcome {
        Ok(solution) => (solution, ConvergenceStatus::Converged),
        Err(BfgsError::MaxIterationsReached { last_solution }) => {
            (*last_solution, ConvergenceStatus::IterationCap)
        }
        Err(BfgsError::LineSearchFailed { last_solution, .. }) => {
            (*last_solution, ConvergenceStatus::LineSearchStalled)
        }
        Err(other) => {
            return Err(OptimizerError::Solver(format!("{other:?}")));
        }
    };

    let final_state = objective.evaluate(&solution.final_point)?;
    let (params, state) = if final_state.value <= initial_state.value {
        (solution.final_point, final_state)
    } else {
        (initial, initial_state)
    };
    let gradient_norm = state.gradient.dot(&state.gradient).sqrt();

    let (status, warning) = match status {
        ConvergenceStatus::Converged => (status, None),
        _ if gradient_norm <= options.tolerance => (ConvergenceStatus::Converged, None),
        ConvergenceStatus::IterationCap => (
            status,
            Some(ConvergenceWarning::IterationCap {
                max_iterations: options.max_iterations,
                value: state.value,
                gradient_norm,
            }),
        ),
        ConvergenceStatus::LineSearchStalled => (
            status,
            Some(ConvergenceWarning::LineSearchStalled {
                iterations: solution.iterations,
                value: state.value,
                gradient_norm,
            }),
        ),
    };

    if let Some(warning) = &warning {
        log::warn!("{warning}");
    }
    log::debug!(
        "BFGS finished after {} iterations: objective {:.6}, gradient norm {:.2e}.",
        solution.iterations,
        state.value,
        gradient_norm
    );

    Ok(OptimizationResult {
        params,
        value: state.value,
        iterations: solution.iterations,
        gradient_norm,
        status,
        warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::ObjectiveState;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    struct Quadratic {
        center: Array1<f64>,
    }

    impl Objective for Quadratic {
        fn dim(&self) -> usize {
            self.center.len()
        }

        fn evaluate(&self, params: &Array1<f64>) -> Result<ObjectiveState, ObjectiveError> {
            let diff = params - &self.center;
            Ok(ObjectiveState {
                value: 0.5 * diff.dot(&diff),
                gradient: diff,
            })
        }
    }

    struct Rosenbrock;

    impl Objective for Rosenbrock {
        fn dim(&self) -> usize {
            2
        }

        fn evaluate(&self, p: &Array1<f64>) -> Result<ObjectiveState, ObjectiveError> {
            let (x, y) = (p[0], p[1]);
            Ok(ObjectiveState {
                value: (1.0 - x).powi(2) + 100.0 * (y - x * x).powi(2),
                gradient: array![
                    -2.0 * (1.0 - x) - 400.0 * x * (y - x * x),
                    200.0 * (y - x * x)
                ],
            })
        }
    }

    /// Breaks as soon as the optimizer leaves the origin.
    struct Fragile;

    impl Objective for Fragile {
        fn dim(&self) -> usize {
            1
        }

        fn evaluate(&self, p: &Array1<f64>) -> Result<ObjectiveState, ObjectiveError> {
            if p[0] != 0.0 {
                return Err(ObjectiveError::NonFinite { value: f64::NAN });
            }
            Ok(ObjectiveState {
                value: 1.0,
                gradient: array![-2.0],
            })
        }
    }

    #[test]
    fn quadratic_converges_to_center() {
        let objective = Quadratic {
            center: array![1.5, -2.0, 0.25],
        };
        let result = minimize(&objective, Array1::zeros(3), &OptimizerOptions::default()).unwrap();
        assert_eq!(result.status, ConvergenceStatus::Converged);
        assert!(result.warning.is_none());
        for (got, want) in result.params.iter().zip(objective.center.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-4);
        }
    }

    #[test]
    fn iteration_cap_returns_best_iterate_with_warning() {
        let options = OptimizerOptions {
            tolerance: 1e-10,
            max_iterations: 2,
            ..OptimizerOptions::default()
        };
        let start = array![-1.2, 1.0];
        let start_value = Rosenbrock.evaluate(&start).unwrap().value;
        let result = minimize(&Rosenbrock, start, &options).unwrap();
        assert!(result.warning.is_some());
        assert!(result.value <= start_value);
    }

    #[test]
    fn objective_failures_are_fatal() {
        let err = minimize(&Fragile, array![0.0], &OptimizerOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            OptimizerError::Objective(ObjectiveError::NonFinite { .. })
        ));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let objective = Quadratic {
            center: array![1.0],
        };
        let err = minimize(&objective, array![0.0, 0.0], &OptimizerOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            OptimizerError::Objective(ObjectiveError::DimensionMismatch { .. })
        ));
    }
}

// validate/cv.rs

//! K-fold cross-validation over candidate regularization strengths.
//!
//! The time grid is chosen once from the full dataset and shared by every fold, so
//! held-out losses for different folds and candidates are measured on the same
//! discretization.

use super::folds::{FoldAssignment, FoldError, FoldType, make_folds};
use crate::config::FitConfig;
use crate::data::SurvivalData;
use crate::estimate::{FitError, fit, select_time_grid};
use crate::grid::GridError;
use crate::model::ModelError;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CvError {
    #[error("No candidate C1 values were given.")]
    NoCandidates,

    #[error("Candidate C1 values must be finite and positive, got {0}.")]
    InvalidCandidate(f64),

    #[error(transparent)]
    Folds(#[from] FoldError),

    #[error("Could not build the shared time grid: {0}")]
    Grid(#[from] GridError),

    #[error("Fitting fold {fold} with C1 = {c1} failed: {source}")]
    Fit {
        fold: usize,
        c1: f64,
        #[source]
        source: FitError,
    },

    #[error("Scoring fold {fold} with C1 = {c1} failed: {source}")]
    Evaluation {
        fold: usize,
        c1: f64,
        #[source]
        source: ModelError,
    },
}

#[derive(Debug, Clone)]
pub struct CvConfig {
    pub candidates: Vec<f64>,
    pub nfolds: usize,
    pub fold_type: FoldType,
    pub seed: u64,
    /// Settings shared by every fold fit; its `c1` is replaced by each candidate.
    pub fit: FitConfig,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            candidates: vec![0.001, 0.01, 0.1, 1.0, 10.0, 100.0, 1000.0],
            nfolds: 5,
            fold_type: FoldType::FullStrat,
            seed: 42,
            fit: FitConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CvResult {
    pub best_c1: f64,
    pub candidates: Vec<f64>,
    /// Mean held-out negative log-likelihood per subject, aligned with `candidates`.
    pub per_candidate_loss: Vec<f64>,
    pub folds: FoldAssignment,
    /// Number of fold fits that stopped with a convergence warning.
    pub convergence_warnings: usize,
}

/// Scores every candidate C1 by k-fold cross-validation and picks the lowest loss.
pub fn cross_validate(data: &SurvivalData, config: &CvConfig) -> Result<CvResult, CvError> {
    if config.candidates.is_empty() {
        return Err(CvError::NoCandidates);
    }
    if let Some(&c1) = config
        .candidates
        .iter()
        .find(|c| !c.is_finite() || **c <= 0.0)
    {
        return Err(CvError::InvalidCandidate(c1));
    }

    let folds = make_folds(data, config.nfolds, config.fold_type, config.seed)?;
    let grid = select_time_grid(data, &config.fit)?;
    let shared = FitConfig {
        time_points: Some(grid.points().to_vec()),
        ..config.fit.clone()
    };
    log::info!(
        "Cross-validating {} C1 candidates over {} {} folds ({} grid points).",
        config.candidates.len(),
        folds.nfolds(),
        config.fold_type,
        grid.len()
    );

    let mut per_candidate_loss = Vec::with_capacity(config.candidates.len());
    let mut convergence_warnings = 0;
    for &c1 in &config.candidates {
        let fold_config = shared.with_c1(c1);
        let scores = (1..=folds.nfolds())
            .into_par_iter()
            .map(|fold| score_fold(data, &folds, fold, &fold_config))
            .collect::<Result<Vec<FoldScore>, CvError>>()?;

        let total: f64 = scores.iter().map(|s| s.held_out_nll).sum();
        let loss = total / data.n_subjects() as f64;
        convergence_warnings += scores.iter().filter(|s| s.warned).count();
        log::info!("C1 = {c1}: held-out loss {loss:.6}");
        per_candidate_loss.push(loss);
    }

    let best = per_candidate_loss
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let best_c1 = config.candidates[best];
    log::info!("Best C1 = {best_c1}.");

    Ok(CvResult {
        best_c1,
        candidates: config.candidates.clone(),
        per_candidate_loss,
        folds,
        convergence_warnings,
    })
}

struct FoldScore {
    held_out_nll: f64,
    warned: bool,
}

fn score_fold(
    data: &SurvivalData,
    folds: &FoldAssignment,
    fold: usize,
    config: &FitConfig,
) -> Result<FoldScore, CvError> {
    let train = data.subset(&folds.train_indices(fold));
    let test = data.subset(&folds.test_indices(fold));
    log::debug!(
        "Fold {fold}: training on {} subjects, holding out {}.",
        train.n_subjects(),
        test.n_subjects()
    );

    let outcome = fit(&train, config).map_err(|source| CvError::Fit {
        fold,
        c1: config.c1,
        source,
    })?;
    let log_lik = outcome
        .model
        .log_likelihood(&test)
        .map_err(|source| CvError::Evaluation {
            fold,
            c1: config.c1,
            source,
        })?;

    Ok(FoldScore {
        held_out_nll: -log_lik.sum(),
        warned: outcome.warning.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SurvivalRecord;
    use ndarray::Array2;

    fn tiny() -> SurvivalData {
        let features = Array2::from_shape_fn((6, 1), |(i, _)| i as f64);
        let records = (1..=6).map(|t| SurvivalRecord::uncensored(t as f64)).collect();
        SurvivalData::new(features, records, vec!["x".to_string()]).unwrap()
    }

    #[test]
    fn empty_candidate_list_is_rejected() {
        let config = CvConfig {
            candidates: vec![],
            ..CvConfig::default()
        };
        assert!(matches!(
            cross_validate(&tiny(), &config),
            Err(CvError::NoCandidates)
        ));
    }

    #[test]
    fn non_positive_candidate_is_rejected() {
        let config = CvConfig {
            candidates: vec![1.0, -2.0],
            ..CvConfig::default()
        };
        assert!(matches!(
            cross_validate(&tiny(), &config),
            Err(CvError::InvalidCandidate(c)) if c == -2.0
        ));
    }

    #[test]
    fn too_many_folds_is_a_fold_error() {
        let config = CvConfig {
            nfolds: 10,
            ..CvConfig::default()
        };
        assert!(matches!(
            cross_validate(&tiny(), &config),
            Err(CvError::Folds(FoldError::TooManyFolds { .. }))
        ));
    }
}

use crate::data::SurvivalData;
use crate::encode::{EncodedTargets, EncodingError};
use crate::grid::TimeGrid;
use crate::objective::log_likelihoods;
use crate::optimizer::ConvergenceStatus;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable format of a fitted model when it is
// serialized to a TOML file.

/// Per-feature centering and scaling learned from the training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaling {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl FeatureScaling {
    /// Means and sample standard deviations; constant columns keep a scale of 1.
    pub fn fit(features: ArrayView2<f64>) -> Self {
        let n = features.nrows();
        let mut means = Vec::with_capacity(features.ncols());
        let mut scales = Vec::with_capacity(features.ncols());
        for column in features.axis_iter(Axis(1)) {
            let mean = if n > 0 { column.sum() / n as f64 } else { 0.0 };
            let sd = if n > 1 {
                (column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0)).sqrt()
            } else {
                0.0
            };
            means.push(mean);
            scales.push(if sd > f64::EPSILON { sd } else { 1.0 });
        }
        Self { means, scales }
    }

    pub fn identity(num_features: usize) -> Self {
        Self {
            means: vec![0.0; num_features],
            scales: vec![1.0; num_features],
        }
    }

    pub fn apply(&self, features: ArrayView2<f64>) -> Array2<f64> {
        let mut out = features.to_owned();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, scale) = (self.means[j], self.scales[j]);
            column.mapv_inplace(|v| (v - mean) / scale);
        }
        out
    }
}

/// Summary of how the model was trained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub c1: f64,
    pub smoothness: f64,
    pub n_subjects: usize,
    pub n_censored: usize,
    pub objective: f64,
    pub iterations: usize,
    pub status: ConvergenceStatus,
}

/// The fitted, self-contained MTLR model. Read-only once fitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtlrModel {
    pub feature_names: Vec<String>,
    pub time_grid: TimeGrid,
    /// Observed `(min, max)` of each raw training feature.
    pub feature_ranges: Vec<(f64, f64)>,
    pub scaling: FeatureScaling,
    pub training: TrainingSummary,
    /// `(p + 1) x m` weights acting on standardized features; row 0 holds the biases.
    pub weights: Array2<f64>,
}

/// Custom error type for model loading, saving, and scoring.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Input has {found} feature columns, but the model was trained on {expected}.")]
    FeatureCountMismatch { found: usize, expected: usize },
    #[error(
        "Weight matrix is {rows}x{cols}, but {features} features and {points} time points require {expected_rows}x{points}."
    )]
    WeightShape {
        rows: usize,
        cols: usize,
        features: usize,
        points: usize,
        expected_rows: usize,
    },
    #[error("Could not encode evaluation records: {0}")]
    Encoding(#[from] EncodingError),
}

impl MtlrModel {
    #[inline]
    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    #[inline]
    pub fn num_points(&self) -> usize {
        self.time_grid.len()
    }

    fn check_shape(&self) -> Result<(), ModelError> {
        let expected_rows = self.num_features() + 1;
        let (rows, cols) = self.weights.dim();
        if rows != expected_rows
            || cols != self.num_points()
            || self.scaling.means.len() != self.num_features()
            || self.scaling.scales.len() != self.num_features()
        {
            return Err(ModelError::WeightShape {
                rows,
                cols,
                features: self.num_features(),
                points: self.num_points(),
                expected_rows,
            });
        }
        Ok(())
    }

    /// Applies the stored scaling to raw feature rows.
    pub fn standardize(&self, features: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        if features.ncols() != self.num_features() {
            return Err(ModelError::FeatureCountMismatch {
                found: features.ncols(),
                expected: self.num_features(),
            });
        }
        Ok(self.scaling.apply(features))
    }

    /// Rows with at least one feature outside the range seen in training.
    pub fn rows_outside_training_range(&self, features: ArrayView2<f64>) -> Vec<usize> {
        features
            .outer_iter()
            .enumerate()
            .filter(|(_, row)| {
                row.iter()
                    .zip(self.feature_ranges.iter())
                    .any(|(&v, &(lo, hi))| v < lo || v > hi)
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Unpenalized log-likelihood of each subject in `data` under this model.
    pub fn log_likelihood(&self, data: &SurvivalData) -> Result<Array1<f64>, ModelError> {
        let x = self.standardize(data.features().view())?;
        let targets = EncodedTargets::encode(data.records(), &self.time_grid)?;
        Ok(log_likelihoods(
            x.view(),
            targets.windows(),
            self.weights.view(),
        ))
    }

    /// Saves the model to a file in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a model from a TOML file, checking that its pieces fit together.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: MtlrModel = toml::from_str(&toml_string)?;
        model.check_shape()?;
        Ok(model)
    }
}

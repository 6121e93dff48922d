//! # Survival Data Loading and Validation
//!
//! Every dataset enters the core through this module. Records are validated against
//! the censoring rules, rows with missing values are removed (listwise deletion), and
//! the remaining arrays are handed to the encoder as clean `ndarray` structures.
//!
//! Tabular files are tab-separated with a fixed schema:
//!
//! - `time`: event or censoring time (lower bound for interval censoring).
//! - `status`: censoring code, `0` right, `1` event, `2` left, `3` interval.
//! - `time_upper`: upper bound, required only for interval-censored rows.
//! - `sample_id`: optional identifier, carried through to prediction output.
//!
//! Every other column is treated as a numeric feature.

use crate::encode::EncodingError;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// How much of a subject's event time was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CensorType {
    /// Event known only to happen after `time`.
    Right,
    /// Event known only to happen at or before `time`.
    Left,
    /// Event known to happen in `(time, upper]`.
    Interval,
    /// Event observed exactly at `time`.
    Uncensored,
}

impl CensorType {
    /// Decodes the conventional interval-type status codes.
    pub fn from_code(code: i64) -> Result<Self, EncodingError> {
        match code {
            0 => Ok(CensorType::Right),
            1 => Ok(CensorType::Uncensored),
            2 => Ok(CensorType::Left),
            3 => Ok(CensorType::Interval),
            other => Err(EncodingError::UnknownCensorCode(other)),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            CensorType::Right => 0,
            CensorType::Uncensored => 1,
            CensorType::Left => 2,
            CensorType::Interval => 3,
        }
    }

    #[inline]
    pub fn is_censored(self) -> bool {
        !matches!(self, CensorType::Uncensored)
    }
}

impl FromStr for CensorType {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<i64>() {
            return CensorType::from_code(code);
        }
        // Status columns written by numeric tools often carry "1.0" style codes.
        if let Ok(value) = trimmed.parse::<f64>() {
            if value.fract() == 0.0 && value.is_finite() {
                return CensorType::from_code(value as i64);
            }
            return Err(EncodingError::UnknownCensorLabel(trimmed.to_string()));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "right" => Ok(CensorType::Right),
            "left" => Ok(CensorType::Left),
            "interval" => Ok(CensorType::Interval),
            "uncensored" | "event" | "none" => Ok(CensorType::Uncensored),
            _ => Err(EncodingError::UnknownCensorLabel(trimmed.to_string())),
        }
    }
}

impl fmt::Display for CensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CensorType::Right => "right",
            CensorType::Left => "left",
            CensorType::Interval => "interval",
            CensorType::Uncensored => "uncensored",
        };
        f.write_str(label)
    }
}

/// One subject's (possibly partial) observation of its event time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurvivalRecord {
    pub time: f64,
    pub censor: CensorType,
    /// Upper bound of the interval; only meaningful for `CensorType::Interval`.
    pub upper: Option<f64>,
}

impl SurvivalRecord {
    pub fn uncensored(time: f64) -> Self {
        Self {
            time,
            censor: CensorType::Uncensored,
            upper: None,
        }
    }

    pub fn right(time: f64) -> Self {
        Self {
            time,
            censor: CensorType::Right,
            upper: None,
        }
    }

    pub fn left(time: f64) -> Self {
        Self {
            time,
            censor: CensorType::Left,
            upper: None,
        }
    }

    pub fn interval(lower: f64, upper: f64) -> Self {
        Self {
            time: lower,
            censor: CensorType::Interval,
            upper: Some(upper),
        }
    }

    /// True if any of the values this record depends on is missing (NaN).
    fn has_missing(&self) -> bool {
        if self.time.is_nan() {
            return true;
        }
        match (self.censor, self.upper) {
            (CensorType::Interval, Some(upper)) => upper.is_nan(),
            (CensorType::Interval, None) => true,
            _ => false,
        }
    }

    pub fn validate(&self, row: usize) -> Result<(), DataError> {
        if !self.time.is_finite() {
            return Err(DataError::NonFiniteValue {
                column: "time".to_string(),
                row,
            });
        }
        if self.time <= 0.0 {
            return Err(DataError::NonPositiveTime {
                row,
                time: self.time,
            });
        }
        if self.censor == CensorType::Interval {
            let upper = self.upper.ok_or(DataError::MissingUpperBound { row })?;
            if !upper.is_finite() {
                return Err(DataError::NonFiniteValue {
                    column: "time_upper".to_string(),
                    row,
                });
            }
            if self.time >= upper {
                return Err(DataError::InvalidInterval {
                    row,
                    lower: self.time,
                    upper,
                });
            }
        }
        Ok(())
    }
}

/// A comprehensive error type for data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error reading tab-separated input: {0}")]
    Csv(#[from] csv::Error),
    #[error("The required column '{0}' was not found in the input file.")]
    ColumnNotFound(String),
    #[error("Could not parse '{value}' in column '{column}' (data row {row}) as a number.")]
    ParseValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Invalid censoring status in data row {row}: {source}")]
    Status {
        row: usize,
        #[source]
        source: EncodingError,
    },
    #[error("Missing values were found in column '{0}'. Prediction requires complete rows.")]
    MissingValues(String),
    #[error("Non-finite value found in column '{column}' (row {row}).")]
    NonFiniteValue { column: String, row: usize },
    #[error("Event times must be positive, but row {row} has time {time}.")]
    NonPositiveTime { row: usize, time: f64 },
    #[error("Interval-censored row {row} has lower bound {lower} not below upper bound {upper}.")]
    InvalidInterval { row: usize, lower: f64, upper: f64 },
    #[error("Interval-censored row {row} has no upper bound.")]
    MissingUpperBound { row: usize },
    #[error("Feature matrix has {features} rows but {records} survival records were supplied.")]
    DimensionMismatch { features: usize, records: usize },
    #[error("Column '{column}' has {found} entries but {expected} times were supplied.")]
    LengthMismatch {
        column: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{names} feature names were supplied for a matrix with {columns} columns.")]
    FeatureNameMismatch { names: usize, columns: usize },
    #[error("No complete observations remain after removing rows with missing values.")]
    Empty,
}

/// Validated survival data: a dense design matrix plus one record per row.
#[derive(Debug, Clone)]
pub struct SurvivalData {
    features: Array2<f64>,
    records: Vec<SurvivalRecord>,
    feature_names: Vec<String>,
    /// Input row (0-based) of every kept subject, before listwise deletion.
    source_rows: Vec<usize>,
}

impl SurvivalData {
    /// Builds a dataset, removing rows with missing values before validating the rest.
    pub fn new(
        features: Array2<f64>,
        records: Vec<SurvivalRecord>,
        feature_names: Vec<String>,
    ) -> Result<Self, DataError> {
        if features.nrows() != records.len() {
            return Err(DataError::DimensionMismatch {
                features: features.nrows(),
                records: records.len(),
            });
        }
        if feature_names.len() != features.ncols() {
            return Err(DataError::FeatureNameMismatch {
                names: feature_names.len(),
                columns: features.ncols(),
            });
        }

        let complete: Vec<usize> = (0..records.len())
            .filter(|&i| {
                !records[i].has_missing() && features.row(i).iter().all(|v| !v.is_nan())
            })
            .collect();
        let dropped = records.len() - complete.len();
        if dropped > 0 {
            log::warn!(
                "Dropped {} of {} rows containing missing values.",
                dropped,
                records.len()
            );
        }
        if complete.is_empty() {
            return Err(DataError::Empty);
        }

        let features = features.select(Axis(0), &complete);
        let records: Vec<SurvivalRecord> = complete.iter().map(|&i| records[i]).collect();

        for (values, &row) in features.outer_iter().zip(&complete) {
            if let Some(col) = values.iter().position(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValue {
                    column: feature_names[col].clone(),
                    row,
                });
            }
        }
        for (record, &row) in records.iter().zip(&complete) {
            record.validate(row)?;
        }

        Ok(Self {
            features,
            records,
            feature_names,
            source_rows: complete,
        })
    }

    /// Convenience constructor from parallel time / censoring vectors.
    pub fn from_parts(
        features: Array2<f64>,
        times: &[f64],
        censor: &[CensorType],
        upper: Option<&[f64]>,
    ) -> Result<Self, DataError> {
        if censor.len() != times.len() {
            return Err(DataError::LengthMismatch {
                column: "status",
                expected: times.len(),
                found: censor.len(),
            });
        }
        if let Some(u) = upper.filter(|u| u.len() != times.len()) {
            return Err(DataError::LengthMismatch {
                column: "time_upper",
                expected: times.len(),
                found: u.len(),
            });
        }
        let records = times
            .iter()
            .zip(censor.iter())
            .enumerate()
            .map(|(i, (&time, &censor))| SurvivalRecord {
                time,
                censor,
                upper: if censor == CensorType::Interval {
                    upper.map(|u| u[i])
                } else {
                    None
                },
            })
            .collect();
        let names = default_feature_names(features.ncols());
        Self::new(features, records, names)
    }

    #[inline]
    pub fn n_subjects(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn records(&self) -> &[SurvivalRecord] {
        &self.records
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Input row (0-based) each subject came from, counting rows dropped for missing values.
    pub fn source_rows(&self) -> &[usize] {
        &self.source_rows
    }

    /// The recorded (lower) time of every subject.
    pub fn times(&self) -> Array1<f64> {
        self.records.iter().map(|r| r.time).collect()
    }

    pub fn censor_types(&self) -> Vec<CensorType> {
        self.records.iter().map(|r| r.censor).collect()
    }

    /// Rows selected by index, already validated so no checks are repeated.
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            features: self.features.select(Axis(0), indices),
            records: indices.iter().map(|&i| self.records[i]).collect(),
            feature_names: self.feature_names.clone(),
            source_rows: indices.iter().map(|&i| self.source_rows[i]).collect(),
        }
    }

    /// Row indices of the subjects whose event time was observed exactly.
    pub fn uncensored_indices(&self) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.censor.is_censored())
            .map(|(i, _)| i)
            .collect()
    }
}

pub fn default_feature_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("x{i}")).collect()
}

/// Rows of a prediction file: identifiers, features, and any recorded times.
#[derive(Debug)]
pub struct PredictionTable {
    pub sample_ids: Vec<String>,
    pub features: Array2<f64>,
    /// Present when the file carries a `time` column.
    pub times: Option<Array1<f64>>,
}

/// Loads a training file, treating every non-reserved column as a feature.
pub fn load_survival_tsv(path: impl AsRef<Path>) -> Result<SurvivalData, DataError> {
    let table = internal::read_table(path.as_ref())?;
    let time = table.numeric_column("time")?;
    let status_idx = table.column_index("status")?;
    let upper = match table.column_index("time_upper") {
        Ok(_) => Some(table.numeric_column("time_upper")?),
        Err(_) => None,
    };

    let mut records = Vec::with_capacity(table.rows.len());
    for (row, values) in table.rows.iter().enumerate() {
        let raw = values[status_idx].trim();
        let censor = if internal::is_missing(raw) {
            // Unknown status leaves the row incomplete; it is dropped with the others.
            records.push(SurvivalRecord::uncensored(f64::NAN));
            continue;
        } else {
            raw.parse::<CensorType>()
                .map_err(|source| DataError::Status { row, source })?
        };
        records.push(SurvivalRecord {
            time: time[row],
            censor,
            upper: match (censor, &upper) {
                (CensorType::Interval, Some(u)) => Some(u[row]),
                (CensorType::Interval, None) => Some(f64::NAN),
                _ => None,
            },
        });
    }

    let feature_names = table.feature_columns();
    let features = table.feature_matrix(&feature_names)?;
    log::info!(
        "Loaded {} rows with {} features from {}",
        records.len(),
        feature_names.len(),
        path.as_ref().display()
    );
    SurvivalData::new(features, records, feature_names)
}

/// Loads a prediction file with exactly the named feature columns.
pub fn load_prediction_tsv(
    path: impl AsRef<Path>,
    feature_names: &[String],
) -> Result<PredictionTable, DataError> {
    let table = internal::read_table(path.as_ref())?;
    let features = table.feature_matrix(feature_names)?;
    for (j, name) in feature_names.iter().enumerate() {
        if features.column(j).iter().any(|v| v.is_nan()) {
            return Err(DataError::MissingValues(name.clone()));
        }
    }
    let times = match table.column_index("time") {
        Ok(_) => Some(table.numeric_column("time")?),
        Err(_) => None,
    };
    let sample_ids = match table.column_index("sample_id") {
        Ok(idx) => table.rows.iter().map(|r| r[idx].clone()).collect(),
        Err(_) => (1..=table.rows.len()).map(|i| i.to_string()).collect(),
    };
    Ok(PredictionTable {
        sample_ids,
        features,
        times,
    })
}

/// Internal helpers shared by the loaders.
mod internal {
    use super::*;
    use csv::{ReaderBuilder, Trim};

    pub(super) const RESERVED_COLUMNS: [&str; 4] = ["time", "status", "time_upper", "sample_id"];

    pub(super) struct RawTable {
        pub headers: Vec<String>,
        pub rows: Vec<Vec<String>>,
    }

    pub(super) fn is_missing(value: &str) -> bool {
        matches!(value, "" | "NA" | "na" | "NaN" | "nan" | ".")
    }

    pub(super) fn read_table(path: &Path) -> Result<RawTable, DataError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .trim(Trim::All)
            .from_path(path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(RawTable { headers, rows })
    }

    impl RawTable {
        pub(super) fn column_index(&self, name: &str) -> Result<usize, DataError> {
            self.headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(name))
                .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
        }

        pub(super) fn numeric_column(&self, name: &str) -> Result<Array1<f64>, DataError> {
            let idx = self.column_index(name)?;
            self.rows
                .iter()
                .enumerate()
                .map(|(row, values)| parse_cell(&values[idx], name, row))
                .collect()
        }

        pub(super) fn feature_columns(&self) -> Vec<String> {
            self.headers
                .iter()
                .filter(|h| {
                    !RESERVED_COLUMNS
                        .iter()
                        .any(|reserved| h.eq_ignore_ascii_case(reserved))
                })
                .cloned()
                .collect()
        }

        pub(super) fn feature_matrix(&self, names: &[String]) -> Result<Array2<f64>, DataError> {
            let mut matrix = Array2::<f64>::zeros((self.rows.len(), names.len()));
            for (j, name) in names.iter().enumerate() {
                let column = self.numeric_column(name)?;
                matrix.column_mut(j).assign(&column);
            }
            Ok(matrix)
        }
    }

    fn parse_cell(raw: &str, column: &str, row: usize) -> Result<f64, DataError> {
        if is_missing(raw) {
            return Ok(f64::NAN);
        }
        raw.parse::<f64>().map_err(|_| DataError::ParseValue {
            column: column.to_string(),
            row,
            value: raw.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_tsv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn censor_codes_round_trip_through_labels() {
        for code in 0..4 {
            let censor = CensorType::from_code(code).unwrap();
            assert_eq!(censor.code(), code);
            assert_eq!(censor.to_string().parse::<CensorType>().unwrap(), censor);
        }
        assert!(matches!(
            CensorType::from_code(7),
            Err(EncodingError::UnknownCensorCode(7))
        ));
        assert!("sideways".parse::<CensorType>().is_err());
    }

    #[test]
    fn rows_with_missing_values_are_dropped() {
        let features = array![[1.0, 2.0], [f64::NAN, 0.5], [0.3, 0.1], [0.2, 0.4]];
        let records = vec![
            SurvivalRecord::uncensored(3.0),
            SurvivalRecord::right(4.0),
            SurvivalRecord::interval(1.0, f64::NAN),
            SurvivalRecord::left(2.0),
        ];
        let data = SurvivalData::new(features, records, default_feature_names(2)).unwrap();
        assert_eq!(data.n_subjects(), 2);
        assert_abs_diff_eq!(data.features()[[1, 0]], 0.2);
        assert_eq!(data.records()[1].censor, CensorType::Left);
        assert_eq!(data.source_rows(), &[0, 3]);
        assert_eq!(data.subset(&[1]).source_rows(), &[3]);
        assert_eq!(data.uncensored_indices(), vec![0]);
    }

    #[test]
    fn from_parts_builds_records_from_parallel_columns() {
        let features = array![[0.1], [0.2], [0.3]];
        let data = SurvivalData::from_parts(
            features.clone(),
            &[2.0, 3.0, 1.0],
            &[CensorType::Uncensored, CensorType::Interval, CensorType::Right],
            Some(&[f64::NAN, 5.0, f64::NAN][..]),
        )
        .unwrap();
        assert_eq!(data.feature_names(), &["x1".to_string()]);
        assert_eq!(data.records()[1], SurvivalRecord::interval(3.0, 5.0));
        assert_eq!(data.records()[2], SurvivalRecord::right(1.0));

        let err = SurvivalData::from_parts(
            features.clone(),
            &[2.0, 3.0, 1.0],
            &[CensorType::Uncensored, CensorType::Right],
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DataError::LengthMismatch {
                column: "status",
                expected: 3,
                found: 2
            }
        ));

        let err = SurvivalData::from_parts(
            features,
            &[2.0, 3.0, 1.0],
            &[CensorType::Uncensored; 3],
            Some(&[1.0][..]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DataError::LengthMismatch {
                column: "time_upper",
                expected: 3,
                found: 1
            }
        ));
    }

    #[test]
    fn invalid_records_are_rejected() {
        let features = Array2::<f64>::zeros((1, 0));
        let err = SurvivalData::new(
            features.clone(),
            vec![SurvivalRecord::uncensored(0.0)],
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DataError::NonPositiveTime { .. }));

        let err = SurvivalData::new(features, vec![SurvivalRecord::interval(5.0, 5.0)], Vec::new())
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidInterval { .. }));
    }

    #[test]
    fn infinite_features_are_rejected() {
        let err = SurvivalData::new(
            array![[f64::INFINITY]],
            vec![SurvivalRecord::uncensored(1.0)],
            vec!["age".to_string()],
        )
        .unwrap_err();
        match err {
            DataError::NonFiniteValue { column, row } => {
                assert_eq!(column, "age");
                assert_eq!(row, 0);
            }
            other => panic!("Expected NonFiniteValue, got {:?}", other),
        }
    }

    #[test]
    fn loads_training_tsv_with_mixed_censoring() {
        let content = "sample_id\ttime\tstatus\ttime_upper\tage\tdose\n\
a\t5.0\t1\tNA\t61\t0.5\n\
b\t7.5\t0\tNA\t55\t1.5\n\
c\t2.0\t2\tNA\t70\tNA\n\
d\t3.0\t3\t6.0\t48\t0.0";
        let file = create_test_tsv(content).unwrap();
        let data = load_survival_tsv(file.path()).unwrap();

        assert_eq!(data.feature_names(), &["age".to_string(), "dose".to_string()]);
        assert_eq!(data.n_subjects(), 3);
        assert_eq!(data.records()[2], SurvivalRecord::interval(3.0, 6.0));
        assert_abs_diff_eq!(data.features()[[1, 1]], 1.5);
    }

    #[test]
    fn unknown_status_is_reported_with_its_row() {
        let content = "time\tstatus\tage\n4.0\t9\t50";
        let file = create_test_tsv(content).unwrap();
        let err = load_survival_tsv(file.path()).unwrap_err();
        assert!(matches!(err, DataError::Status { row: 0, .. }));
    }

    #[test]
    fn prediction_tsv_requires_complete_features() {
        let content = "sample_id\tage\n p1\t50\np2\tNA";
        let file = create_test_tsv(content).unwrap();
        let err = load_prediction_tsv(file.path(), &["age".to_string()]).unwrap_err();
        assert!(matches!(err, DataError::MissingValues(ref c) if c == "age"));
    }
}

//! Model selection: fold assignment and cross-validation over candidate C1 values.

pub mod cv;
pub mod folds;

pub use cv::{CvConfig, CvError, CvResult, cross_validate};
pub use folds::{FoldAssignment, FoldError, FoldType, make_folds};

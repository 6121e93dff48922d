#![deny(unused_imports)]
#![allow(non_snake_case)]

pub mod config;
pub mod curves;
pub mod data;
pub mod encode;
pub mod estimate;
pub mod grid;
pub mod model;
pub mod objective;
pub mod optimizer;
pub mod smooth;
pub mod stats;

// Cross-validation lives beside the core and only consumes its public API.
#[path = "../validate/mod.rs"]
pub mod validate;

pub use config::FitConfig;
pub use curves::{SurvivalCurveMatrix, predict_curves};
pub use data::{CensorType, SurvivalData, SurvivalRecord};
pub use estimate::{FitOutcome, fit};
pub use model::MtlrModel;
pub use stats::{Statistic, predict_statistic};

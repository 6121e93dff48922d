// validate/folds.rs

//! Assigns subjects to cross-validation folds.
//!
//! Every strategy first puts the subjects in some order and then deals fold ids
//! `1, 2, ..., k, 1, 2, ...` along it, so fold sizes never differ by more than one.

use crate::data::SurvivalData;
use clap::ValueEnum;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How subjects are ordered before fold ids are dealt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FoldType {
    /// Censored subjects sorted by time, then uncensored subjects sorted by time.
    #[value(name = "fullstrat")]
    FullStrat,
    /// Censored subjects shuffled, then uncensored subjects shuffled.
    #[value(name = "censorstrat")]
    CensorStrat,
    /// All subjects shuffled together.
    Random,
}

impl fmt::Display for FoldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FoldType::FullStrat => "fullstrat",
            FoldType::CensorStrat => "censorstrat",
            FoldType::Random => "random",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FoldError {
    #[error("At least 2 folds are required, got {0}.")]
    TooFewFolds(usize),
    #[error("Cannot split {subjects} subjects into {nfolds} folds.")]
    TooManyFolds { nfolds: usize, subjects: usize },
}

/// Fold id (1-based) of every subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldAssignment {
    folds: Vec<usize>,
    nfolds: usize,
}

impl FoldAssignment {
    pub fn nfolds(&self) -> usize {
        self.nfolds
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    pub fn fold_of(&self, subject: usize) -> usize {
        self.folds[subject]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.folds
    }

    /// Subjects held out in `fold`.
    pub fn test_indices(&self, fold: usize) -> Vec<usize> {
        self.indices_where(|f| f == fold)
    }

    /// Subjects used for training when `fold` is held out.
    pub fn train_indices(&self, fold: usize) -> Vec<usize> {
        self.indices_where(|f| f != fold)
    }

    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.nfolds];
        for &f in &self.folds {
            sizes[f - 1] += 1;
        }
        sizes
    }

    fn indices_where(&self, keep: impl Fn(usize) -> bool) -> Vec<usize> {
        self.folds
            .iter()
            .enumerate()
            .filter(|&(_, &f)| keep(f))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Splits the subjects of `data` into `nfolds` folds.
pub fn make_folds(
    data: &SurvivalData,
    nfolds: usize,
    fold_type: FoldType,
    seed: u64,
) -> Result<FoldAssignment, FoldError> {
    let times = data.times().to_vec();
    let censored: Vec<bool> = data
        .censor_types()
        .into_iter()
        .map(|c| c.is_censored())
        .collect();
    assign_folds(&times, &censored, nfolds, fold_type, seed)
}

/// Fold assignment from raw times and censoring flags.
pub fn assign_folds(
    times: &[f64],
    censored: &[bool],
    nfolds: usize,
    fold_type: FoldType,
    seed: u64,
) -> Result<FoldAssignment, FoldError> {
    let n = times.len();
    if nfolds < 2 {
        return Err(FoldError::TooFewFolds(nfolds));
    }
    if nfolds > n {
        return Err(FoldError::TooManyFolds {
            nfolds,
            subjects: n,
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let (mut censored_group, mut event_group): (Vec<usize>, Vec<usize>) =
        (0..n).partition(|&i| censored[i]);

    let order: Vec<usize> = match fold_type {
        FoldType::FullStrat => {
            censored_group.sort_by(|&a, &b| times[a].total_cmp(&times[b]));
            event_group.sort_by(|&a, &b| times[a].total_cmp(&times[b]));
            censored_group.into_iter().chain(event_group).collect()
        }
        FoldType::CensorStrat => {
            censored_group.shuffle(&mut rng);
            event_group.shuffle(&mut rng);
            censored_group.into_iter().chain(event_group).collect()
        }
        FoldType::Random => {
            let mut all: Vec<usize> = (0..n).collect();
            all.shuffle(&mut rng);
            all
        }
    };

    let mut folds = vec![0; n];
    for (position, &subject) in order.iter().enumerate() {
        folds[subject] = position % nfolds + 1;
    }
    log::debug!("Assigned {n} subjects to {nfolds} folds ({fold_type}).");
    Ok(FoldAssignment { folds, nfolds })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> (Vec<f64>, Vec<bool>) {
        let times = vec![5.0, 1.0, 3.0, 8.0, 2.0, 9.0, 4.0, 7.0, 6.0, 10.0, 0.5];
        let censored = vec![
            true, false, true, false, false, true, false, false, true, false, false,
        ];
        (times, censored)
    }

    #[test]
    fn every_strategy_partitions_with_balanced_sizes() {
        let (times, censored) = toy();
        for fold_type in [FoldType::FullStrat, FoldType::CensorStrat, FoldType::Random] {
            let folds = assign_folds(&times, &censored, 3, fold_type, 7).unwrap();
            assert_eq!(folds.len(), times.len());
            let sizes = folds.sizes();
            assert_eq!(sizes.iter().sum::<usize>(), times.len());
            let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
            assert!(max - min <= 1, "{fold_type}: {sizes:?}");
            for fold in 1..=3 {
                let mut all = folds.test_indices(fold);
                all.extend(folds.train_indices(fold));
                all.sort_unstable();
                assert_eq!(all, (0..times.len()).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn fullstrat_deals_along_sorted_groups() {
        let (times, censored) = toy();
        let folds = assign_folds(&times, &censored, 2, FoldType::FullStrat, 0).unwrap();
        // Censored by time: 3.0 (2), 5.0 (0), 6.0 (8), 9.0 (5).
        assert_eq!(folds.fold_of(2), 1);
        assert_eq!(folds.fold_of(0), 2);
        assert_eq!(folds.fold_of(8), 1);
        assert_eq!(folds.fold_of(5), 2);
        // Uncensored continue the same deal: 0.5 (10) is next.
        assert_eq!(folds.fold_of(10), 1);
    }

    #[test]
    fn shuffles_are_reproducible_from_the_seed() {
        let (times, censored) = toy();
        let a = assign_folds(&times, &censored, 4, FoldType::Random, 11).unwrap();
        let b = assign_folds(&times, &censored, 4, FoldType::Random, 11).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fold_count_is_validated() {
        let (times, censored) = toy();
        assert_eq!(
            assign_folds(&times, &censored, 1, FoldType::Random, 0).unwrap_err(),
            FoldError::TooFewFolds(1)
        );
        assert_eq!(
            assign_folds(&times, &censored, 12, FoldType::Random, 0).unwrap_err(),
            FoldError::TooManyFolds {
                nfolds: 12,
                subjects: 11
            }
        );
    }
}

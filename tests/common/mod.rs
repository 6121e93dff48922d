//! Synthetic survival data shared by the integration tests.
#![allow(dead_code)]

use lifeline::{CensorType, SurvivalData, SurvivalRecord};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp, StandardNormal, Uniform};

/// Exponential event times with hazard `base_rate * exp(effect * x)`.
pub struct SyntheticSurvival {
    pub n_subjects: usize,
    pub effect: f64,
    pub base_rate: f64,
    /// Right-censoring times are drawn uniformly from `(0, censor_horizon)`; `None`
    /// leaves every subject uncensored.
    pub censor_horizon: Option<f64>,
    pub seed: u64,
}

impl Default for SyntheticSurvival {
    fn default() -> Self {
        Self {
            n_subjects: 120,
            effect: 1.0,
            base_rate: 0.2,
            censor_horizon: Some(15.0),
            seed: 2024,
        }
    }
}

impl SyntheticSurvival {
    pub fn build(&self) -> SurvivalData {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let x: Array2<f64> = Array2::from_shape_fn((self.n_subjects, 1), |_| {
            StandardNormal.sample(&mut rng)
        });

        let mut records = Vec::with_capacity(self.n_subjects);
        for i in 0..self.n_subjects {
            let rate = self.base_rate * (self.effect * x[[i, 0]]).exp();
            let event: f64 = Exp::new(rate).unwrap().sample(&mut rng);
            let record = match self.censor_horizon {
                Some(horizon) => {
                    let censor = Uniform::new(0.05, horizon).sample(&mut rng);
                    if censor < event {
                        SurvivalRecord::right(censor)
                    } else {
                        SurvivalRecord::uncensored(event)
                    }
                }
                None => SurvivalRecord::uncensored(event),
            };
            records.push(record);
        }
        SurvivalData::new(x, records, vec!["risk".to_string()]).unwrap()
    }
}

pub fn count_censored(data: &SurvivalData) -> usize {
    data.censor_types()
        .into_iter()
        .filter(|c| *c != CensorType::Uncensored)
        .count()
}

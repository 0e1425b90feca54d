//!
//! Growing a mixture one component at a time
//!
//! After EM converges at `K` components, every sequence gets a score of
//! how well the mixture explains it (`WorstCriterion`). Sequences scoring
//! below `threshold + offset` are the "worst" ones: a new component is
//! trained on them alone and added with weight `|worst| / |data|`, then
//! EM runs again at `K + 1` components.
//!
//! Growth stops at `max_components`, or when the selection is empty or
//! contains every sequence (a component trained on all rows would not
//! separate anything).
//!
use super::EMAlgorithm;
use crate::chain::ChainModel;
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::mixture::Mixture;
use crate::params::{EmParams, IncrementalParams};
use crate::snapshot::SnapshotStore;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

///
/// Base value of the cut of the worst sequences.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Threshold {
    /// constant 0
    Zero,
    /// median of the scores
    Median,
    /// mean of the scores
    Mean,
}

///
/// Score of a sequence; lower is worse explained.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorstCriterion {
    /// `max_k ln P_k(x) / |x|`
    LogLikelihood,
    /// `max_k r_k(x)`
    Responsibility,
}

impl std::str::FromStr for Threshold {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zero" => Ok(Threshold::Zero),
            "median" => Ok(Threshold::Median),
            "mean" => Ok(Threshold::Mean),
            _ => Err(Error::InvalidParameter(format!("unknown threshold {}", s))),
        }
    }
}

impl std::str::FromStr for WorstCriterion {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "loglikelihood" | "ll" => Ok(WorstCriterion::LogLikelihood),
            "responsibility" => Ok(WorstCriterion::Responsibility),
            _ => Err(Error::InvalidParameter(format!("unknown criterion {}", s))),
        }
    }
}

///
/// Score of every row under `criterion`.
///
pub fn sequence_scores<C: ChainModel, D: Dataset>(
    mixture: &Mixture<C>,
    data: &D,
    criterion: WorstCriterion,
) -> Vec<f64> {
    (0..data.len())
        .into_par_iter()
        .map(|i| {
            let (o, h) = (data.observed(i), data.hidden(i));
            match criterion {
                WorstCriterion::LogLikelihood => {
                    let length = o.len().max(1) as f64;
                    mixture
                        .components()
                        .iter()
                        .map(|c| c.estimate(o, h) / length)
                        .fold(f64::NEG_INFINITY, f64::max)
                }
                WorstCriterion::Responsibility => mixture
                    .responsibilities(o, h)
                    .into_iter()
                    .fold(f64::NEG_INFINITY, f64::max),
            }
        })
        .collect()
}

///
/// Value of the threshold on the scores. Median of an even number of
/// scores is the mean of the two middle ones; empty scores give 0.
///
pub fn threshold_value(scores: &[f64], threshold: Threshold) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    match threshold {
        Threshold::Zero => 0.0,
        Threshold::Mean => scores.iter().sum::<f64>() / scores.len() as f64,
        Threshold::Median => {
            let mut sorted = scores.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let n = sorted.len();
            if n % 2 == 1 {
                sorted[n / 2]
            } else {
                (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
            }
        }
    }
}

///
/// Rows whose score is strictly below `threshold + offset`, in row order.
///
pub fn worst_samples<C: ChainModel, D: Dataset>(
    mixture: &Mixture<C>,
    data: &D,
    params: &IncrementalParams,
) -> Vec<usize> {
    let scores = sequence_scores(mixture, data, params.criterion);
    let cut = threshold_value(&scores, params.threshold) + params.offset;
    scores
        .iter()
        .enumerate()
        .filter(|(_, s)| **s < cut)
        .map(|(i, _)| i)
        .collect()
}

///
/// EM with mixture growth.
///
pub struct IncrementalEMAlgorithm<'a, C, D> {
    template: C,
    data: &'a D,
    params: IncrementalParams,
    em: EmParams,
    checkpoint: Option<(&'a dyn SnapshotStore, String)>,
}

impl<'a, C: ChainModel + Serialize, D: Dataset> IncrementalEMAlgorithm<'a, C, D> {
    ///
    /// `template` gives the hyperparameters of new components.
    ///
    pub fn new(template: &C, data: &'a D, params: IncrementalParams, em: EmParams) -> Result<Self> {
        if params.max_components == 0 {
            return Err(Error::InvalidParameter("max_components must be >= 1".into()));
        }
        Ok(IncrementalEMAlgorithm {
            template: template.duplicate_hyperparameters_only(),
            data,
            params,
            em,
            checkpoint: None,
        })
    }
    /// save the mixture after every EM round
    pub fn with_checkpoint(mut self, store: &'a dyn SnapshotStore, name: &str) -> Self {
        self.checkpoint = Some((store, name.to_string()));
        self
    }
    fn converge(&self, mixture: Mixture<C>) -> Result<Mixture<C>> {
        let mut em = EMAlgorithm::new(mixture, self.data, self.em.clone());
        if let Some((store, name)) = &self.checkpoint {
            em = em.with_checkpoint(*store, name);
        }
        em.ordinary_run()?;
        Ok(em.into_mixture())
    }
    ///
    /// Grow `initial` (or a single component trained on every row) up to
    /// `max_components`.
    ///
    pub fn run(&mut self, initial: Option<Mixture<C>>) -> Result<Mixture<C>> {
        let n = self.data.len();
        let initial = match initial {
            Some(m) => m,
            None => {
                let mut c = self.template.duplicate_hyperparameters_only();
                c.train_set(self.data);
                Mixture::uniform(vec![c])?
            }
        };
        let mut mixture = self.converge(initial)?;
        while mixture.len() < self.params.max_components {
            let worst = worst_samples(&mixture, self.data, &self.params);
            if worst.is_empty() || worst.len() == n {
                info!(
                    "incremental EM stops at {} components: {} of {} sequences selected",
                    mixture.len(),
                    worst.len(),
                    n
                );
                break;
            }
            let fraction = worst.len() as f64 / n as f64;
            info!(
                "incremental EM: new component from {} worst sequences (weight {:.3})",
                worst.len(),
                fraction
            );
            let mut component = self.template.duplicate_hyperparameters_only();
            component.train_set(&self.data.select(worst));
            mixture.add(component, fraction)?;
            mixture = self.converge(mixture)?;
        }
        Ok(mixture)
    }
}

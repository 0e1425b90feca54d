//!
//! EM training of chain mixtures
//!
//! * `EMAlgorithm`: fixed number of E/M rounds on a mixture
//! * `incremental::IncrementalEMAlgorithm`: grows the mixture with
//!   components trained on the worst explained sequences
//! * `decremental::DecrementalEMAlgorithm`: shrinks the mixture by
//!   deleting the lowest weight component
//!
//! ## E-step
//!
//! `r[i][k] = w_k P_k(x_i) / sum_j w_j P_j(x_i)` computed in log space with
//! the maximum subtracted (`Mixture::responsibilities`).
//!
//! ## M-step
//!
//! Component `k` is retrained from scratch on every row `i` with weight
//! `r[i][k]` (or a Bernoulli(`r[i][k]`) sample in stochastic mode), and
//! `w_k = mean_i r[i][k]`. Components are retrained in parallel.
//!
pub mod decremental;
pub mod incremental;

use crate::chain::ChainModel;
use crate::dataset::Dataset;
use crate::decoder::Interrupt;
use crate::error::{Error, Result};
use crate::mixture::Mixture;
use crate::params::EmParams;
use crate::snapshot::{self, SnapshotStore};
use crate::threaded::panic_message;
use log::{debug, info, warn};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// `kind` tag of mixture snapshots
pub const MIXTURE_KIND: &str = "ChainMixture";

///
/// Mixture of `n_components` copies of `template`, each trained on a
/// disjoint random share of the rows (seeded). Weights are the shares.
///
pub fn random_split_mixture<C: ChainModel, D: Dataset>(
    template: &C,
    n_components: usize,
    data: &D,
    seed: u64,
) -> Result<Mixture<C>> {
    if n_components == 0 || data.len() < n_components {
        return Err(Error::InvalidParameter(format!(
            "cannot split {} sequences into {} components",
            data.len(),
            n_components
        )));
    }
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..data.len()).collect();
    order.shuffle(&mut rng);
    let mut components: Vec<C> = (0..n_components)
        .map(|_| template.duplicate_hyperparameters_only())
        .collect();
    let mut counts = vec![0.0; n_components];
    for (j, &i) in order.iter().enumerate() {
        let k = j % n_components;
        components[k].train(data.observed(i), data.hidden(i), 1.0);
        counts[k] += 1.0;
    }
    Mixture::new(components, counts)
}

///
/// EM trainer of a chain mixture on a fixed dataset.
///
pub struct EMAlgorithm<'a, C, D> {
    mixture: Mixture<C>,
    data: &'a D,
    params: EmParams,
    rng: Xoshiro256PlusPlus,
    checkpoint: Option<(&'a dyn SnapshotStore, String)>,
    interrupt: Interrupt,
}

impl<'a, C: ChainModel + Serialize, D: Dataset> EMAlgorithm<'a, C, D> {
    pub fn new(mixture: Mixture<C>, data: &'a D, params: EmParams) -> Self {
        let rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
        EMAlgorithm {
            mixture,
            data,
            params,
            rng,
            checkpoint: None,
            interrupt: Interrupt::new(),
        }
    }
    ///
    /// Save the mixture as `name` in `store` after every round.
    ///
    pub fn with_checkpoint(mut self, store: &'a dyn SnapshotStore, name: &str) -> Self {
        self.checkpoint = Some((store, name.to_string()));
        self
    }
    ///
    /// Stop between rounds when the flag is raised.
    ///
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }
    pub fn mixture(&self) -> &Mixture<C> {
        &self.mixture
    }
    pub fn into_mixture(self) -> Mixture<C> {
        self.mixture
    }
    pub fn params(&self) -> &EmParams {
        &self.params
    }
    /// training data
    pub fn data(&self) -> &'a D {
        self.data
    }
    ///
    /// Responsibilities `r[i][k]` of the current mixture.
    ///
    pub fn e_step(&self) -> Vec<Vec<f64>> {
        self.mixture.responsibilities_set(self.data)
    }
    ///
    /// Retrain every component with the responsibilities as row weights and
    /// set the weights to the mean responsibilities.
    ///
    /// A component whose retraining panics keeps its previous state.
    ///
    pub fn m_step(&mut self, responsibilities: &[Vec<f64>]) -> Result<()> {
        let n = self.data.len();
        let n_components = self.mixture.len();
        assert_eq!(responsibilities.len(), n);

        // row weights per component
        let columns: Vec<Vec<f64>> = (0..n_components)
            .map(|k| {
                responsibilities
                    .iter()
                    .map(|r| {
                        if self.params.stochastic {
                            if self.rng.gen_bool(r[k].clamp(0.0, 1.0)) {
                                1.0
                            } else {
                                0.0
                            }
                        } else {
                            r[k]
                        }
                    })
                    .collect()
            })
            .collect();

        let data = self.data;
        let components: Vec<C> = self
            .mixture
            .components()
            .par_iter()
            .zip(columns.par_iter())
            .enumerate()
            .map(|(k, (old, weights))| {
                let retrained = catch_unwind(AssertUnwindSafe(|| {
                    let mut c = old.duplicate_hyperparameters_only();
                    c.train_weighted(data, weights);
                    c
                }));
                match retrained {
                    Ok(c) => c,
                    Err(payload) => {
                        warn!(
                            "retraining of component {} failed: {}",
                            k,
                            panic_message(payload)
                        );
                        old.clone()
                    }
                }
            })
            .collect();

        let weights: Vec<f64> = (0..n_components)
            .map(|k| responsibilities.iter().map(|r| r[k]).sum::<f64>() / n as f64)
            .collect();
        debug!("M-step weights {:?}", weights);
        self.mixture.replace(components, weights)
    }
    ///
    /// Run `n_rounds` E/M rounds.
    ///
    /// Returns the total log-likelihood before the first round followed by
    /// its value after each completed round.
    ///
    pub fn ordinary_run(&mut self) -> Result<Vec<f64>> {
        let mut history = vec![self.mixture.total_log_likelihood(self.data)];
        if self.data.is_empty() {
            warn!("EM on an empty dataset does nothing");
            return Ok(history);
        }
        info!(
            "EM start: components={} sequences={} ll={}",
            self.mixture.len(),
            self.data.len(),
            history[0]
        );
        for round in 0..self.params.n_rounds {
            if self.interrupt.is_interrupted() {
                warn!("EM interrupted before round {}", round);
                break;
            }
            let r = self.e_step();
            self.m_step(&r)?;
            let ll = self.mixture.total_log_likelihood(self.data);
            info!("EM round {}: ll={}", round, ll);
            history.push(ll);
            self.save_checkpoint();
        }
        Ok(history)
    }
    fn save_checkpoint(&self) {
        if let Some((store, name)) = &self.checkpoint {
            if let Err(e) = snapshot::save(*store, name, MIXTURE_KIND, &self.mixture) {
                warn!("failed to save mixture snapshot {}: {}", name, e);
            }
        }
    }
}

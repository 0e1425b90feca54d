//!
//! N-fold cross-validation with checkpoints
//!
//! Every row belongs to exactly one fold. For each fold `f`, a fresh
//! decoder is trained on the other folds and evaluated on
//!
//! * run `2f`: the training rows (optional)
//! * run `2f + 1`: the rows of fold `f` (control)
//!
//! The job itself is saved as `<name>` and each run as `<name>.run<r>`,
//! so an interrupted job resumes where it stopped.
//!
use super::quality::PredictionQuality;
use super::run::{AlgorithmRun, RUN_KIND};
use crate::dataset::Dataset;
use crate::decoder::{Decoder, Interrupt};
use crate::error::{Error, Result};
use crate::params::EvaluationParams;
use crate::snapshot::{self, SnapshotStore};
use crate::states::Alphabet;
use log::{info, warn};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// `kind` tag of cross-validation snapshots
pub const CROSS_VALIDATION_KIND: &str = "CrossValidation";

///
/// Cross-validation job.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrossValidation {
    name: String,
    n_sequences: usize,
    /// fold of each row
    folds: Vec<usize>,
    hidden: Alphabet,
    params: EvaluationParams,
    /// saved separately under `run_key`
    #[serde(skip)]
    runs: Vec<AlgorithmRun>,
    #[serde(skip)]
    interrupt: Interrupt,
}

impl CrossValidation {
    ///
    /// Random fold assignment (seeded by `params.seed`): rows are shuffled
    /// and dealt to the folds in turn, so fold sizes differ by at most one.
    ///
    pub fn new(name: &str, n_sequences: usize, hidden: Alphabet, params: EvaluationParams) -> Result<Self> {
        params.validate()?;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(params.seed);
        let mut order: Vec<usize> = (0..n_sequences).collect();
        order.shuffle(&mut rng);
        let mut folds = vec![0; n_sequences];
        for (j, &i) in order.iter().enumerate() {
            folds[i] = j % params.n_folds;
        }
        let mut cv = CrossValidation {
            name: name.to_string(),
            n_sequences,
            folds,
            hidden,
            params,
            runs: Vec::new(),
            interrupt: Interrupt::new(),
        };
        cv.runs = cv.fresh_runs();
        Ok(cv)
    }
    fn fresh_runs(&self) -> Vec<AlgorithmRun> {
        (0..self.params.n_folds)
            .flat_map(|f| {
                [
                    AlgorithmRun::new(
                        &format!("{}.fold{}.train", self.name, f),
                        self.train_indices(f),
                        self.hidden.clone(),
                    ),
                    AlgorithmRun::new(
                        &format!("{}.fold{}.control", self.name, f),
                        self.control_indices(f),
                        self.hidden.clone(),
                    ),
                ]
            })
            .collect()
    }
    /// store key of run `r`
    pub fn run_key(name: &str, r: usize) -> String {
        format!("{}.run{}", name, r)
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn n_folds(&self) -> usize {
        self.params.n_folds
    }
    pub fn folds(&self) -> &[usize] {
        &self.folds
    }
    pub fn params(&self) -> &EvaluationParams {
        &self.params
    }
    /// `2 * n_folds` runs, training and control alternating
    pub fn runs(&self) -> &[AlgorithmRun] {
        &self.runs
    }
    /// rows not in fold `f`
    pub fn train_indices(&self, f: usize) -> Vec<usize> {
        (0..self.n_sequences).filter(|&i| self.folds[i] != f).collect()
    }
    /// rows of fold `f`
    pub fn control_indices(&self, f: usize) -> Vec<usize> {
        (0..self.n_sequences).filter(|&i| self.folds[i] == f).collect()
    }
    ///
    /// Stop between folds when the flag is raised.
    ///
    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.interrupt = interrupt;
    }
    /// mean quality of the training runs
    pub fn training_quality(&self) -> PredictionQuality {
        PredictionQuality::mean(
            self.hidden.clone(),
            self.runs.iter().step_by(2).map(|r| r.quality().clone()).collect(),
        )
    }
    /// mean quality of the control runs
    pub fn control_quality(&self) -> PredictionQuality {
        PredictionQuality::mean(
            self.hidden.clone(),
            self.runs
                .iter()
                .skip(1)
                .step_by(2)
                .map(|r| r.quality().clone())
                .collect(),
        )
    }
    fn fold_is_done(&self, f: usize) -> bool {
        let train_done = self.params.skip_training_evaluation || self.runs[2 * f].is_complete();
        train_done && self.runs[2 * f + 1].is_complete()
    }
    /// every run to be evaluated is complete
    pub fn is_complete(&self) -> bool {
        (0..self.n_folds()).all(|f| self.fold_is_done(f))
    }
    ///
    /// Run every fold not complete yet.
    ///
    /// For each such fold, a copy of `template` without learned state is
    /// trained on the training rows and evaluated. The job is saved before
    /// the first fold and runs are checkpointed while decoding.
    ///
    pub fn execute<M, D>(&mut self, template: &M, data: &D, store: &dyn SnapshotStore) -> Result<()>
    where
        M: Decoder,
        D: Dataset,
    {
        if data.len() != self.n_sequences {
            return Err(Error::InvalidParameter(format!(
                "cross-validation {} was built for {} sequences, got {}",
                self.name,
                self.n_sequences,
                data.len()
            )));
        }
        snapshot::save(store, &self.name, CROSS_VALIDATION_KIND, &*self)?;
        let save_every = self.params.save_every;
        for f in 0..self.n_folds() {
            if self.interrupt.is_interrupted() {
                warn!("cross-validation {} interrupted before fold {}", self.name, f);
                break;
            }
            if self.fold_is_done(f) {
                info!("fold {} already complete", f);
                continue;
            }
            info!("fold {}: training on {} sequences", f, self.runs[2 * f].indices().len());
            let mut decoder = template.duplicate_hyperparameters_only();
            decoder.train_set(&data.select(self.train_indices(f)))?;

            let mut targets = vec![2 * f + 1];
            if !self.params.skip_training_evaluation {
                targets.insert(0, 2 * f);
            }
            for r in targets {
                let key = CrossValidation::run_key(&self.name, r);
                self.runs[r].run(&decoder, data, save_every, &mut |run| {
                    snapshot::save(store, &key, RUN_KIND, run)
                })?;
            }
            info!(
                "fold {} done\n{}",
                f,
                self.runs[2 * f + 1].quality()
            );
        }
        Ok(())
    }
    ///
    /// Load a saved job. `Ok(None)` if nothing was saved under `name`.
    ///
    /// Runs without a snapshot start from scratch.
    ///
    pub fn resume(store: &dyn SnapshotStore, name: &str) -> Result<Option<Self>> {
        let mut cv: CrossValidation = match snapshot::load(store, name, CROSS_VALIDATION_KIND)? {
            Some(cv) => cv,
            None => return Ok(None),
        };
        let mut runs = cv.fresh_runs();
        for (r, run) in runs.iter_mut().enumerate() {
            if let Some(saved) = snapshot::load(store, &CrossValidation::run_key(name, r), RUN_KIND)? {
                *run = saved;
            }
        }
        cv.runs = runs;
        info!(
            "resumed cross-validation {}: {} of {} runs complete",
            name,
            cv.runs.iter().filter(|r| r.is_complete()).count(),
            cv.runs.len()
        );
        Ok(Some(cv))
    }
}

//!
//! Parameters of models, trainers and evaluation jobs
//!
//! All structs have defaults and are (de)serializable so that a job can
//! be configured from a JSON file and persisted with its snapshot.
//!
use crate::chain::fallthru::Approximation;
use crate::em::incremental::{Threshold, WorstCriterion};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

///
/// Hyperparameters of a Markov chain.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// number of preceding complete states the chain conditions on
    pub order: usize,
    /// number of states predicted jointly from the conditioning tail
    pub dep_length: usize,
    /// per-term probability floor used by likelihood estimates
    pub log_floor_prob: f64,
    /// backoff to lower order chains, if any
    pub approximation: Option<Approximation>,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            order: 3,
            dep_length: 1,
            log_floor_prob: 1e-4,
            approximation: None,
        }
    }
}

impl ChainParams {
    pub fn new(order: usize, dep_length: usize) -> Self {
        ChainParams {
            order,
            dep_length,
            ..ChainParams::default()
        }
    }
    pub fn validate(&self) -> Result<()> {
        if self.dep_length == 0 {
            return Err(Error::InvalidParameter("dep_length must be >= 1".into()));
        }
        if !(self.log_floor_prob > 0.0 && self.log_floor_prob <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "log_floor_prob must be in (0, 1], got {}",
                self.log_floor_prob
            )));
        }
        if let Some(a) = &self.approximation {
            a.validate(self.order)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ChainParams {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "order={} dep_length={} floor={}",
            self.order, self.dep_length, self.log_floor_prob
        )?;
        if let Some(a) = &self.approximation {
            write!(f, " approximation=({})", a)?;
        }
        Ok(())
    }
}

///
/// Decoder-level parameters.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderParams {
    /// longer inputs are refused
    pub max_length: usize,
    /// hidden symbol whose total count must be a multiple of three
    /// (`GeneViterbiAlgorithm` only)
    pub coding_symbol: Option<char>,
}

impl Default for DecoderParams {
    fn default() -> Self {
        DecoderParams {
            max_length: 1_000_000,
            coding_symbol: None,
        }
    }
}

///
/// Parameters of `EMAlgorithm`.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmParams {
    /// number of E/M rounds of `ordinary_run`
    pub n_rounds: usize,
    /// sample 0/1 weights instead of using responsibilities
    pub stochastic: bool,
    /// seed of the sampler and of the initial split
    pub seed: u64,
}

impl Default for EmParams {
    fn default() -> Self {
        EmParams {
            n_rounds: 10,
            stochastic: false,
            seed: 0,
        }
    }
}

///
/// Parameters of `IncrementalEMAlgorithm`.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalParams {
    /// stop growing at this number of components
    pub max_components: usize,
    /// base value of the selection cut
    pub threshold: Threshold,
    /// added to the threshold value
    pub offset: f64,
    /// score of how well a sequence is explained
    pub criterion: WorstCriterion,
}

impl Default for IncrementalParams {
    fn default() -> Self {
        IncrementalParams {
            max_components: 4,
            threshold: Threshold::Median,
            offset: 0.0,
            criterion: WorstCriterion::LogLikelihood,
        }
    }
}

///
/// Parameters of `DecrementalEMAlgorithm`.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecrementalParams {
    /// stop shrinking at this number of components
    pub min_components: usize,
}

impl Default for DecrementalParams {
    fn default() -> Self {
        DecrementalParams { min_components: 1 }
    }
}

///
/// Parameters of cross-validation and single-run evaluation.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationParams {
    pub n_folds: usize,
    /// seed of the random fold assignment
    pub seed: u64,
    /// checkpoint after this many decoded sequences
    pub save_every: usize,
    /// do not decode the training part of each fold
    pub skip_training_evaluation: bool,
}

impl Default for EvaluationParams {
    fn default() -> Self {
        EvaluationParams {
            n_folds: 5,
            seed: 0,
            save_every: 100,
            skip_training_evaluation: false,
        }
    }
}

impl EvaluationParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_folds < 2 {
            return Err(Error::InvalidParameter(format!(
                "n_folds must be >= 2, got {}",
                self.n_folds
            )));
        }
        if self.save_every == 0 {
            return Err(Error::InvalidParameter("save_every must be >= 1".into()));
        }
        Ok(())
    }
}

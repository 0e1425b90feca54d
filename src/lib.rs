//!
//! Sequence labeling with variable-order Markov chains
//!
//! * `chain`: Markov chains over complete (observed, hidden) states
//! * `viterbi`: most likely hidden sequence, optionally with a reading frame
//! * `mixture`, `em`: weighted mixtures of chains fitted by EM
//! * `threaded`: parallel decoding of datasets
//! * `evaluation`: checkpointed quality estimation and cross-validation
//!
pub mod chain;
pub mod dataset;
pub mod decoder;
pub mod em;
pub mod error;
pub mod evaluation;
pub mod fragment;
pub mod mixture;
pub mod mocks;
pub mod params;
pub mod prob;
pub mod snapshot;
pub mod states;
pub mod threaded;
pub mod viterbi;

pub use error::{Error, Result};

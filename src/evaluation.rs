//!
//! Evaluation of decoders
//!
//! * `quality`: per-state prediction quality accumulators
//! * `run`: checkpointed decoding of a set of rows
//! * `cross_validation`: N-fold cross-validation built on runs
//! * `estimation`: single run of a trained decoder
//!
pub mod cross_validation;
pub mod estimation;
pub mod quality;
pub mod run;

pub use cross_validation::CrossValidation;
pub use estimation::QualityEstimation;
pub use quality::PredictionQuality;
pub use run::AlgorithmRun;

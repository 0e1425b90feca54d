//!
//! Error types of the crate
//!
//! Decoding refusal is not an error; decoders return `None` for it.
//!
use thiserror::Error;

/// Errors raised by configuration, persistence and parallel execution.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// complete-state alphabet does not have |observed| x |hidden| symbols
    #[error("complete alphabet has {actual} symbols, expected {expected} (= observed x hidden)")]
    AlphabetSize { expected: usize, actual: usize },

    /// the same symbol appears twice in one alphabet
    #[error("duplicate symbol '{symbol}' in alphabet \"{alphabet}\"")]
    DuplicateSymbol { symbol: char, alphabet: String },

    /// alphabet is empty or too large to be indexed by u8
    #[error("invalid alphabet \"{0}\"")]
    InvalidAlphabet(String),

    /// symbol not found while encoding a sequence
    #[error("unknown symbol '{symbol}' for alphabet \"{alphabet}\"")]
    UnknownSymbol { symbol: char, alphabet: String },

    /// datasets with different alphabets cannot be merged
    #[error("incompatible states: {0} vs {1}")]
    IncompatibleStates(String, String),

    /// mixture weights cannot be normalized
    #[error("invalid mixture weights: {0}")]
    InvalidWeights(String),

    /// parameter value outside of its domain
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// snapshot written by another format or schema version
    #[error("incompatible snapshot '{name}': {reason}")]
    IncompatibleSnapshot { name: String, reason: String },

    /// every task of a parallel fan-out failed
    #[error("all {0} tasks failed")]
    AllTasksFailed(usize),

    /// malformed line in a dataset file
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

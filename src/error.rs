//! Error types for nano-specdec.

use thiserror::Error;

/// Result type alias for nano-specdec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nano-specdec.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (gamma, stop set, prompt, sampling parameters).
    #[error("configuration error: {0}")]
    Config(String),

    /// Drafter and target disagree on the vocabulary size.
    #[error("vocabulary mismatch: drafter has {draft} tokens, target has {target}")]
    VocabMismatch { draft: usize, target: usize },

    /// Incremental state could not be pruned or is inconsistent.
    #[error("cache error: {0}")]
    Cache(String),

    /// A predictor returned output that does not fit the call contract.
    #[error("predictor error: {0}")]
    Predictor(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

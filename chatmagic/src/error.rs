//! Error types for chatmagic

use thiserror::Error;

/// Result type alias using chatmagic's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chatmagic operations
///
/// Tokenization and generation errors abort only the call that raised them.
/// Configuration errors mean the model bundle has to be reloaded.
#[derive(Error, Debug)]
pub enum Error {
    /// Vocabulary or merge table inconsistent with the text being encoded
    /// or the ids being decoded.
    #[error("Tokenization error: {0}")]
    Tokenization(String),

    /// The network step failed or returned malformed output.
    #[error("Generation error: {0}")]
    Generation(String),

    /// Malformed model bundle, tokenizer or formatter configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generation parameters outside their valid ranges.
    #[error("Invalid generation parameters: {0}")]
    InvalidParameters(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

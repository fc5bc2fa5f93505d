//! Engine error types.

use thiserror::Error;

/// Errors raised by the backend paths while loading or generating.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("backend init failed: {0}")]
    BackendInit(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("unsupported artifact: {0}")]
    UnsupportedArtifact(String),

    #[error("backend not compiled in: {0}")]
    BackendUnavailable(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

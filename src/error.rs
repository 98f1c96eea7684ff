//! Engine error taxonomy
//!
//! Only storage reads of the error-event table surface to callers of the
//! profile computation. Embedding failures are absorbed by the clusterer and
//! ledger failures are logged, so most of these variants stay internal.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("semantic clustering timed out after {0:?}")]
    EmbeddingTimeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

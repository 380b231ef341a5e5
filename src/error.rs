//! Error types for workpool.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid partition name: {0:?}")]
    InvalidPartition(String),

    #[error("invalid record id: {0:?}")]
    InvalidId(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

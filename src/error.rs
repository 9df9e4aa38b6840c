//! Error types for trackstore.

use thiserror::Error;

/// Machine-readable classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ResourceDoesNotExist,
    InvalidParameterValue,
    ResourceAlreadyExists,
    InternalError,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The entity directory exists but its metadata document is absent or
    /// unparsable.
    #[error("{0}")]
    MissingConfig(String),

    #[error("{0}")]
    ResourceDoesNotExist(String),

    #[error("{0}")]
    InvalidParameterValue(String),

    #[error("{0}")]
    AlreadyExists(String),

    /// Unexpected failure inside a batched write, carrying the original
    /// message.
    #[error("{0}")]
    Internal(String),

    #[error("Logger channel closed")]
    ChannelClosed,
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::ResourceDoesNotExist(_) | StoreError::MissingConfig(_) => {
                ErrorCode::ResourceDoesNotExist
            }
            StoreError::InvalidParameterValue(_) => ErrorCode::InvalidParameterValue,
            StoreError::AlreadyExists(_) => ErrorCode::ResourceAlreadyExists,
            _ => ErrorCode::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

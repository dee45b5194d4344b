//! Error types for dataflow.
//!
//! Library crates use [`DataflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all dataflow operations.
#[derive(Debug, thiserror::Error)]
pub enum DataflowError {
    /// The pipeline was started without any source identifiers.
    #[error("no sources provided")]
    Input,

    /// A single source could not be retrieved.
    #[error("retrieval of {source_id} failed: {message}")]
    Retrieval { source_id: String, message: String },

    /// A line could not be decoded into a product.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// A product failed basic field validation.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Identifier cache failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Durable store failure.
    #[error("storage error: {0}")]
    Store(String),

    /// Point lookup miss.
    #[error("product with id: {id} is not found")]
    NotFound { id: u32 },

    /// The run was cancelled before it could finish.
    #[error("pipeline cancelled")]
    Cancelled,

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DataflowError>;

/// Coarse classification of an error for callers that map errors onto
/// another protocol (HTTP status codes, exit codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Invalid,
    NotFound,
    Internal,
}

impl DataflowError {
    /// Create a retrieval error for `source_id`.
    pub fn retrieval(source_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Retrieval {
            source_id: source_id.into(),
            message: msg.into(),
        }
    }

    /// Create a decode error from any displayable message.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Input | Self::Decode { .. } | Self::Validation { .. } => ErrorCode::Invalid,
            Self::NotFound { .. } => ErrorCode::NotFound,
            _ => ErrorCode::Internal,
        }
    }

    /// Message safe to show to an end user. Internal failures are collapsed
    /// to a generic message; their details belong in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation { message } | Self::Decode { message } => message.clone(),
            Self::Input | Self::NotFound { .. } => self.to_string(),
            _ => "Internal error.".to_string(),
        }
    }
}

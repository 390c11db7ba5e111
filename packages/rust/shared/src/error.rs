//! Error types for modeldoc.
//!
//! Library crates use [`ModelDocError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all modeldoc operations.
#[derive(Debug, thiserror::Error)]
pub enum ModelDocError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to the text-generation service.
    #[error("network error: {0}")]
    Network(String),

    /// CSV or structured-data parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Text-generation service error (transport, API, or response shape).
    #[error("generation error: {0}")]
    Generation(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A required pipeline stage could not produce a usable result.
    #[error("stage `{stage}` failed: {message}")]
    Stage { stage: String, message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ModelDocError>;

impl ModelDocError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a stage failure for the named stage.
    pub fn stage(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
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
}

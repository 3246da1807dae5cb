//! Error types for coursegraph.
//!
//! Library crates use [`CourseGraphError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::BlockKey;

/// Top-level error type for all coursegraph operations.
#[derive(Debug, thiserror::Error)]
pub enum CourseGraphError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Course export or block key parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Structural problem in the block graph (unknown block, cycle, ...).
    #[error("graph error: {message}")]
    Graph { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (cache schema or content hash mismatch, ...).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Failure fetching student view data from the upstream source.
    #[error("source error: {0}")]
    Source(String),

    /// The collect phase was cancelled before it finished.
    #[error("operation cancelled")]
    Cancelled,

    /// A block expected to carry collected data has none.
    #[error("missing data for block {block}: {transformer}.{field}")]
    MissingBlockData {
        block: BlockKey,
        transformer: String,
        field: String,
    },

    /// A cached field was written by an incompatible transformer version.
    #[error(
        "stale field {transformer}.{field} on block {block}: stored version {stored}, expected {expected}"
    )]
    StaleField {
        block: BlockKey,
        transformer: String,
        field: String,
        stored: u32,
        expected: u32,
    },

    /// Collected data does not have the structure the reader requires.
    #[error("malformed field {field} on block {block}: {message}")]
    MalformedFieldData {
        block: BlockKey,
        field: String,
        message: String,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CourseGraphError>;

impl CourseGraphError {
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

    /// Create a graph error from any displayable message.
    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
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

    /// Create a malformed-field error for `block`.
    pub fn malformed(block: &BlockKey, field: &str, msg: impl Into<String>) -> Self {
        Self::MalformedFieldData {
            block: block.clone(),
            field: field.to_string(),
            message: msg.into(),
        }
    }

    /// Whether this error is local to one block and traversal may continue.
    pub fn is_block_local(&self) -> bool {
        matches!(self, Self::MissingBlockData { .. } | Self::Source(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CourseGraphError::config("missing CDN url");
        assert_eq!(err.to_string(), "config error: missing CDN url");

        let err = CourseGraphError::StaleField {
            block: BlockKey::new("video", "a"),
            transformer: "video_url".into(),
            field: "student_view_data".into(),
            stored: 1,
            expected: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("video@a"));
        assert!(msg.contains("stored version 1, expected 2"));
    }

    #[test]
    fn block_local_classification() {
        let missing = CourseGraphError::MissingBlockData {
            block: BlockKey::new("video", "b"),
            transformer: "video_url".into(),
            field: "student_view_data".into(),
        };
        assert!(missing.is_block_local());
        assert!(!CourseGraphError::Cancelled.is_block_local());
        let malformed = CourseGraphError::malformed(&BlockKey::new("video", "b"), "f", "bad");
        assert!(!malformed.is_block_local());
    }
}

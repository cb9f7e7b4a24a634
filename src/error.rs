//! Error taxonomy for a transpilation run.
//!
//! Only structural problems with the input tree and invalid configuration abort a run.
//! Everything construct-specific is recorded as a [`crate::diagnostics::Finding`].

use std::path::PathBuf;
use thiserror::Error;

use crate::ast::Location;

/// Errors that abort a run before any output is produced
#[derive(Error, Debug)]
pub enum TranspileError {
    #[error("malformed syntax tree at {location}: {reason}")]
    MalformedTree { location: Location, reason: String },

    #[error("failed to parse {path}: {message}")]
    ParseInput { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TranspileError {
    pub fn malformed(location: Location, reason: impl Into<String>) -> Self {
        TranspileError::MalformedTree {
            location,
            reason: reason.into(),
        }
    }

    /// True for the `ParseInputError` category (no output may be produced).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TranspileError::MalformedTree { .. } | TranspileError::ParseInput { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TranspileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = TranspileError::malformed(Location::new(3, 7), "function has empty body");
        assert_eq!(
            err.to_string(),
            "malformed syntax tree at 3:7: function has empty body"
        );
        assert!(err.is_input_error());
    }

    #[test]
    fn test_configuration_is_not_input_error() {
        let err = TranspileError::Configuration("bad module name".to_string());
        assert!(!err.is_input_error());
        assert!(err.to_string().contains("bad module name"));
    }
}

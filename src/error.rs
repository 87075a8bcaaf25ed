//! Error taxonomy for the harness
//!
//! Unit failures are never errors: they are recorded as statuses and
//! retried. Only the conditions below leave a component boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by harness components
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A cleanup target could not be removed for a reason other than
    /// already being gone
    #[error("Cleanup failed at {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A run directory declared mandatory for aggregation holds no event report
    #[error("Mandatory report input missing: {}", .0.display())]
    MissingMandatoryInput(PathBuf),

    /// An event report exists but cannot be parsed
    #[error("Malformed event report {} (line {line}): {reason}", .path.display())]
    MalformedReport {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Any other filesystem failure
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration or suite manifest
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        HarnessError::MalformedReport {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = HarnessError::MissingMandatoryInput(PathBuf::from("out/junit-3"));
        assert_eq!(err.to_string(), "Mandatory report input missing: out/junit-3");

        let err = HarnessError::malformed("a.xml", 4, "unknown element");
        assert!(err.to_string().contains("line 4"));
    }
}

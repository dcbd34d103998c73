//! Error types for connection sampling.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from enumerating connections or resolving processes.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Failed to read a kernel table.
    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        /// Table that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A kernel table had an unexpected format.
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type for monitoring operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_failed_names_path() {
        let err = MonitorError::ReadFailed {
            path: PathBuf::from("/proc/net/tcp"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/proc/net/tcp"));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_parse_error() {
        let err = MonitorError::ParseError("invalid hex".to_string());
        assert!(err.to_string().contains("invalid hex"));
    }
}

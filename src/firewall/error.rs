//! Error types for firewall rule operations.
//!
//! Two layers:
//! - [`BackendError`]: the native rule API failed or returned something unexpected
//! - [`RuleStoreError`]: what callers of the rule store see, classified into
//!   validation failures, safety rejections, and transient OS failures

use thiserror::Error;

use crate::safety::SafetyViolation;

/// Errors from a native rule API.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The native tool could not be started.
    #[error("Failed to execute {command}: {source}")]
    Spawn {
        /// Command line that failed.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The native tool ran but reported failure.
    #[error("{command} failed: {message}")]
    CommandFailed {
        /// Command line that failed.
        command: String,
        /// Output of the tool.
        message: String,
    },

    /// The rule store is not reachable.
    #[error("Rule store unavailable: {0}")]
    Unavailable(String),

    /// No rule with this exact name exists.
    #[error("No such rule: {0}")]
    NoSuchRule(String),

    /// A rule with this exact name already exists.
    #[error("Duplicate rule: {0}")]
    DuplicateRule(String),
}

/// Errors returned by the rule store.
#[derive(Debug, Error)]
pub enum RuleStoreError {
    /// The executable does not exist on disk.
    #[error("Application not found: {0}")]
    NotFound(String),

    /// The file does not have the expected executable extension.
    #[error("Only .{expected} files can be blocked: {path}")]
    WrongExtension {
        /// Rejected path.
        path: String,
        /// Required extension.
        expected: String,
    },

    /// A rule with the derived name exists already.
    #[error("Rule already exists: {name}")]
    AlreadyExists {
        /// Rule name.
        name: String,
        /// Application path of the existing rule.
        existing_path: String,
    },

    /// No rule with the derived name exists.
    #[error("No rule found: {0}")]
    NoRuleFound(String),

    /// The safety guard rejected the target.
    #[error(transparent)]
    Unsafe(#[from] SafetyViolation),

    /// The native rule API failed.
    #[error("Rule store failure: {0}")]
    Backend(#[from] BackendError),

    /// The call did not complete within the configured bound.
    #[error("Rule store call timed out")]
    Timeout,

    /// The rule-store worker is gone.
    #[error("Rule store worker has stopped")]
    WorkerStopped,
}

impl RuleStoreError {
    /// Whether the failure is due to the request itself.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RuleStoreError::NotFound(_)
                | RuleStoreError::WrongExtension { .. }
                | RuleStoreError::AlreadyExists { .. }
                | RuleStoreError::NoRuleFound(_)
        )
    }

    /// Whether the failure came from the OS.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuleStoreError::Backend(_) | RuleStoreError::Timeout | RuleStoreError::WorkerStopped
        )
    }
}

/// Result type for rule store operations.
pub type RuleStoreResult<T> = Result<T, RuleStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classes() {
        assert!(RuleStoreError::NotFound("C:\\x.exe".into()).is_validation());
        assert!(RuleStoreError::NoRuleFound("[WinNetGuard] x.exe".into()).is_validation());
        assert!(
            RuleStoreError::AlreadyExists {
                name: "[WinNetGuard] x.exe".into(),
                existing_path: "C:\\x.exe".into(),
            }
            .is_validation()
        );
        assert!(!RuleStoreError::Timeout.is_validation());
    }

    #[test]
    fn test_transient_classes() {
        let err = RuleStoreError::from(BackendError::Unavailable("service stopped".into()));
        assert!(err.is_transient());
        assert!(err.to_string().contains("service stopped"));
        assert!(RuleStoreError::WorkerStopped.is_transient());
        assert!(!RuleStoreError::from(SafetyViolation::CriticalPort(53)).is_transient());
    }

    #[test]
    fn test_wrong_extension_message() {
        let err = RuleStoreError::WrongExtension {
            path: "C:\\Apps\\script.bat".into(),
            expected: "exe".into(),
        };
        assert!(err.to_string().contains("Only .exe files"));
    }
}

//! Error types for the policy registry and engine.

use std::path::PathBuf;

use thiserror::Error;

use super::identity::EmptyPath;
use super::settings::SettingsError;
use crate::firewall::RuleStoreError;
use crate::safety::SafetyViolation;

/// Errors from reading or writing the policy store.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to read the policy store.
    #[error("Failed to read policy store {path}: {source}")]
    Read {
        /// Store location.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The policy store is not a valid document.
    #[error("Failed to parse policy store {path}: {source}")]
    Parse {
        /// Store location.
        path: PathBuf,
        /// The underlying JSON parse error.
        source: serde_json::Error,
    },

    /// Failed to serialize the registry.
    #[error("Failed to serialize policy store: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Failed to write the policy store.
    #[error("Failed to write policy store {path}: {source}")]
    Write {
        /// Store location.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Another process holds the store.
    #[error("Policy store is in use by another winnetguard process (lock {path})")]
    Locked {
        /// Lock file location.
        path: PathBuf,
    },

    /// Failed to open or take the store lock.
    #[error("Failed to lock policy store {path}: {source}")]
    Lock {
        /// Lock file location.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// Errors from a policy transition.
///
/// Every variant is reported once to the caller of the transition; the
/// registry has already been rolled back when one is returned.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The path cannot identify an application.
    #[error(transparent)]
    InvalidPath(#[from] EmptyPath),

    /// The safety guard rejected the target.
    #[error(transparent)]
    Unsafe(#[from] SafetyViolation),

    /// The rule store rejected or failed the mutation.
    #[error(transparent)]
    RuleStore(#[from] RuleStoreError),

    /// A rule with the derived name already blocks a different executable.
    #[error("Rule {rule} already blocks a different executable: {existing}")]
    RuleCollision {
        /// Colliding rule name.
        rule: String,
        /// Application path the existing rule targets.
        existing: String,
    },

    /// The setting change was rejected.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The engine is no longer accepting commands.
    #[error("Policy engine has stopped")]
    Stopped,
}

impl EngineError {
    /// Whether this is a validation failure (bad input, not a system fault).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            EngineError::InvalidPath(_)
            | EngineError::RuleCollision { .. }
            | EngineError::Settings(_) => true,
            EngineError::RuleStore(e) => e.is_validation(),
            EngineError::Unsafe(_) | EngineError::Stopped => false,
        }
    }

    /// Whether this failure came from the OS and may succeed on a later try.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::RuleStore(e) if e.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_names_path() {
        let err = RegistryError::Write {
            path: PathBuf::from("/var/lib/winnetguard/policy.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("policy.json"));
    }

    #[test]
    fn test_classification() {
        let unsafe_err = EngineError::from(SafetyViolation::CriticalPort(53));
        assert!(!unsafe_err.is_validation());
        assert!(!unsafe_err.is_transient());

        let collision = EngineError::RuleCollision {
            rule: "[WinNetGuard] app.exe".to_string(),
            existing: "C:\\Other\\app.exe".to_string(),
        };
        assert!(collision.is_validation());

        let timeout = EngineError::from(RuleStoreError::Timeout);
        assert!(timeout.is_transient());
        assert!(!timeout.is_validation());
    }
}

//! Audit event types for structured logging.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit events for security logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Daemon started.
    SessionStart {
        /// User running the daemon.
        user: String,
        /// Process ID of the daemon.
        pid: u32,
        /// Rule backend in use.
        backend: String,
    },

    /// Daemon stopped.
    SessionEnd {
        /// User who ran the daemon.
        user: String,
        /// Duration of the session in seconds.
        duration_sec: u64,
    },

    /// An application connected for the first time this session.
    AppDetected {
        /// Executable path.
        path: String,
    },

    /// An application was blocked.
    AppBlocked {
        /// Executable path.
        path: String,
        /// Name of the block rule.
        rule: String,
        /// Why it was blocked.
        reason: BlockReason,
    },

    /// An application was allowed.
    AppAllowed {
        /// Executable path.
        path: String,
        /// Whether a block rule was removed.
        rule_removed: bool,
    },

    /// All decisions about an application were cleared.
    AppForgotten {
        /// Executable path.
        path: String,
        /// Whether a block rule was removed.
        rule_removed: bool,
    },

    /// An application was exempted from blocking by the safety guard.
    SafetyExempt {
        /// Executable path.
        path: String,
        /// Violated criterion.
        reason: String,
    },

    /// A rule store mutation failed.
    RuleStoreFailure {
        /// Executable path.
        path: String,
        /// Attempted operation.
        operation: RuleOperation,
        /// Error message.
        error: String,
    },

    /// Every prefixed rule was removed and the lists were cleared.
    EmergencyReset {
        /// Rules removed.
        rules_removed: usize,
        /// Rules that could not be removed.
        failures: usize,
    },
}

/// Why an application was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Automatically blocked on first sighting, pending review.
    DefaultDeny,
    /// Blocked by an explicit user decision.
    UserDecision,
}

/// Rule store operation named in failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperation {
    /// Creating a block rule.
    Add,
    /// Removing a block rule.
    Remove,
    /// Looking a rule up.
    Find,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(event: &AuditEvent) -> String {
        serde_json::to_string(&event.with_timestamp()).unwrap()
    }

    #[test]
    fn test_session_start_serialization() {
        let json = json(&AuditEvent::SessionStart {
            user: "admin".to_string(),
            pid: 12345,
            backend: "netsh".to_string(),
        });

        assert!(json.contains("\"event\":\"session_start\""));
        assert!(json.contains("\"user\":\"admin\""));
        assert!(json.contains("\"pid\":12345"));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_app_blocked_serialization() {
        let json = json(&AuditEvent::AppBlocked {
            path: "C:\\Apps\\foo.exe".to_string(),
            rule: "[WinNetGuard] foo.exe".to_string(),
            reason: BlockReason::DefaultDeny,
        });

        assert!(json.contains("\"event\":\"app_blocked\""));
        assert!(json.contains("\"reason\":\"default_deny\""));
        assert!(json.contains("\"rule\":\"[WinNetGuard] foo.exe\""));
    }

    #[test]
    fn test_safety_exempt_serialization() {
        let json = json(&AuditEvent::SafetyExempt {
            path: "C:\\Windows\\System32\\svchost.exe".to_string(),
            reason: "Cannot block critical system process: svchost.exe".to_string(),
        });

        assert!(json.contains("\"event\":\"safety_exempt\""));
        assert!(json.contains("critical system process"));
    }

    #[test]
    fn test_rule_store_failure_serialization() {
        let json = json(&AuditEvent::RuleStoreFailure {
            path: "C:\\Apps\\foo.exe".to_string(),
            operation: RuleOperation::Remove,
            error: "Rule store call timed out".to_string(),
        });

        assert!(json.contains("\"event\":\"rule_store_failure\""));
        assert!(json.contains("\"operation\":\"remove\""));
    }

    #[test]
    fn test_emergency_reset_serialization() {
        let json = json(&AuditEvent::EmergencyReset {
            rules_removed: 4,
            failures: 1,
        });

        assert!(json.contains("\"event\":\"emergency_reset\""));
        assert!(json.contains("\"rules_removed\":4"));
        assert!(json.contains("\"failures\":1"));
    }
}

//! Message types exchanged between the policy engine and a UI.
//!
//! # Message Flow
//!
//! ```text
//! ┌─────────────────┐     EngineToUi      ┌─────────────────┐
//! │                 │────────────────────>│                 │
//! │  PolicyEngine   │                     │       UI        │
//! │                 │<────────────────────│                 │
//! └─────────────────┘     UiToEngine      └─────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::monitor::Connection;
use crate::policy::engine::AppState;
use crate::policy::settings::{SettingKey, SettingValue};

/// Messages sent from the engine to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineToUi {
    /// Current connections, truncated to the display limit.
    ConnectionSnapshot {
        /// Connections to display.
        connections: Vec<Connection>,
        /// Number of connections before truncation.
        total: usize,
        /// When the sample was taken.
        timestamp: DateTime<Utc>,
    },
    /// A new application was blocked and awaits review.
    PendingDecision {
        /// Unique identifier for this notification.
        id: Uuid,
        /// Executable path.
        path: String,
        /// Executable file name.
        name: String,
        /// When the application was detected.
        timestamp: DateTime<Utc>,
    },
    /// A user command was applied.
    DecisionApplied {
        /// Executable path.
        path: String,
        /// Resulting state.
        state: AppState,
    },
    /// A setting was changed.
    SettingChanged {
        /// Setting name.
        key: SettingKey,
        /// New value.
        value: SettingValue,
    },
    /// A user command failed; nothing was changed.
    CommandFailed {
        /// The command, as text.
        command: String,
        /// Human-readable reason.
        reason: String,
    },
    /// The engine is shutting down.
    Shutdown,
}

/// Messages sent from the UI to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UiToEngine {
    /// Allow an application.
    Allow {
        /// Executable path.
        path: String,
    },
    /// Block an application.
    Block {
        /// Executable path.
        path: String,
    },
    /// Clear every decision about an application.
    Forget {
        /// Executable path.
        path: String,
    },
    /// Change a setting.
    UpdateSetting {
        /// Setting name.
        key: SettingKey,
        /// New value.
        value: SettingValue,
    },
    /// The UI is going away.
    UiShutdown,
}

impl fmt::Display for UiToEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiToEngine::Allow { path } => write!(f, "allow {path}"),
            UiToEngine::Block { path } => write!(f, "block {path}"),
            UiToEngine::Forget { path } => write!(f, "forget {path}"),
            UiToEngine::UpdateSetting { key, value } => write!(f, "set {key} {value}"),
            UiToEngine::UiShutdown => write!(f, "quit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_decision_serialization() {
        let msg = EngineToUi::PendingDecision {
            id: Uuid::new_v4(),
            path: "C:\\Apps\\foo.exe".to_string(),
            name: "foo.exe".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("PendingDecision"));
        assert!(json.contains("foo.exe"));
    }

    #[test]
    fn test_command_display() {
        let cmd = UiToEngine::UpdateSetting {
            key: SettingKey::UiFontSize,
            value: SettingValue::Integer(14),
        };
        assert_eq!(cmd.to_string(), "set ui_font_size 14");
        assert_eq!(
            UiToEngine::Allow {
                path: "C:\\Apps\\foo.exe".to_string()
            }
            .to_string(),
            "allow C:\\Apps\\foo.exe"
        );
    }
}

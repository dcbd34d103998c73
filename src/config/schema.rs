//! Configuration schema definitions.
//!
//! Every field is an optional override. Layers are merged in order (later
//! layers win when they set a value) and the accessors resolve built-in
//! defaults for anything no layer set.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Default bound on one sampling tick, in milliseconds.
pub const DEFAULT_TICK_TIMEOUT_MS: u64 = 5_000;

/// Default bound on joining the sampler at shutdown, in milliseconds.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 2_000;

/// Default bound on a single rule-store call, in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Upper bound for every configured timeout.
pub const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Default rule-name prefix.
pub const DEFAULT_RULE_PREFIX: &str = "WinNetGuard";

/// Default executable extension.
pub const DEFAULT_EXTENSION: &str = "exe";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Connection sampling.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Firewall rule store.
    #[serde(default)]
    pub firewall: FirewallConfig,

    /// Policy persistence.
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl Config {
    /// Merge another config into this one. Values set in `other` win.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.monitor.merge(other.monitor);
        self.firewall.merge(other.firewall);
        self.policy.merge(other.policy);
    }

    /// Check the merged configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_timeout("monitor.tick_timeout_ms", self.monitor.tick_timeout_ms)?;
        check_timeout("monitor.stop_timeout_ms", self.monitor.stop_timeout_ms)?;
        check_timeout("firewall.call_timeout_ms", self.firewall.call_timeout_ms)?;

        if let Some(prefix) = &self.firewall.rule_prefix {
            if prefix.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "firewall.rule_prefix".to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            if prefix.contains(['[', ']']) {
                return Err(ConfigError::InvalidValue {
                    field: "firewall.rule_prefix".to_string(),
                    message: "must not contain '[' or ']'".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn check_timeout(field: &str, value: Option<u64>) -> Result<(), ConfigError> {
    match value {
        Some(0) => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        Some(ms) if ms > MAX_TIMEOUT_MS => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("{ms} ms exceeds the {MAX_TIMEOUT_MS} ms limit"),
        }),
        _ => Ok(()),
    }
}

/// General application settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// Log filter used when neither `-v` nor `RUST_LOG` is given.
    #[serde(default)]
    pub log_level: Option<String>,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
    }
}

/// Connection sampling settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Bound on one sampling tick.
    #[serde(default)]
    pub tick_timeout_ms: Option<u64>,

    /// Bound on joining the sampler at shutdown.
    #[serde(default)]
    pub stop_timeout_ms: Option<u64>,

    /// Root of the proc filesystem.
    #[serde(default)]
    pub proc_root: Option<PathBuf>,
}

impl MonitorConfig {
    fn merge(&mut self, other: MonitorConfig) {
        if other.tick_timeout_ms.is_some() {
            self.tick_timeout_ms = other.tick_timeout_ms;
        }
        if other.stop_timeout_ms.is_some() {
            self.stop_timeout_ms = other.stop_timeout_ms;
        }
        if other.proc_root.is_some() {
            self.proc_root = other.proc_root;
        }
    }

    /// Resolved tick timeout.
    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms.unwrap_or(DEFAULT_TICK_TIMEOUT_MS))
    }

    /// Resolved shutdown join timeout.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms.unwrap_or(DEFAULT_STOP_TIMEOUT_MS))
    }

    /// Resolved proc root.
    pub fn proc_root(&self) -> PathBuf {
        self.proc_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("/proc"))
    }
}

/// Which rule backend to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Windows Defender Firewall via `netsh`.
    #[default]
    Netsh,
    /// In-process rule table; nothing reaches the OS.
    Memory,
}

impl BackendKind {
    /// Lowercase name, as written in config files.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Netsh => "netsh",
            BackendKind::Memory => "memory",
        }
    }
}

/// Firewall rule store settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallConfig {
    /// Prefix placed in brackets at the start of every rule name.
    #[serde(default)]
    pub rule_prefix: Option<String>,

    /// Rule backend.
    #[serde(default)]
    pub backend: Option<BackendKind>,

    /// Required executable extension; empty disables the check.
    #[serde(default)]
    pub executable_extension: Option<String>,

    /// Bound on a single rule-store call.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

impl FirewallConfig {
    fn merge(&mut self, other: FirewallConfig) {
        if other.rule_prefix.is_some() {
            self.rule_prefix = other.rule_prefix;
        }
        if other.backend.is_some() {
            self.backend = other.backend;
        }
        if other.executable_extension.is_some() {
            self.executable_extension = other.executable_extension;
        }
        if other.call_timeout_ms.is_some() {
            self.call_timeout_ms = other.call_timeout_ms;
        }
    }

    /// Resolved rule prefix.
    pub fn rule_prefix(&self) -> &str {
        self.rule_prefix.as_deref().unwrap_or(DEFAULT_RULE_PREFIX)
    }

    /// Resolved backend.
    pub fn backend(&self) -> BackendKind {
        self.backend.unwrap_or_default()
    }

    /// Resolved executable extension, without a leading dot.
    pub fn executable_extension(&self) -> &str {
        self.executable_extension
            .as_deref()
            .unwrap_or(DEFAULT_EXTENSION)
            .trim_start_matches('.')
    }

    /// Resolved call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.unwrap_or(DEFAULT_CALL_TIMEOUT_MS))
    }
}

/// Policy persistence settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Location of the policy store.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

impl PolicyConfig {
    fn merge(&mut self, other: PolicyConfig) {
        if other.store_path.is_some() {
            self.store_path = other.store_path;
        }
    }

    /// Resolved store path: `<data_dir>/winnetguard/policy.json`.
    pub fn store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("winnetguard")
                .join("policy.json")
        })
    }
}

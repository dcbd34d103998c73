//! Configuration system for winnetguard.
//!
//! Daemon configuration is TOML, loaded from multiple sources and merged in
//! order:
//!
//! 1. System config: `/etc/winnetguard/config.toml`
//! 2. User config: `~/.config/winnetguard/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Every field is optional; a value set in a later layer overrides earlier
//! ones. Anything unset resolves to a built-in default.
//!
//! ```toml
//! [monitor]
//! tick_timeout_ms = 5000
//!
//! [firewall]
//! rule_prefix = "WinNetGuard"
//! backend = "netsh"
//! call_timeout_ms = 10000
//!
//! [policy]
//! store_path = "/var/lib/winnetguard/policy.json"
//! ```
//!
//! User decisions and UI settings are not configuration; they live in the
//! policy store at `policy.store_path`.

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    BackendKind, Config, FirewallConfig, GeneralConfig, MonitorConfig, PolicyConfig,
};

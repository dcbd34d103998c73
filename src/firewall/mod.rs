//! Outbound block rules in the native firewall.
//!
//! - [`rule`]: rule model and the `"[<prefix>] <basename>"` naming contract
//! - [`backend`]: the native rule API seam and an in-memory implementation
//! - [`netsh`]: Windows Defender Firewall via `netsh advfirewall`
//! - [`store`]: rule operations, serialized through one worker thread

pub mod backend;
pub mod error;
pub mod netsh;
pub mod rule;
pub mod store;

pub use backend::{MemoryBackend, RuleBackend};
pub use error::{BackendError, RuleStoreError, RuleStoreResult};
pub use netsh::NetshBackend;
pub use rule::{Direction, FirewallRule, RuleAction, rule_name};
pub use store::{FirewallRuleStore, RuleStoreHandle};

//! winnetguard: per-application outbound firewall.
//!
//! Watches live network connections, attributes each one to the executable
//! that owns it, and enforces a per-application allow/block policy through
//! the host firewall.
//!
//! # Policy Model
//!
//! The model is **default-deny-first**: an application is blocked the moment
//! it is first seen and queued for the user to allow or confirm. OS-critical
//! processes are never blocked.
//!
//! # Architecture
//!
//! - **Monitor**: periodic connection sampling with first-seen detection
//! - **Firewall**: named outbound block rules behind a single-owner worker
//! - **Policy**: persisted whitelist/blacklist and the decision state machine
//! - **Safety**: the gate every block rule must pass
//! - **Control**: engine/UI message streams and a console front end
//! - **Config**: hierarchical TOML daemon configuration
//! - **Telemetry**: structured syslog audit trail

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod context;
pub mod control;
pub mod firewall;
pub mod monitor;
pub mod orchestrator;
pub mod policy;
pub mod safety;
pub mod telemetry;

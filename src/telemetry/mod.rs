//! Audit trail for policy decisions.
//!
//! Security-relevant decisions (detections, blocks, allows, safety exemptions,
//! rule store failures, resets) are written to syslog under the `WINNETGUARD`
//! tag as one JSON object per line. This is separate from diagnostic logging,
//! which goes to stderr via `tracing`.
//!
//! The logger is owned by the application context and shared by `Arc`; there
//! is no global instance.
//!
//! ```ignore
//! use winnetguard::telemetry::{AuditEvent, AuditLogger};
//!
//! let audit = AuditLogger::new()?;
//! audit.log(AuditEvent::AppDetected { path: "C:\\Apps\\foo.exe".into() });
//! ```
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"app_blocked","path":"C:\\Apps\\foo.exe","rule":"[WinNetGuard] foo.exe","reason":"default_deny"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, BlockReason, RuleOperation};
pub use syslog::{AuditLogger, SYSLOG_TAG};

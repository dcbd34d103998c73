//! Syslog integration for audit logging.

use std::sync::Mutex;

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "WINNETGUARD";

enum Sink {
    Syslog(Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>),
    Memory(Mutex<Vec<String>>),
    Null,
}

/// Audit logger that writes structured JSON events to syslog.
///
/// Shared by reference (usually behind an `Arc`); the writer sits behind a
/// mutex so events can be logged from any task.
pub struct AuditLogger {
    sink: Sink,
}

impl AuditLogger {
    /// Create a new audit logger connected to the local syslog daemon.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            sink: Sink::Syslog(Mutex::new(writer)),
        })
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self { sink: Sink::Null }
    }

    /// Create a logger that keeps serialized events in memory.
    ///
    /// Used by tests and `--dry-run` sessions to inspect the audit trail.
    pub fn new_memory() -> Self {
        Self {
            sink: Sink::Memory(Mutex::new(Vec::new())),
        }
    }

    /// Log an audit event.
    ///
    /// The event is serialized to JSON with an ISO8601 timestamp. Failures are
    /// reported through `tracing` and otherwise ignored.
    pub fn log(&self, event: AuditEvent) {
        if matches!(self.sink, Sink::Null) {
            return;
        }

        let json = match serde_json::to_string(&event.with_timestamp()) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        match &self.sink {
            Sink::Syslog(writer) => match writer.lock() {
                Ok(mut writer) => {
                    if let Err(e) = writer.info(&json) {
                        error!("Failed to write to syslog: {}", e);
                    }
                }
                Err(e) => error!("Failed to acquire syslog writer lock: {}", e),
            },
            Sink::Memory(events) => match events.lock() {
                Ok(mut events) => events.push(json.clone()),
                Err(e) => error!("Failed to acquire audit buffer lock: {}", e),
            },
            Sink::Null => {}
        }
        debug!("Logged audit event: {}", json);
    }

    /// Events captured by a memory logger, oldest first.
    ///
    /// Empty for syslog and null loggers.
    pub fn captured(&self) -> Vec<String> {
        match &self.sink {
            Sink::Memory(events) => events.lock().map(|e| e.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        matches!(self.sink, Sink::Null)
    }
}

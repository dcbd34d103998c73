//! Process directory: pid to name and executable path.

use std::fs;
use std::path::PathBuf;

use tracing::trace;

/// Identity of a running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Short process name.
    pub name: String,
    /// Absolute executable path; empty when it could not be read.
    pub path: String,
}

impl ProcessInfo {
    /// Placeholder for a process that is gone or inaccessible.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            path: String::new(),
        }
    }
}

/// Resolves pids to processes.
///
/// Lookups race with process exit: a pid seen during enumeration may be gone
/// by the time it is resolved.
pub trait ProcessDirectory: Send + Sync {
    /// Resolve `pid`, or `None` if the process is gone or inaccessible.
    fn lookup(&self, pid: u32) -> Option<ProcessInfo>;
}

/// Process directory backed by procfs.
#[derive(Debug, Clone)]
pub struct ProcfsDirectory {
    root: PathBuf,
}

impl Default for ProcfsDirectory {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcfsDirectory {
    /// Directory reading the procfs mounted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ProcessDirectory for ProcfsDirectory {
    fn lookup(&self, pid: u32) -> Option<ProcessInfo> {
        let dir = self.root.join(pid.to_string());

        let name = match fs::read_to_string(dir.join("comm")) {
            Ok(comm) => comm.trim_end().to_string(),
            Err(e) => {
                trace!("Process {} is gone: {}", pid, e);
                return None;
            }
        };

        let path = match fs::read_link(dir.join("exe")) {
            Ok(exe) => {
                let exe = exe.to_string_lossy();
                exe.strip_suffix(" (deleted)").unwrap_or(&exe).to_string()
            }
            Err(e) => {
                trace!("Cannot resolve executable of {} ({}): {}", pid, name, e);
                String::new()
            }
        };

        Some(ProcessInfo { name, path })
    }
}

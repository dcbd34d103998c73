//! Safety guard for blocking decisions.
//!
//! Some targets must never be blocked, no matter what the policy says:
//! blocking them would cut the host off from its own name resolution, address
//! assignment, time sync, or core OS services. This module is the single gate
//! consulted before any block rule is created and before any application is
//! surfaced to the user as a pending decision.
//!
//! # Protected Targets
//!
//! - **Processes** (basename, case-insensitive, with or without `.exe`):
//!   `svchost`, `lsass`, `services`, `csrss`, `winlogon`, `dwm`
//! - **Ports**: 53 (DNS), 67/68 (DHCP), 123 (NTP)
//! - **Addresses**: `127.0.0.1`, `::1`
//!
//! A target with no criteria set is safe. Any single match makes the whole
//! target unsafe.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use crate::policy::identity::basename;

/// OS-critical process names (without extension).
pub const CRITICAL_PROCESSES: &[&str] = &[
    "svchost", "lsass", "services", "csrss", "winlogon", "dwm",
];

/// Ports the host needs for basic connectivity.
pub const CRITICAL_PORTS: &[u16] = &[
    53,  // DNS
    67,  // DHCP server
    68,  // DHCP client
    123, // NTP
];

/// Loopback addresses that must stay reachable.
pub const LOOPBACK_ADDRESSES: &[IpAddr] = &[
    IpAddr::V4(Ipv4Addr::LOCALHOST),
    IpAddr::V6(Ipv6Addr::LOCALHOST),
];

/// Reason a target was rejected by the safety guard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    /// The executable is an OS-critical process.
    #[error("Cannot block critical system process: {0}")]
    CriticalProcess(String),

    /// The port is required for system stability.
    #[error("Cannot block critical port: {0} (required for system stability)")]
    CriticalPort(u16),

    /// The address is a loopback address.
    #[error("Cannot block loopback address: {0}")]
    LoopbackAddress(IpAddr),
}

/// A candidate blocking target. Unset criteria are not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockTarget<'a> {
    /// Executable path.
    pub path: Option<&'a str>,
    /// Port number.
    pub port: Option<u16>,
    /// IP address.
    pub ip: Option<IpAddr>,
}

impl<'a> BlockTarget<'a> {
    /// Target consisting of just an executable path.
    #[must_use]
    pub fn process(path: &'a str) -> Self {
        Self {
            path: Some(path),
            ..Self::default()
        }
    }

    /// Add a port to the target.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Add an IP address to the target.
    #[must_use]
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }
}

/// Decide whether a target may ever be blocked.
///
/// Returns `Ok(())` when safe, or the first violated criterion. Criteria are
/// checked in the order process, port, address.
pub fn evaluate(target: &BlockTarget<'_>) -> Result<(), SafetyViolation> {
    if let Some(path) = target.path
        && is_critical_process(path)
    {
        return Err(SafetyViolation::CriticalProcess(
            basename(path).to_lowercase(),
        ));
    }

    if let Some(port) = target.port
        && CRITICAL_PORTS.contains(&port)
    {
        return Err(SafetyViolation::CriticalPort(port));
    }

    if let Some(ip) = target.ip {
        let ip = ip.to_canonical();
        if LOOPBACK_ADDRESSES.contains(&ip) {
            return Err(SafetyViolation::LoopbackAddress(ip));
        }
    }

    Ok(())
}

/// Convenience wrapper returning only the verdict.
#[must_use]
pub fn is_safe_to_block(target: &BlockTarget<'_>) -> bool {
    evaluate(target).is_ok()
}

fn is_critical_process(path: &str) -> bool {
    let name = basename(path).to_lowercase();
    let stem = name.strip_suffix(".exe").unwrap_or(&name);
    CRITICAL_PROCESSES.contains(&stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_process_any_directory() {
        for path in [
            "C:\\Windows\\System32\\svchost.exe",
            "D:\\elsewhere\\SVCHOST.EXE",
            "svchost.exe",
            "/opt/wine/lsass.exe",
            "C:\\Windows\\dwm",
        ] {
            let result = evaluate(&BlockTarget::process(path));
            assert!(
                matches!(result, Err(SafetyViolation::CriticalProcess(_))),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn test_similar_names_are_safe() {
        assert!(is_safe_to_block(&BlockTarget::process("C:\\Apps\\svchost2.exe")));
        assert!(is_safe_to_block(&BlockTarget::process("C:\\svchost\\app.exe")));
        assert!(is_safe_to_block(&BlockTarget::process("C:\\Apps\\myservices.exe")));
    }

    #[test]
    fn test_critical_ports() {
        for port in [53, 67, 68, 123] {
            assert_eq!(
                evaluate(&BlockTarget::default().with_port(port)),
                Err(SafetyViolation::CriticalPort(port))
            );
        }
        assert!(is_safe_to_block(&BlockTarget::default().with_port(443)));
    }

    #[test]
    fn test_loopback_addresses() {
        let v4: IpAddr = "127.0.0.1".parse().unwrap();
        let v6: IpAddr = "::1".parse().unwrap();
        let mapped: IpAddr = "::ffff:127.0.0.1".parse().unwrap();

        assert!(!is_safe_to_block(&BlockTarget::default().with_ip(v4)));
        assert!(!is_safe_to_block(&BlockTarget::default().with_ip(v6)));
        assert!(!is_safe_to_block(&BlockTarget::default().with_ip(mapped)));
        assert!(is_safe_to_block(
            &BlockTarget::default().with_ip("93.184.216.34".parse().unwrap())
        ));
    }

    #[test]
    fn test_empty_target_is_safe() {
        assert_eq!(evaluate(&BlockTarget::default()), Ok(()));
    }

    #[test]
    fn test_any_match_rejects_whole_target() {
        let target = BlockTarget::process("C:\\Apps\\foo.exe")
            .with_port(53)
            .with_ip("8.8.8.8".parse().unwrap());
        assert_eq!(evaluate(&target), Err(SafetyViolation::CriticalPort(53)));
    }

    #[test]
    fn test_reason_names_criterion() {
        let err = evaluate(&BlockTarget::process("C:\\Windows\\System32\\svchost.exe"))
            .unwrap_err();
        assert!(err.to_string().contains("critical system process"));
        assert!(err.to_string().contains("svchost.exe"));

        let err = evaluate(&BlockTarget::default().with_ip("::1".parse().unwrap())).unwrap_err();
        assert!(err.to_string().contains("loopback"));
    }
}

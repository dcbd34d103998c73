//! Connection enumeration from the Linux procfs socket tables.
//!
//! Sockets come from `/proc/net/{tcp,tcp6,udp,udp6}`; owners are found by
//! scanning every `/proc/<pid>/fd` directory for `socket:[<inode>]` links.
//!
//! # Notes
//!
//! 1. Reading another user's `fd` directory needs privileges. Sockets whose owner
//!    cannot be found (including kernel-held `TIME_WAIT` sockets) are dropped.
//!
//! 2. Both the IPv4 and IPv6 tables must be scanned. Many clients connect over
//!    dual-stack sockets, which only appear in `tcp6`/`udp6`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::error::{MonitorError, MonitorResult};
use super::sampler::{ConnectionSource, RawConnection};

/// Transport protocol of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

/// One row of a `/proc/net/*` socket table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Local endpoint.
    pub local: SocketAddr,
    /// Remote endpoint.
    pub remote: SocketAddr,
    /// Conventional state name (`ESTABLISHED`, `SYN_SENT`, ...).
    pub state: &'static str,
    /// Socket inode.
    pub inode: u64,
}

impl SocketEntry {
    /// Whether the socket is connected to a peer.
    #[must_use]
    pub fn has_remote(&self) -> bool {
        !(self.remote.ip().is_unspecified() && self.remote.port() == 0)
    }
}

const TABLES: [(&str, Protocol, bool); 4] = [
    ("tcp", Protocol::Tcp, false),
    ("tcp6", Protocol::Tcp, true),
    ("udp", Protocol::Udp, false),
    ("udp6", Protocol::Udp, true),
];

/// Connection source reading a procfs tree.
#[derive(Debug, Clone)]
pub struct ProcNet {
    root: PathBuf,
}

impl Default for ProcNet {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcNet {
    /// Source reading the procfs mounted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Every socket with a specified remote endpoint.
    ///
    /// A missing table (e.g. IPv6 disabled) is skipped, but a tree with no
    /// socket table at all is an error. Any other read failure fails the whole
    /// scan.
    pub fn sockets(&self) -> MonitorResult<Vec<SocketEntry>> {
        let mut sockets = Vec::new();
        let mut tables_read = 0;

        for (table, protocol, is_ipv6) in TABLES {
            let path = self.root.join("net").join(table);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    trace!("Skipping missing socket table {:?}", path);
                    continue;
                }
                Err(e) => return Err(MonitorError::ReadFailed { path, source: e }),
            };
            tables_read += 1;

            sockets.extend(
                parse_proc_net(&content, protocol, is_ipv6)?
                    .into_iter()
                    .filter(SocketEntry::has_remote),
            );
        }

        if tables_read == 0 {
            return Err(MonitorError::ReadFailed {
                path: self.root.join("net"),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no tcp, tcp6, udp or udp6 socket table",
                ),
            });
        }

        Ok(sockets)
    }

    /// Map of socket inode to owning pid.
    ///
    /// Processes that exit mid-scan or whose descriptors are unreadable are
    /// skipped silently.
    pub fn socket_owners(&self) -> MonitorResult<HashMap<u64, u32>> {
        let entries = fs::read_dir(&self.root).map_err(|e| MonitorError::ReadFailed {
            path: self.root.clone(),
            source: e,
        })?;

        let mut owners = HashMap::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            scan_fds(&entry.path().join("fd"), pid, &mut owners);
        }

        Ok(owners)
    }
}

fn scan_fds(fd_dir: &Path, pid: u32, owners: &mut HashMap<u64, u32>) {
    let Ok(fds) = fs::read_dir(fd_dir) else {
        return;
    };
    for fd in fds.flatten() {
        let Ok(target) = fs::read_link(fd.path()) else {
            continue;
        };
        if let Some(inode) = parse_socket_link(&target.to_string_lossy()) {
            owners.entry(inode).or_insert(pid);
        }
    }
}

impl ConnectionSource for ProcNet {
    fn connections(&self) -> MonitorResult<Vec<RawConnection>> {
        let sockets = self.sockets()?;
        if sockets.is_empty() {
            return Ok(Vec::new());
        }
        let owners = self.socket_owners()?;

        Ok(sockets
            .into_iter()
            .filter_map(|socket| {
                owners.get(&socket.inode).map(|&pid| RawConnection {
                    pid,
                    protocol: socket.protocol,
                    local: socket.local,
                    remote: socket.remote,
                    status: socket.state.to_string(),
                })
            })
            .collect())
    }
}

/// Parse `socket:[12345]` into the inode number.
fn parse_socket_link(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Conventional name of a kernel TCP state.
fn state_name(state: u8) -> &'static str {
    match state {
        0x01 => "ESTABLISHED",
        0x02 => "SYN_SENT",
        0x03 => "SYN_RECV",
        0x04 => "FIN_WAIT1",
        0x05 => "FIN_WAIT2",
        0x06 => "TIME_WAIT",
        0x07 => "CLOSE",
        0x08 => "CLOSE_WAIT",
        0x09 => "LAST_ACK",
        0x0A => "LISTEN",
        0x0B => "CLOSING",
        _ => "UNKNOWN",
    }
}

/// Parse the content of a `/proc/net/{tcp,udp}[6]` table.
///
/// Format (each line after header):
/// ```text
///    sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
///    0: 0100007F:1F90 22D8B85D:01BB 01 00000000:00000000 00:00000000 00000000  1000        0 12345 ...
/// ```
///
/// The IPv6 tables use 32 hex chars per address instead of 8.
fn parse_proc_net(
    content: &str,
    protocol: Protocol,
    is_ipv6: bool,
) -> MonitorResult<Vec<SocketEntry>> {
    let mut entries = Vec::new();

    for line in content.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 {
            continue;
        }

        let parse_endpoint = |s: &str| -> MonitorResult<SocketAddr> {
            let (ip, port) = if is_ipv6 {
                parse_hex_addr_v6(s)?
            } else {
                let (v4, port) = parse_hex_addr_v4(s)?;
                (IpAddr::V4(v4), port)
            };
            Ok(SocketAddr::new(ip, port))
        };

        let local = parse_endpoint(parts[1])?;
        let remote = parse_endpoint(parts[2])?;

        let state = u8::from_str_radix(parts[3], 16)
            .map_err(|_| MonitorError::ParseError(format!("Invalid state: {}", parts[3])))?;

        let inode: u64 = parts[9]
            .parse()
            .map_err(|_| MonitorError::ParseError(format!("Invalid inode: {}", parts[9])))?;

        entries.push(SocketEntry {
            protocol,
            local,
            remote,
            state: state_name(state),
            inode,
        });
    }

    Ok(entries)
}

/// Parse hex-encoded IPv4 address:port (e.g., "0100007F:1F90" = 127.0.0.1:8080).
///
/// The address is stored in host byte order (little-endian on x86), the port
/// in network byte order.
fn parse_hex_addr_v4(s: &str) -> MonitorResult<(Ipv4Addr, u16)> {
    let Some((addr, port)) = s.split_once(':') else {
        return Err(MonitorError::ParseError(format!(
            "Invalid IPv4 address format: {}",
            s
        )));
    };

    let addr_hex = u32::from_str_radix(addr, 16)
        .map_err(|_| MonitorError::ParseError(format!("Invalid IPv4 address: {}", addr)))?;
    let addr = Ipv4Addr::from(addr_hex.to_ne_bytes());

    let port = u16::from_str_radix(port, 16)
        .map_err(|_| MonitorError::ParseError(format!("Invalid port: {}", port)))?;

    Ok((addr, port))
}

/// Parse hex-encoded IPv6 address:port.
///
/// The address is stored as 4 host-order 32-bit words.
fn parse_hex_addr_v6(s: &str) -> MonitorResult<(IpAddr, u16)> {
    let Some((addr_hex, port)) = s.split_once(':') else {
        return Err(MonitorError::ParseError(format!(
            "Invalid IPv6 address format: {}",
            s
        )));
    };

    if addr_hex.len() != 32 {
        return Err(MonitorError::ParseError(format!(
            "Invalid IPv6 address length: expected 32 hex chars, got {}",
            addr_hex.len()
        )));
    }

    let mut octets = [0u8; 16];
    for i in 0..4 {
        let word_hex = &addr_hex[i * 8..(i + 1) * 8];
        let word = u32::from_str_radix(word_hex, 16)
            .map_err(|_| MonitorError::ParseError(format!("Invalid IPv6 word: {}", word_hex)))?;
        octets[i * 4..(i + 1) * 4].copy_from_slice(&word.to_ne_bytes());
    }

    let port = u16::from_str_radix(port, 16)
        .map_err(|_| MonitorError::ParseError(format!("Invalid port: {}", port)))?;

    Ok((IpAddr::V6(Ipv6Addr::from(octets)), port))
}

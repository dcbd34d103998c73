//! Connection enumeration through the Windows IP Helper API.
//!
//! TCP connections come from `GetExtendedTcpTable` with the owner pid
//! attached, so no separate owner scan is needed. The UDP owner tables carry
//! no peer address and every row would be dropped as unconnected, so UDP is
//! not enumerated here.
//!
//! Executables are resolved with `OpenProcess` + `QueryFullProcessImageNameW`.
//! Protected processes refuse even limited query access and come back as
//! `None`.

use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::windows::ffi::OsStringExt;
use std::path::PathBuf;

use tracing::trace;
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::NetworkManagement::IpHelper::{
    GetExtendedTcpTable, MIB_TCP6TABLE_OWNER_PID, MIB_TCPTABLE_OWNER_PID, TCP_TABLE_OWNER_PID_ALL,
};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
    QueryFullProcessImageNameW,
};
use windows::core::PWSTR;

use super::error::{MonitorError, MonitorResult};
use super::process::{ProcessDirectory, ProcessInfo};
use super::procnet::Protocol;
use super::sampler::{ConnectionSource, RawConnection};

const AF_INET: u32 = 2;
const AF_INET6: u32 = 23;
const ERROR_INSUFFICIENT_BUFFER: u32 = 122;

/// Connection source over the IP Helper TCP owner tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpHelperTable;

impl IpHelperTable {
    /// Source reading the live host tables.
    pub fn new() -> Self {
        Self
    }
}

impl ConnectionSource for IpHelperTable {
    fn connections(&self) -> MonitorResult<Vec<RawConnection>> {
        let mut connections = tcp4_connections()?;
        connections.extend(tcp6_connections()?);
        Ok(connections
            .into_iter()
            .filter(|c| !(c.remote.ip().is_unspecified() && c.remote.port() == 0))
            .collect())
    }
}

/// Fetch one owner table, growing the buffer while the table grows.
///
/// The buffer is `u32`-backed so the table header and rows are aligned.
fn read_tcp_table(family: u32) -> MonitorResult<Vec<u32>> {
    let mut size: u32 = 0;
    // SAFETY: a null buffer only queries the required size.
    unsafe {
        GetExtendedTcpTable(None, &mut size, false, family, TCP_TABLE_OWNER_PID_ALL, 0);
    }

    loop {
        let mut buffer = vec![0u32; (size as usize).div_ceil(4)];
        size = (buffer.len() * 4) as u32;
        // SAFETY: `buffer` holds `size` bytes and outlives the call.
        let result = unsafe {
            GetExtendedTcpTable(
                Some(buffer.as_mut_ptr().cast()),
                &mut size,
                false,
                family,
                TCP_TABLE_OWNER_PID_ALL,
                0,
            )
        };
        match result {
            0 => return Ok(buffer),
            ERROR_INSUFFICIENT_BUFFER => continue,
            code => {
                return Err(MonitorError::ReadFailed {
                    path: PathBuf::from(table_name(family)),
                    source: std::io::Error::from_raw_os_error(code as i32),
                });
            }
        }
    }
}

fn table_name(family: u32) -> &'static str {
    if family == AF_INET6 {
        "GetExtendedTcpTable(AF_INET6)"
    } else {
        "GetExtendedTcpTable(AF_INET)"
    }
}

fn tcp4_connections() -> MonitorResult<Vec<RawConnection>> {
    let buffer = read_tcp_table(AF_INET)?;
    if buffer.len() * 4 < size_of::<MIB_TCPTABLE_OWNER_PID>() {
        return Ok(Vec::new());
    }

    // SAFETY: the API filled `buffer` with a MIB_TCPTABLE_OWNER_PID header
    // followed by `dwNumEntries` rows.
    let rows = unsafe {
        let table = &*(buffer.as_ptr() as *const MIB_TCPTABLE_OWNER_PID);
        std::slice::from_raw_parts(table.table.as_ptr(), table.dwNumEntries as usize)
    };

    Ok(rows
        .iter()
        .map(|row| RawConnection {
            pid: row.dwOwningPid,
            protocol: Protocol::Tcp,
            local: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::from(row.dwLocalAddr.to_ne_bytes())),
                port(row.dwLocalPort),
            ),
            remote: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::from(row.dwRemoteAddr.to_ne_bytes())),
                port(row.dwRemotePort),
            ),
            status: state_name(row.dwState).to_string(),
        })
        .collect())
}

fn tcp6_connections() -> MonitorResult<Vec<RawConnection>> {
    let buffer = read_tcp_table(AF_INET6)?;
    if buffer.len() * 4 < size_of::<MIB_TCP6TABLE_OWNER_PID>() {
        return Ok(Vec::new());
    }

    // SAFETY: as for the IPv4 table.
    let rows = unsafe {
        let table = &*(buffer.as_ptr() as *const MIB_TCP6TABLE_OWNER_PID);
        std::slice::from_raw_parts(table.table.as_ptr(), table.dwNumEntries as usize)
    };

    Ok(rows
        .iter()
        .map(|row| RawConnection {
            pid: row.dwOwningPid,
            protocol: Protocol::Tcp,
            local: SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(row.ucLocalAddr)),
                port(row.dwLocalPort),
            ),
            remote: SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(row.ucRemoteAddr)),
                port(row.dwRemotePort),
            ),
            status: state_name(row.dwState).to_string(),
        })
        .collect())
}

/// Ports are stored in network byte order in the low 16 bits.
fn port(raw: u32) -> u16 {
    u16::from_be(raw as u16)
}

/// `MIB_TCP_STATE` value to the conventional name.
fn state_name(state: u32) -> &'static str {
    match state {
        1 => "CLOSE",
        2 => "LISTEN",
        3 => "SYN_SENT",
        4 => "SYN_RECV",
        5 => "ESTABLISHED",
        6 => "FIN_WAIT1",
        7 => "FIN_WAIT2",
        8 => "CLOSE_WAIT",
        9 => "CLOSING",
        10 => "LAST_ACK",
        11 => "TIME_WAIT",
        12 => "DELETE_TCB",
        _ => "UNKNOWN",
    }
}

/// Process directory backed by `QueryFullProcessImageNameW`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32Directory;

impl Win32Directory {
    /// Directory over the live process list.
    pub fn new() -> Self {
        Self
    }
}

impl ProcessDirectory for Win32Directory {
    fn lookup(&self, pid: u32) -> Option<ProcessInfo> {
        match pid {
            0 => return Some(named("System Idle Process")),
            4 => return Some(named("System")),
            _ => {}
        }

        // SAFETY: the handle is closed before returning and the buffer length
        // is passed in `size`.
        let path = unsafe {
            let handle = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
                Ok(handle) => handle,
                Err(e) => {
                    trace!("Cannot open process {}: {}", pid, e);
                    return None;
                }
            };
            let mut buffer = [0u16; 1024];
            let mut size = buffer.len() as u32;
            let queried = QueryFullProcessImageNameW(
                handle,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut size,
            );
            let _ = CloseHandle(handle);
            match queried {
                Ok(()) => OsString::from_wide(&buffer[..size as usize])
                    .to_string_lossy()
                    .into_owned(),
                Err(e) => {
                    trace!("Cannot resolve executable of {}: {}", pid, e);
                    String::new()
                }
            }
        };

        if path.is_empty() {
            return Some(ProcessInfo::unknown());
        }
        let name = crate::policy::basename(&path).to_string();
        Some(ProcessInfo { name, path })
    }
}

fn named(name: &str) -> ProcessInfo {
    ProcessInfo {
        name: name.to_string(),
        path: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_is_network_order() {
        assert_eq!(port(0xBB01), 443);
        assert_eq!(port(0x5000), 80);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(state_name(5), "ESTABLISHED");
        assert_eq!(state_name(11), "TIME_WAIT");
        assert_eq!(state_name(99), "UNKNOWN");
    }

    #[test]
    fn test_live_tables_enumerate() {
        assert!(IpHelperTable::new().connections().is_ok());
    }

    #[test]
    fn test_live_self_lookup() {
        let info = Win32Directory::new().lookup(std::process::id()).unwrap();
        assert!(info.path.to_ascii_lowercase().ends_with(".exe"));
        assert_eq!(info.name, crate::policy::basename(&info.path));
    }
}

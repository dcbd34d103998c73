//! Connection monitoring.
//!
//! This module provides:
//! - Enumeration of live inet connections from procfs ([`procnet`]) or, on
//!   Windows, from the IP Helper owner tables (`iphelper`)
//! - pid to executable resolution ([`process`])
//! - The periodic sampling loop with first-seen detection ([`sampler`])

pub mod error;
pub mod process;
pub mod procnet;
pub mod sampler;
#[cfg(windows)]
pub mod iphelper;

pub use error::{MonitorError, MonitorResult};
pub use process::{ProcessDirectory, ProcessInfo, ProcfsDirectory};
pub use procnet::{ProcNet, Protocol};
pub use sampler::{
    Connection, ConnectionSampler, ConnectionSource, RawConnection, Sample, SamplerEvent,
    SamplerHandle, SeenApps,
};
#[cfg(windows)]
pub use iphelper::{IpHelperTable, Win32Directory};

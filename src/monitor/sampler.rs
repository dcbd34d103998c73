//! Periodic connection sampling and first-seen application detection.
//!
//! Each tick enumerates live connections, resolves owning pids (once per pid
//! per tick), and reports executable paths never seen before in this session.
//! The tick itself runs on the blocking pool under a timeout; a tick that
//! overruns is skipped and awaited again on the next cycle instead of being
//! re-spawned, so at most one stuck enumeration exists at a time.
//!
//! # Example
//!
//! ```ignore
//! let sampler = Arc::new(ConnectionSampler::new(source, processes, SeenApps::default()));
//! let (events_tx, mut events_rx) = mpsc::channel(64);
//! let (_interval_tx, interval_rx) = watch::channel(Duration::from_secs(2));
//!
//! let handle = SamplerHandle::start(sampler, interval_rx, Duration::from_secs(5), events_tx);
//! while let Some(event) = events_rx.recv().await {
//!     if let SamplerEvent::NewApp(path) = event {
//!         println!("New app: {path}");
//!     }
//! }
//! handle.stop(Duration::from_secs(2)).await;
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::error::MonitorResult;
use super::process::{ProcessDirectory, ProcessInfo};
use super::procnet::Protocol;
use crate::policy::identity::canonical_key;

/// A connection as reported by the OS, before process resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawConnection {
    /// Owning process.
    pub pid: u32,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Local endpoint.
    pub local: SocketAddr,
    /// Remote endpoint.
    pub remote: SocketAddr,
    /// Connection state.
    pub status: String,
}

/// Enumerates live inet connections.
pub trait ConnectionSource: Send + Sync {
    /// Every connection with a remote endpoint and a known owner.
    fn connections(&self) -> MonitorResult<Vec<RawConnection>>;
}

/// A live connection attributed to a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Process name.
    pub process_name: String,
    /// Executable path; empty when the process could not be resolved.
    pub process_path: String,
    /// Owning process.
    pub pid: u32,
    /// Local endpoint.
    pub local: SocketAddr,
    /// Remote endpoint.
    pub remote: SocketAddr,
    /// Connection state.
    pub status: String,
    /// Transport protocol.
    pub protocol: Protocol,
}

/// Result of one sampling tick.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    /// Current connections.
    pub connections: Vec<Connection>,
    /// Executable paths seen for the first time this session.
    pub new_apps: Vec<String>,
}

/// Session-scoped set of executable paths already reported.
///
/// Shared between the sampler and the policy engine (which removes entries on
/// forget so the app is detected again). Paths are compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct SeenApps {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl SeenApps {
    /// Record `path`. Returns true if it had not been seen before.
    pub fn insert(&self, path: &str) -> bool {
        self.lock().insert(canonical_key(path))
    }

    /// Whether `path` has been seen.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains(&canonical_key(path))
    }

    /// Forget `path` so it is reported again.
    pub fn remove(&self, path: &str) {
        self.lock().remove(&canonical_key(path));
    }

    /// Forget every path.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of distinct paths seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Samples connections and detects new applications.
pub struct ConnectionSampler {
    source: Arc<dyn ConnectionSource>,
    processes: Arc<dyn ProcessDirectory>,
    seen: SeenApps,
}

impl ConnectionSampler {
    /// Create a sampler recording first sightings into `seen`.
    pub fn new(
        source: Arc<dyn ConnectionSource>,
        processes: Arc<dyn ProcessDirectory>,
        seen: SeenApps,
    ) -> Self {
        Self {
            source,
            processes,
            seen,
        }
    }

    /// The shared seen set.
    #[must_use]
    pub fn seen(&self) -> &SeenApps {
        &self.seen
    }

    /// Run one tick synchronously.
    ///
    /// Unresolvable processes appear as `Unknown` with an empty path and are
    /// never reported as new.
    pub fn sample(&self) -> MonitorResult<Sample> {
        let raw = self.source.connections()?;
        let mut cache: HashMap<u32, ProcessInfo> = HashMap::new();
        let mut sample = Sample::default();

        for conn in raw {
            let info = cache
                .entry(conn.pid)
                .or_insert_with(|| {
                    self.processes
                        .lookup(conn.pid)
                        .unwrap_or_else(ProcessInfo::unknown)
                })
                .clone();

            if !info.path.is_empty() && self.seen.insert(&info.path) {
                debug!("New application observed: {} (pid {})", info.path, conn.pid);
                sample.new_apps.push(info.path.clone());
            }

            sample.connections.push(Connection {
                process_name: info.name,
                process_path: info.path,
                pid: conn.pid,
                local: conn.local,
                remote: conn.remote,
                status: conn.status,
                protocol: conn.protocol,
            });
        }

        trace!(
            "Sampled {} connections from {} processes",
            sample.connections.len(),
            cache.len()
        );
        Ok(sample)
    }
}

/// Output of the sampling loop.
#[derive(Debug, Clone)]
pub enum SamplerEvent {
    /// The full connection list of one tick.
    Connections(Vec<Connection>),
    /// An executable path seen for the first time.
    NewApp(String),
}

/// Running sampling loop.
pub struct SamplerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Spawn the sampling loop.
    ///
    /// The sleep between ticks is read from `interval_rx` before every sleep,
    /// so changing it retunes the cadence from the next cycle.
    pub fn start(
        sampler: Arc<ConnectionSampler>,
        interval_rx: watch::Receiver<Duration>,
        tick_timeout: Duration,
        events: mpsc::Sender<SamplerEvent>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(sampler, interval_rx, tick_timeout, events, shutdown_rx));
        Self { shutdown_tx, task }
    }

    /// Request a stop and wait up to `join_timeout` for the loop to exit.
    ///
    /// A loop that does not exit in time is logged and left behind.
    pub async fn stop(self, join_timeout: Duration) {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(join_timeout, self.task).await {
            Ok(Ok(())) => debug!("Sampler stopped"),
            Ok(Err(e)) => error!("Sampler task failed: {}", e),
            Err(_) => error!(
                "Sampler did not stop within {:?}; continuing shutdown",
                join_timeout
            ),
        }
    }
}

async fn run(
    sampler: Arc<ConnectionSampler>,
    interval_rx: watch::Receiver<Duration>,
    tick_timeout: Duration,
    events: mpsc::Sender<SamplerEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut stuck: Option<JoinHandle<MonitorResult<Sample>>> = None;

    loop {
        let mut tick = match stuck.take() {
            Some(tick) => tick,
            None => {
                let sampler = Arc::clone(&sampler);
                tokio::task::spawn_blocking(move || sampler.sample())
            }
        };

        tokio::select! {
            result = tokio::time::timeout(tick_timeout, &mut tick) => match result {
                Ok(Ok(Ok(sample))) => {
                    if deliver(&events, sample).await.is_err() {
                        debug!("Sampler receiver dropped, shutting down");
                        return;
                    }
                }
                Ok(Ok(Err(e))) => warn!("Skipping sampling tick: {}", e),
                Ok(Err(e)) => error!("Sampling tick panicked: {}", e),
                Err(_) => {
                    warn!("Sampling tick exceeded {:?}; skipping", tick_timeout);
                    stuck = Some(tick);
                }
            },
            _ = stop_requested(&mut shutdown_rx) => break,
        }

        let interval = *interval_rx.borrow();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop_requested(&mut shutdown_rx) => break,
        }
    }

    debug!("Sampler received shutdown signal");
}

async fn deliver(
    events: &mpsc::Sender<SamplerEvent>,
    sample: Sample,
) -> Result<(), mpsc::error::SendError<SamplerEvent>> {
    events
        .send(SamplerEvent::Connections(sample.connections))
        .await?;
    for path in sample.new_apps {
        events.send(SamplerEvent::NewApp(path)).await?;
    }
    Ok(())
}

/// Resolves once a stop is requested or the handle is dropped.
async fn stop_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::error::MonitorError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        conns: Vec<RawConnection>,
        calls: AtomicUsize,
        fail_first: bool,
    }

    impl ConnectionSource for FakeSource {
        fn connections(&self) -> MonitorResult<Vec<RawConnection>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                return Err(MonitorError::ParseError("transient".to_string()));
            }
            Ok(self.conns.clone())
        }
    }

    struct FakeProcesses(HashMap<u32, ProcessInfo>);

    impl ProcessDirectory for FakeProcesses {
        fn lookup(&self, pid: u32) -> Option<ProcessInfo> {
            self.0.get(&pid).cloned()
        }
    }

    fn raw(pid: u32, port: u16) -> RawConnection {
        RawConnection {
            pid,
            protocol: Protocol::Tcp,
            local: "10.0.2.15:50000".parse().unwrap(),
            remote: SocketAddr::new("93.184.216.34".parse().unwrap(), port),
            status: "ESTABLISHED".to_string(),
        }
    }

    fn sampler(conns: Vec<RawConnection>, fail_first: bool) -> ConnectionSampler {
        let processes = HashMap::from([
            (
                100,
                ProcessInfo {
                    name: "foo.exe".to_string(),
                    path: "C:\\Apps\\foo.exe".to_string(),
                },
            ),
            (
                200,
                ProcessInfo {
                    name: "FOO.EXE".to_string(),
                    path: "c:\\apps\\FOO.exe".to_string(),
                },
            ),
        ]);
        ConnectionSampler::new(
            Arc::new(FakeSource {
                conns,
                calls: AtomicUsize::new(0),
                fail_first,
            }),
            Arc::new(FakeProcesses(processes)),
            SeenApps::default(),
        )
    }

    #[test]
    fn test_new_app_reported_once() {
        let sampler = sampler(vec![raw(100, 443), raw(100, 80), raw(200, 443)], false);

        let first = sampler.sample().unwrap();
        assert_eq!(first.connections.len(), 3);
        assert_eq!(first.new_apps, vec!["C:\\Apps\\foo.exe".to_string()]);

        let second = sampler.sample().unwrap();
        assert!(second.new_apps.is_empty());
    }

    #[test]
    fn test_unresolved_process_listed_but_not_new() {
        let sampler = sampler(vec![raw(999, 443)], false);
        let sample = sampler.sample().unwrap();

        assert_eq!(sample.connections.len(), 1);
        assert_eq!(sample.connections[0].process_name, "Unknown");
        assert_eq!(sample.connections[0].process_path, "");
        assert!(sample.new_apps.is_empty());
        assert!(sampler.seen().is_empty());
    }

    #[test]
    fn test_forgotten_path_reported_again() {
        let sampler = sampler(vec![raw(100, 443)], false);
        assert_eq!(sampler.sample().unwrap().new_apps.len(), 1);

        sampler.seen().remove("C:\\APPS\\foo.exe");
        assert_eq!(sampler.sample().unwrap().new_apps.len(), 1);
    }

    #[tokio::test]
    async fn test_loop_survives_failed_tick() {
        let sampler = Arc::new(sampler(vec![raw(100, 443)], true));
        let (tx, mut rx) = mpsc::channel(16);
        let (_interval_tx, interval_rx) = watch::channel(Duration::from_millis(10));

        let handle = SamplerHandle::start(sampler, interval_rx, Duration::from_secs(5), tx);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, SamplerEvent::Connections(ref c) if c.len() == 1));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, SamplerEvent::NewApp(ref p) if p == "C:\\Apps\\foo.exe"));

        handle.stop(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_stop_is_bounded() {
        let sampler = Arc::new(sampler(Vec::new(), false));
        let (tx, _rx) = mpsc::channel(16);
        let (_interval_tx, interval_rx) = watch::channel(Duration::from_secs(3600));

        let handle = SamplerHandle::start(sampler, interval_rx, Duration::from_secs(5), tx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        handle.stop(Duration::from_secs(2)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

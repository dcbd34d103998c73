//! Application context.
//!
//! Everything a session shares (configuration, the audit logger, the seen set)
//! is owned here and handed to components explicitly. Nothing is global.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::{BackendKind, Config};
use crate::firewall::{
    FirewallRuleStore, MemoryBackend, NetshBackend, RuleBackend, RuleStoreHandle,
};
#[cfg(not(windows))]
use crate::monitor::{ProcNet, ProcfsDirectory};
use crate::monitor::{ConnectionSampler, SeenApps};
#[cfg(windows)]
use crate::monitor::{IpHelperTable, Win32Directory};
use crate::policy::{PolicyEngine, PolicyRegistry, RegistryError, StoreLock};
use crate::telemetry::{AuditEvent, AuditLogger};

/// Shared state for one invocation.
pub struct AppContext {
    config: Config,
    audit: Arc<AuditLogger>,
    seen: SeenApps,
    started: Instant,
    user: String,
}

impl AppContext {
    /// Context with an explicit audit logger.
    pub fn new(config: Config, audit: Arc<AuditLogger>) -> Self {
        Self {
            config,
            audit,
            seen: SeenApps::default(),
            started: Instant::now(),
            user: whoami(),
        }
    }

    /// Context auditing to syslog, or to nowhere if syslog is unreachable.
    pub fn with_syslog(config: Config) -> Self {
        let audit = match AuditLogger::new() {
            Ok(logger) => logger,
            Err(e) => {
                warn!("Audit trail disabled: {}", e);
                AuditLogger::new_null()
            }
        };
        Self::new(config, Arc::new(audit))
    }

    /// Merged configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Audit logger.
    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Session seen set, shared by the sampler and the engine.
    pub fn seen(&self) -> &SeenApps {
        &self.seen
    }

    /// Whether rules stay in process memory.
    pub fn is_dry_run(&self) -> bool {
        self.config.firewall.backend() == BackendKind::Memory
    }

    /// Start the rule-store worker over the configured backend.
    pub fn rule_store(&self) -> io::Result<RuleStoreHandle> {
        let backend: Box<dyn RuleBackend> = match self.config.firewall.backend() {
            BackendKind::Netsh => Box::new(NetshBackend::new()),
            BackendKind::Memory => Box::new(MemoryBackend::new()),
        };
        self.rule_store_with(backend)
    }

    /// Start the rule-store worker over `backend`.
    pub fn rule_store_with(&self, backend: Box<dyn RuleBackend>) -> io::Result<RuleStoreHandle> {
        let firewall = &self.config.firewall;
        let store = FirewallRuleStore::new(
            backend,
            firewall.rule_prefix(),
            firewall.executable_extension(),
        );
        RuleStoreHandle::spawn(store, firewall.call_timeout())
    }

    /// Load the policy registry.
    ///
    /// With the in-memory backend the registry is not persisted either, so a
    /// dry run never leaves decisions that disagree with the OS firewall.
    pub fn load_registry(&self) -> PolicyRegistry {
        if self.is_dry_run() {
            return PolicyRegistry::in_memory();
        }
        let path = self.config.policy.store_path();
        info!("Loading policy store from {:?}", path);
        PolicyRegistry::load(path)
    }

    /// Lock guarding the policy store against a second writer.
    ///
    /// Dry runs never write the store and get a lock that guards nothing.
    pub fn store_lock(&self) -> Result<StoreLock, RegistryError> {
        if self.is_dry_run() {
            return Ok(StoreLock::unlocked());
        }
        StoreLock::open(&self.config.policy.store_path())
    }

    /// Sampler over the host connection tables.
    ///
    /// Windows reads the IP Helper owner tables; everywhere else the
    /// configured proc filesystem is read.
    #[cfg(windows)]
    pub fn sampler(&self) -> Arc<ConnectionSampler> {
        Arc::new(ConnectionSampler::new(
            Arc::new(IpHelperTable::new()),
            Arc::new(Win32Directory::new()),
            self.seen.clone(),
        ))
    }

    /// Sampler over the host connection tables.
    ///
    /// Windows reads the IP Helper owner tables; everywhere else the
    /// configured proc filesystem is read.
    #[cfg(not(windows))]
    pub fn sampler(&self) -> Arc<ConnectionSampler> {
        let root = self.config.monitor.proc_root();
        Arc::new(ConnectionSampler::new(
            Arc::new(ProcNet::new(root.clone())),
            Arc::new(ProcfsDirectory::new(root)),
            self.seen.clone(),
        ))
    }

    /// Build an engine from the configured registry and rule store.
    pub fn engine(&self) -> io::Result<PolicyEngine> {
        Ok(PolicyEngine::new(
            self.load_registry(),
            self.rule_store()?,
            self.seen.clone(),
            Arc::clone(&self.audit),
        ))
    }

    /// Record the start of a session.
    pub fn audit_session_start(&self) {
        self.audit.log(AuditEvent::SessionStart {
            user: self.user.clone(),
            pid: std::process::id(),
            backend: self.config.firewall.backend().as_str().to_string(),
        });
    }

    /// Record the end of a session.
    pub fn audit_session_end(&self) {
        self.audit.log(AuditEvent::SessionEnd {
            user: self.user.clone(),
            duration_sec: self.started.elapsed().as_secs(),
        });
    }
}

/// Get the current username for audit logging.
fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dry_run_context() -> AppContext {
        let mut config = Config::default();
        config.firewall.backend = Some(BackendKind::Memory);
        AppContext::new(config, Arc::new(AuditLogger::new_memory()))
    }

    #[test]
    fn test_dry_run_registry_is_not_persisted() {
        let ctx = dry_run_context();
        assert!(ctx.is_dry_run());
        assert!(ctx.load_registry().store_path().is_none());
    }

    #[tokio::test]
    async fn test_rule_store_uses_configured_prefix() {
        let mut config = Config::default();
        config.firewall.backend = Some(BackendKind::Memory);
        config.firewall.rule_prefix = Some("Lab".to_string());
        let ctx = AppContext::new(config, Arc::new(AuditLogger::new_null()));

        let rules = ctx.rule_store().unwrap();
        assert_eq!(rules.rule_name("C:\\Apps\\foo.exe"), "[Lab] foo.exe");
        assert!(rules.list_rules().await.unwrap().is_empty());
    }

    #[test]
    fn test_store_lock_refuses_second_writer() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.policy.store_path = Some(dir.path().join("policy.json"));
        let ctx = AppContext::new(config, Arc::new(AuditLogger::new_null()));

        let mut daemon = ctx.store_lock().unwrap();
        let _held = daemon.try_acquire().unwrap();
        let mut other = ctx.store_lock().unwrap();
        assert!(matches!(
            other.try_acquire(),
            Err(RegistryError::Locked { .. })
        ));

        let mut dry = dry_run_context().store_lock().unwrap();
        assert!(dry.try_acquire().is_ok());
    }

    #[test]
    fn test_session_events_audited() {
        let ctx = dry_run_context();
        ctx.audit_session_start();
        ctx.audit_session_end();

        let events = ctx.audit().captured();
        assert_eq!(events.len(), 2);
        assert!(events[0].contains("\"backend\":\"memory\""));
        assert!(events[1].contains("session_end"));
    }
}

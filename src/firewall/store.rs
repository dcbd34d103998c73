//! Rule store operations and the single-owner worker that serializes them.
//!
//! [`FirewallRuleStore`] implements the rule operations synchronously on top of
//! a [`RuleBackend`]. It is owned by one dedicated OS thread; async callers talk
//! to it through a cloneable [`RuleStoreHandle`], which ships closures to the
//! worker over a channel and awaits the reply with a bound.
//!
//! # Timeouts
//!
//! A native call that outlives `call_timeout` is reported to the caller as
//! [`RuleStoreError::Timeout`] and the caller is free to roll back. The stuck
//! call may still complete later, so a compensating job is queued right behind
//! it: if the late call turned out to have mutated the store, the compensation
//! reverts it. Jobs run in submission order, so the compensation always sees the
//! outcome of the call it guards and runs before any later request.
//!
//! ```ignore
//! let store = FirewallRuleStore::new(Box::new(NetshBackend::new()), "WinNetGuard", "exe");
//! let handle = RuleStoreHandle::spawn(store, Duration::from_secs(10))?;
//! handle.add_block_rule("C:\\Apps\\foo.exe").await?;
//! ```

use std::path::Path;
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::RuleBackend;
use super::error::{BackendError, RuleStoreError, RuleStoreResult};
use super::rule::{FirewallRule, name_prefix, rule_name};
use crate::safety::{self, BlockTarget};

/// Rule operations over a native backend, keyed by rule name.
pub struct FirewallRuleStore {
    backend: Box<dyn RuleBackend>,
    prefix: String,
    executable_extension: String,
}

impl FirewallRuleStore {
    /// Create a store for rules named `"[<prefix>] <basename>"`.
    ///
    /// `executable_extension` (without the dot) is required on every blocked
    /// path; an empty string disables the check.
    pub fn new(
        backend: Box<dyn RuleBackend>,
        prefix: impl Into<String>,
        executable_extension: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            executable_extension: executable_extension.into(),
        }
    }

    /// Application prefix (without brackets).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Create the outbound block rule for `path`.
    ///
    /// Fails if the file does not exist, lacks the executable extension, is
    /// rejected by the safety guard, or a rule with the derived name exists.
    pub fn add_block_rule(&mut self, path: &str) -> RuleStoreResult<FirewallRule> {
        if !Path::new(path).exists() {
            return Err(RuleStoreError::NotFound(path.to_string()));
        }

        if !self.executable_extension.is_empty() {
            let suffix = format!(".{}", self.executable_extension.to_lowercase());
            if !path.to_lowercase().ends_with(&suffix) {
                return Err(RuleStoreError::WrongExtension {
                    path: path.to_string(),
                    expected: self.executable_extension.clone(),
                });
            }
        }

        safety::evaluate(&BlockTarget::process(path))?;

        let rule = FirewallRule::outbound_block(&self.prefix, path);
        if let Some(existing) = self.backend.find(&rule.name)? {
            return Err(RuleStoreError::AlreadyExists {
                name: rule.name,
                existing_path: existing.app_path,
            });
        }

        match self.backend.create(&rule) {
            Ok(()) => {
                info!("Created block rule {}", rule.name);
                Ok(rule)
            }
            Err(BackendError::DuplicateRule(name)) => Err(RuleStoreError::AlreadyExists {
                name,
                existing_path: String::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the rule for `path`, returning it.
    pub fn remove_rule(&mut self, path: &str) -> RuleStoreResult<FirewallRule> {
        let name = rule_name(&self.prefix, path);
        let Some(existing) = self.backend.find(&name)? else {
            return Err(RuleStoreError::NoRuleFound(name));
        };
        self.remove_by_name(&name)?;
        Ok(existing)
    }

    /// Delete a rule by exact name.
    pub fn remove_by_name(&mut self, name: &str) -> RuleStoreResult<()> {
        match self.backend.remove(name) {
            Ok(()) => {
                info!("Removed rule {}", name);
                Ok(())
            }
            Err(BackendError::NoSuchRule(name)) => Err(RuleStoreError::NoRuleFound(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// The rule whose name derives from `path`, if any.
    pub fn find_rule(&mut self, path: &str) -> RuleStoreResult<Option<FirewallRule>> {
        Ok(self.backend.find(&rule_name(&self.prefix, path))?)
    }

    /// Every rule carrying this application's prefix.
    pub fn list_rules(&mut self) -> RuleStoreResult<Vec<FirewallRule>> {
        Ok(self.backend.list(&name_prefix(&self.prefix))?)
    }

    /// Whether a rule with the name derived from `path` is listed.
    pub fn is_blocked(&mut self, path: &str) -> RuleStoreResult<bool> {
        let name = rule_name(&self.prefix, path);
        Ok(self.list_rules()?.iter().any(|rule| rule.name == name))
    }

    /// Re-create a previously removed rule as-is.
    fn reinstate(&mut self, rule: &FirewallRule) -> RuleStoreResult<()> {
        Ok(self.backend.create(rule)?)
    }
}

type Job = Box<dyn FnOnce(&mut FirewallRuleStore) + Send>;

/// Async handle to the rule-store worker thread.
///
/// Cloning is cheap. The worker exits once every handle is dropped.
#[derive(Clone)]
pub struct RuleStoreHandle {
    jobs: mpsc::UnboundedSender<Job>,
    prefix: String,
    call_timeout: Duration,
}

impl RuleStoreHandle {
    /// Move `store` onto a dedicated worker thread.
    pub fn spawn(mut store: FirewallRuleStore, call_timeout: Duration) -> std::io::Result<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let prefix = store.prefix().to_string();

        thread::Builder::new()
            .name("rule-store".to_string())
            .spawn(move || {
                debug!("Rule store worker started");
                while let Some(job) = rx.blocking_recv() {
                    job(&mut store);
                }
                debug!("Rule store worker exiting");
            })?;

        Ok(Self {
            jobs,
            prefix,
            call_timeout,
        })
    }

    /// Application prefix (without brackets).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name of the rule that would block `path`.
    #[must_use]
    pub fn rule_name(&self, path: &str) -> String {
        rule_name(&self.prefix, path)
    }

    /// See [`FirewallRuleStore::add_block_rule`].
    pub async fn add_block_rule(&self, path: &str) -> RuleStoreResult<FirewallRule> {
        let path = path.to_string();
        self.call_compensated(
            move |store| store.add_block_rule(&path),
            |store, rule: FirewallRule| {
                warn!("Reverting block rule {} created after timeout", rule.name);
                if let Err(e) = store.remove_by_name(&rule.name) {
                    error!("Failed to revert late rule {}: {}", rule.name, e);
                }
            },
        )
        .await
    }

    /// See [`FirewallRuleStore::remove_rule`].
    pub async fn remove_rule(&self, path: &str) -> RuleStoreResult<FirewallRule> {
        let path = path.to_string();
        self.call_compensated(
            move |store| store.remove_rule(&path),
            |store, rule: FirewallRule| {
                warn!("Reinstating rule {} removed after timeout", rule.name);
                if let Err(e) = store.reinstate(&rule) {
                    error!("Failed to reinstate rule {}: {}", rule.name, e);
                }
            },
        )
        .await
    }

    /// See [`FirewallRuleStore::remove_by_name`].
    pub async fn remove_by_name(&self, name: &str) -> RuleStoreResult<()> {
        let name = name.to_string();
        self.call(move |store| store.remove_by_name(&name)).await
    }

    /// See [`FirewallRuleStore::find_rule`].
    pub async fn find_rule(&self, path: &str) -> RuleStoreResult<Option<FirewallRule>> {
        let path = path.to_string();
        self.call(move |store| store.find_rule(&path)).await
    }

    /// See [`FirewallRuleStore::list_rules`].
    pub async fn list_rules(&self) -> RuleStoreResult<Vec<FirewallRule>> {
        self.call(|store| store.list_rules()).await
    }

    /// See [`FirewallRuleStore::is_blocked`].
    pub async fn is_blocked(&self, path: &str) -> RuleStoreResult<bool> {
        let path = path.to_string();
        self.call(move |store| store.is_blocked(&path)).await
    }

    async fn call<T, F>(&self, op: F) -> RuleStoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FirewallRuleStore) -> RuleStoreResult<T> + Send + 'static,
    {
        self.call_compensated(op, |_, _| {}).await
    }

    async fn call_compensated<T, F, C>(&self, op: F, compensate: C) -> RuleStoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FirewallRuleStore) -> RuleStoreResult<T> + Send + 'static,
        C: FnOnce(&mut FirewallRuleStore, T) + Send + 'static,
    {
        let (reply_tx, mut reply_rx) = oneshot::channel();
        self.submit(Box::new(move |store: &mut FirewallRuleStore| {
            let _ = reply_tx.send(op(store));
        }))?;

        match tokio::time::timeout(self.call_timeout, &mut reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RuleStoreError::WorkerStopped),
            Err(_) => {
                warn!(
                    "Rule store call exceeded {:?}; queueing compensation",
                    self.call_timeout
                );
                let compensation: Job = Box::new(move |store: &mut FirewallRuleStore| {
                    if let Ok(Ok(late)) = reply_rx.try_recv() {
                        compensate(store, late);
                    }
                });
                if self.submit(compensation).is_err() {
                    error!("Rule store worker stopped before compensation could be queued");
                }
                Err(RuleStoreError::Timeout)
            }
        }
    }

    fn submit(&self, job: Job) -> RuleStoreResult<()> {
        self.jobs
            .send(job)
            .map_err(|_| RuleStoreError::WorkerStopped)
    }
}

//! Policy engine: the per-application decision state machine.
//!
//! # States
//!
//! ```text
//!                   new connection, safe
//!   Unseen ───────────────────────────────► Blacklisted + PendingDecision
//!     ▲                                        │ allow          │ block
//!     │ forget (from any state)                ▼                ▼
//!     └──────────────────────────────── Whitelisted ◄──────► Blacklisted
//!                                              allow / block
//! ```
//!
//! Unknown applications are blocked the moment they are first seen and queued
//! for review (default-deny-first). Safety-critical targets never enter the
//! machine at all.
//!
//! # Consistency
//!
//! Every transition holds the registry lock across its rule-store call, so
//! transitions are applied one at a time in the order they were requested.
//! Membership is captured before the registry is touched; if the rule-store
//! call fails, that membership is restored and the failure is returned once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::EngineError;
use super::identity::{AppIdentity, canonical_key};
use super::registry::{Membership, PolicyRegistry};
use super::settings::{SettingKey, SettingValue};
use crate::control::protocol::{EngineToUi, UiToEngine};
use crate::firewall::{FirewallRule, RuleStoreError, RuleStoreHandle};
use crate::monitor::{Connection, ConnectionSampler, SamplerEvent, SeenApps};
use crate::safety::{self, BlockTarget};
use crate::telemetry::{AuditEvent, AuditLogger, BlockReason, RuleOperation};

/// Decision state of one application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// No decision recorded.
    Unseen,
    /// Blocked automatically, awaiting the user.
    PendingDecision,
    /// Allowed.
    Whitelisted,
    /// Blocked.
    Blacklisted,
}

impl From<Membership> for AppState {
    fn from(m: Membership) -> Self {
        if m.pending {
            AppState::PendingDecision
        } else if m.whitelisted {
            AppState::Whitelisted
        } else if m.blacklisted {
            AppState::Blacklisted
        } else {
            AppState::Unseen
        }
    }
}

/// Outcome of an emergency reset.
#[derive(Debug, Clone, Default)]
pub struct ResetReport {
    /// Names of removed rules.
    pub removed: Vec<String>,
    /// Rules that could not be removed, with the reason.
    pub failures: Vec<(String, String)>,
}

/// Orchestrates the registry, the rule store, and the safety guard.
pub struct PolicyEngine {
    registry: Arc<Mutex<PolicyRegistry>>,
    rules: RuleStoreHandle,
    seen: SeenApps,
    audit: Arc<AuditLogger>,
    ui_tx: Option<mpsc::Sender<EngineToUi>>,
    interval_tx: watch::Sender<Duration>,
}

impl PolicyEngine {
    /// Create an engine over `registry` and `rules`.
    ///
    /// `seen` is the sampler's first-seen set, cleared per app on forget.
    pub fn new(
        registry: PolicyRegistry,
        rules: RuleStoreHandle,
        seen: SeenApps,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let (interval_tx, _) =
            watch::channel(registry.settings().connection_update_interval());
        Self {
            registry: Arc::new(Mutex::new(registry)),
            rules,
            seen,
            audit,
            ui_tx: None,
            interval_tx,
        }
    }

    /// Deliver UI events to `tx`.
    #[must_use]
    pub fn with_ui(mut self, tx: mpsc::Sender<EngineToUi>) -> Self {
        self.ui_tx = Some(tx);
        self
    }

    /// Sampling interval, updated whenever the setting changes.
    #[must_use]
    pub fn interval_receiver(&self) -> watch::Receiver<Duration> {
        self.interval_tx.subscribe()
    }

    /// Shared registry, for read-only inspection.
    #[must_use]
    pub fn registry(&self) -> &Arc<Mutex<PolicyRegistry>> {
        &self.registry
    }

    /// Rule store handle.
    #[must_use]
    pub fn rules(&self) -> &RuleStoreHandle {
        &self.rules
    }

    /// Current state of `path`.
    pub async fn state_of(&self, path: &str) -> AppState {
        self.registry.lock().await.membership(path).into()
    }

    /// Handle an application seen for the first time this session.
    ///
    /// Known applications keep their recorded decision. Unknown, safe
    /// applications are blocked and queued for review; unsafe ones are left
    /// alone and reported as [`EngineError::Unsafe`].
    pub async fn on_new_app(&self, path: &str) -> Result<AppState, EngineError> {
        let app = AppIdentity::new(path)?;
        self.audit.log(AuditEvent::AppDetected {
            path: app.path().to_string(),
        });

        if let Err(violation) = safety::evaluate(&BlockTarget::process(app.path())) {
            debug!("Not evaluating {}: {}", app, violation);
            self.audit.log(AuditEvent::SafetyExempt {
                path: app.path().to_string(),
                reason: violation.to_string(),
            });
            return Err(violation.into());
        }

        let notify = {
            let mut registry = self.registry.lock().await;
            let before = registry.membership(app.key());
            if registry.is_known(app.key()) {
                debug!("{} already decided: {:?}", app, AppState::from(before));
                return Ok(before.into());
            }

            registry.add_to_blacklist(&app);
            registry.add_pending(&app);
            let rule = self
                .create_rule(&mut registry, &app, before)
                .await?;

            info!("Blocked new application {} pending review", app);
            self.audit.log(AuditEvent::AppBlocked {
                path: app.path().to_string(),
                rule: rule.name,
                reason: BlockReason::DefaultDeny,
            });
            registry.settings().enable_notifications()
        };

        if notify {
            self.notify(EngineToUi::PendingDecision {
                id: Uuid::new_v4(),
                path: app.path().to_string(),
                name: app.basename().to_string(),
                timestamp: Utc::now(),
            })
            .await;
        }
        Ok(AppState::PendingDecision)
    }

    /// Allow `path`, removing its block rule.
    pub async fn allow(&self, path: &str) -> Result<AppState, EngineError> {
        let app = AppIdentity::new(path)?;
        let mut registry = self.registry.lock().await;
        let before = registry.membership(app.key());

        registry.add_to_whitelist(&app);
        let removed = self.remove_rule(&mut registry, &app, before).await?;

        info!("Allowed {}", app);
        self.audit.log(AuditEvent::AppAllowed {
            path: app.path().to_string(),
            rule_removed: removed.is_some(),
        });
        Ok(AppState::Whitelisted)
    }

    /// Block `path`.
    ///
    /// Confirming a pending application keeps its existing rule; otherwise a
    /// rule is created. The safety guard is consulted first in every case.
    pub async fn block(&self, path: &str) -> Result<AppState, EngineError> {
        let app = AppIdentity::new(path)?;
        if let Err(violation) = safety::evaluate(&BlockTarget::process(app.path())) {
            self.audit.log(AuditEvent::SafetyExempt {
                path: app.path().to_string(),
                reason: violation.to_string(),
            });
            return Err(violation.into());
        }

        let mut registry = self.registry.lock().await;
        let before = registry.membership(app.key());

        registry.add_to_blacklist(&app);
        if before.blacklisted {
            info!("Confirmed block of {}", app);
            return Ok(AppState::Blacklisted);
        }

        let rule = self.create_rule(&mut registry, &app, before).await?;
        info!("Blocked {}", app);
        self.audit.log(AuditEvent::AppBlocked {
            path: app.path().to_string(),
            rule: rule.name,
            reason: BlockReason::UserDecision,
        });
        Ok(AppState::Blacklisted)
    }

    /// Clear every decision about `path` and remove its rule if present.
    ///
    /// The application will be detected again on its next connection.
    pub async fn forget(&self, path: &str) -> Result<AppState, EngineError> {
        let app = AppIdentity::new(path)?;
        let mut registry = self.registry.lock().await;
        let before = registry.membership(app.key());

        registry.forget(&app);
        let removed = self.remove_rule(&mut registry, &app, before).await?;
        self.seen.remove(app.path());

        info!("Forgot {}", app);
        self.audit.log(AuditEvent::AppForgotten {
            path: app.path().to_string(),
            rule_removed: removed.is_some(),
        });
        Ok(AppState::Unseen)
    }

    /// Validate, apply and persist a setting.
    pub async fn update_setting(
        &self,
        key: SettingKey,
        value: SettingValue,
    ) -> Result<SettingValue, EngineError> {
        let mut registry = self.registry.lock().await;
        registry.update_setting(key, value)?;

        if key == SettingKey::ConnectionUpdateInterval {
            self.interval_tx
                .send_replace(registry.settings().connection_update_interval());
        }
        let applied = registry.get_setting(key);
        info!("Setting {} = {}", key, applied);
        Ok(applied)
    }

    /// Evaluate connections that existed before sampling started.
    ///
    /// Takes one sample and runs every newly seen path through
    /// [`on_new_app`](Self::on_new_app). Returns the number of paths evaluated.
    ///
    /// The sample is bounded by `tick_timeout`. On expiry startup continues
    /// with nothing evaluated, and a detached task evaluates the sample if it
    /// ever completes, since its paths are already marked seen.
    pub async fn reconcile_startup(
        self: &Arc<Self>,
        sampler: Arc<ConnectionSampler>,
        tick_timeout: Duration,
    ) -> usize {
        let mut tick = tokio::task::spawn_blocking(move || sampler.sample());
        let sample = match tokio::time::timeout(tick_timeout, &mut tick).await {
            Ok(Ok(Ok(sample))) => sample,
            Ok(Ok(Err(e))) => {
                warn!("Startup reconciliation skipped: {}", e);
                return 0;
            }
            Ok(Err(e)) => {
                error!("Startup reconciliation failed: {}", e);
                return 0;
            }
            Err(_) => {
                warn!(
                    "Startup sample exceeded {:?}; continuing without reconciliation",
                    tick_timeout
                );
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    if let Ok(Ok(sample)) = tick.await {
                        info!(
                            "Late startup sample found {} applications",
                            sample.new_apps.len()
                        );
                        for path in sample.new_apps {
                            engine.handle_new_app(&path).await;
                        }
                    }
                });
                return 0;
            }
        };

        self.publish_snapshot(sample.connections).await;
        let count = sample.new_apps.len();
        for path in sample.new_apps {
            self.handle_new_app(&path).await;
        }
        info!("Startup reconciliation evaluated {} applications", count);
        count
    }

    /// Remove every prefixed rule and clear all lists.
    ///
    /// Rules are removed unconditionally; individual failures are collected and
    /// do not stop the reset. Fails only if the rules cannot be listed.
    pub async fn emergency_reset(&self) -> Result<ResetReport, EngineError> {
        let mut registry = self.registry.lock().await;
        let rules = self.rules.list_rules().await?;

        let mut report = ResetReport::default();
        for rule in rules {
            match self.rules.remove_by_name(&rule.name).await {
                Ok(()) => report.removed.push(rule.name),
                Err(e) => {
                    error!("Failed to remove {}: {}", rule.name, e);
                    report.failures.push((rule.name, e.to_string()));
                }
            }
        }

        registry.clear();
        self.seen.clear();

        warn!(
            "Emergency reset removed {} rules ({} failures)",
            report.removed.len(),
            report.failures.len()
        );
        self.audit.log(AuditEvent::EmergencyReset {
            rules_removed: report.removed.len(),
            failures: report.failures.len(),
        });
        Ok(report)
    }

    /// Apply one UI command.
    pub async fn apply(&self, command: UiToEngine) -> Result<EngineToUi, EngineError> {
        match command {
            UiToEngine::Allow { path } => {
                let state = self.allow(&path).await?;
                Ok(EngineToUi::DecisionApplied { path, state })
            }
            UiToEngine::Block { path } => {
                let state = self.block(&path).await?;
                Ok(EngineToUi::DecisionApplied { path, state })
            }
            UiToEngine::Forget { path } => {
                let state = self.forget(&path).await?;
                Ok(EngineToUi::DecisionApplied { path, state })
            }
            UiToEngine::UpdateSetting { key, value } => {
                let value = self.update_setting(key, value).await?;
                Ok(EngineToUi::SettingChanged { key, value })
            }
            UiToEngine::UiShutdown => Err(EngineError::Stopped),
        }
    }

    /// Consume sampler events until the sampler goes away.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<SamplerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SamplerEvent::Connections(connections) => {
                    self.publish_snapshot(connections).await
                }
                SamplerEvent::NewApp(path) => self.handle_new_app(&path).await,
            }
        }
        debug!("Sampler event stream closed");
    }

    /// Apply UI commands until the UI goes away or asks to stop.
    pub async fn serve(self: Arc<Self>, mut commands: mpsc::Receiver<UiToEngine>) {
        while let Some(command) = commands.recv().await {
            if command == UiToEngine::UiShutdown {
                debug!("UI requested shutdown");
                break;
            }

            let text = command.to_string();
            match self.apply(command).await {
                Ok(reply) => self.notify(reply).await,
                Err(e) => {
                    warn!("Command '{}' failed: {}", text, e);
                    self.notify(EngineToUi::CommandFailed {
                        command: text,
                        reason: e.to_string(),
                    })
                    .await;
                }
            }
        }
        self.notify(EngineToUi::Shutdown).await;
    }

    async fn handle_new_app(&self, path: &str) {
        match self.on_new_app(path).await {
            Ok(_) | Err(EngineError::Unsafe(_)) => {}
            Err(e) if e.is_transient() => warn!("Could not block {}: {}", path, e),
            Err(e) => error!("Could not block {}: {}", path, e),
        }
    }

    async fn publish_snapshot(&self, mut connections: Vec<Connection>) {
        let limit = self
            .registry
            .lock()
            .await
            .settings()
            .max_connections_display();
        let total = connections.len();
        connections.truncate(limit);

        self.notify(EngineToUi::ConnectionSnapshot {
            connections,
            total,
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn notify(&self, msg: EngineToUi) {
        if let Some(tx) = &self.ui_tx
            && tx.send(msg).await.is_err()
        {
            debug!("UI receiver dropped");
        }
    }

    /// Create the block rule for `app`, rolling the registry back on failure.
    ///
    /// An existing rule for the same executable counts as success; one that
    /// targets a different executable is a collision.
    async fn create_rule(
        &self,
        registry: &mut PolicyRegistry,
        app: &AppIdentity,
        before: Membership,
    ) -> Result<FirewallRule, EngineError> {
        match self.rules.add_block_rule(app.path()).await {
            Ok(rule) => Ok(rule),
            Err(RuleStoreError::AlreadyExists {
                name,
                existing_path,
            }) => {
                if canonical_key(&existing_path) == app.key() {
                    debug!("Rule {} already blocks {}", name, app);
                    match self.rules.find_rule(app.path()).await {
                        Ok(Some(rule)) => Ok(rule),
                        Ok(None) | Err(_) => Ok(FirewallRule::outbound_block(
                            self.rules.prefix(),
                            &existing_path,
                        )),
                    }
                } else {
                    registry.restore(app, before);
                    Err(EngineError::RuleCollision {
                        rule: name,
                        existing: existing_path,
                    })
                }
            }
            Err(e) => {
                registry.restore(app, before);
                self.audit_failure(app, RuleOperation::Add, &e);
                Err(e.into())
            }
        }
    }

    /// Remove the block rule for `app` if one exists for this executable,
    /// rolling the registry back on failure.
    ///
    /// A rule with the same name that targets a different executable is left
    /// in place.
    async fn remove_rule(
        &self,
        registry: &mut PolicyRegistry,
        app: &AppIdentity,
        before: Membership,
    ) -> Result<Option<FirewallRule>, EngineError> {
        let existing = match self.rules.find_rule(app.path()).await {
            Ok(existing) => existing,
            Err(e) => {
                registry.restore(app, before);
                self.audit_failure(app, RuleOperation::Find, &e);
                return Err(e.into());
            }
        };

        let Some(existing) = existing else {
            return Ok(None);
        };
        if !existing.targets(app.path()) {
            warn!(
                "Rule {} blocks {}, not {}; leaving it in place",
                existing.name, existing.app_path, app
            );
            return Ok(None);
        }

        match self.rules.remove_rule(app.path()).await {
            Ok(rule) => Ok(Some(rule)),
            Err(RuleStoreError::NoRuleFound(_)) => Ok(None),
            Err(e) => {
                registry.restore(app, before);
                self.audit_failure(app, RuleOperation::Remove, &e);
                Err(e.into())
            }
        }
    }

    fn audit_failure(&self, app: &AppIdentity, operation: RuleOperation, error: &RuleStoreError) {
        self.audit.log(AuditEvent::RuleStoreFailure {
            path: app.path().to_string(),
            operation,
            error: error.to_string(),
        });
    }
}

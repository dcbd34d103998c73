//! Native rule API seam.
//!
//! A [`RuleBackend`] creates, lists and removes rules by exact name. Calls are
//! synchronous and may block on OS or IPC latency; they are only ever made from
//! the rule-store worker thread (see [`super::store`]).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use super::error::BackendError;
use super::rule::FirewallRule;

/// Create/list/remove access to a native rule store.
pub trait RuleBackend: Send {
    /// Create `rule`. Fails if a rule with the same name exists.
    fn create(&mut self, rule: &FirewallRule) -> Result<(), BackendError>;

    /// Every rule whose name starts with `name_prefix`.
    fn list(&mut self, name_prefix: &str) -> Result<Vec<FirewallRule>, BackendError>;

    /// Delete the rule named `name`.
    fn remove(&mut self, name: &str) -> Result<(), BackendError>;

    /// The rule named exactly `name`, if any.
    fn find(&mut self, name: &str) -> Result<Option<FirewallRule>, BackendError> {
        Ok(self.list(name)?.into_iter().find(|rule| rule.name == name))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    rules: Mutex<BTreeMap<String, FirewallRule>>,
    unavailable: AtomicBool,
    latency: Mutex<Duration>,
}

/// In-process rule store.
///
/// Clones share the same rules, so a test (or the `--dry-run` CLI) can keep a
/// handle for inspection while the rule-store worker owns another. Outages and
/// slow calls can be simulated with [`set_unavailable`](Self::set_unavailable)
/// and [`set_latency`](Self::set_latency).
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<MemoryState>,
}

impl MemoryBackend {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`BackendError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.state.latency) = latency;
    }

    /// Insert a rule directly, bypassing all checks.
    pub fn insert(&self, rule: FirewallRule) {
        lock(&self.state.rules).insert(rule.name.clone(), rule);
    }

    /// Snapshot of all rules, ordered by name.
    #[must_use]
    pub fn rules(&self) -> Vec<FirewallRule> {
        lock(&self.state.rules).values().cloned().collect()
    }

    /// Whether a rule named `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.state.rules).contains_key(name)
    }

    fn enter(&self, op: &str) -> Result<(), BackendError> {
        let latency = *lock(&self.state.latency);
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        if self.state.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!("{op}: simulated outage")));
        }
        trace!("Memory rule store: {}", op);
        Ok(())
    }
}

impl RuleBackend for MemoryBackend {
    fn create(&mut self, rule: &FirewallRule) -> Result<(), BackendError> {
        self.enter("create")?;
        let mut rules = lock(&self.state.rules);
        if rules.contains_key(&rule.name) {
            return Err(BackendError::DuplicateRule(rule.name.clone()));
        }
        rules.insert(rule.name.clone(), rule.clone());
        Ok(())
    }

    fn list(&mut self, name_prefix: &str) -> Result<Vec<FirewallRule>, BackendError> {
        self.enter("list")?;
        Ok(lock(&self.state.rules)
            .values()
            .filter(|rule| rule.name.starts_with(name_prefix))
            .cloned()
            .collect())
    }

    fn remove(&mut self, name: &str) -> Result<(), BackendError> {
        self.enter("remove")?;
        lock(&self.state.rules)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BackendError::NoSuchRule(name.to_string()))
    }

    fn find(&mut self, name: &str) -> Result<Option<FirewallRule>, BackendError> {
        self.enter("find")?;
        Ok(lock(&self.state.rules).get(name).cloned())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_crud() {
        let mut backend = MemoryBackend::new();
        let rule = FirewallRule::outbound_block("Test", "C:\\Apps\\foo.exe");

        backend.create(&rule).unwrap();
        assert!(matches!(
            backend.create(&rule),
            Err(BackendError::DuplicateRule(_))
        ));
        assert_eq!(backend.list("[Test]").unwrap().len(), 1);
        assert_eq!(backend.find("[Test] foo.exe").unwrap(), Some(rule));

        backend.remove("[Test] foo.exe").unwrap();
        assert!(matches!(
            backend.remove("[Test] foo.exe"),
            Err(BackendError::NoSuchRule(_))
        ));
    }

    #[test]
    fn test_list_filters_by_prefix() {
        let mut backend = MemoryBackend::new();
        backend.insert(FirewallRule::outbound_block("Test", "C:\\a.exe"));
        backend.insert(FirewallRule::outbound_block("Other", "C:\\b.exe"));

        let rules = backend.list("[Test]").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "[Test] a.exe");
    }

    #[test]
    fn test_clones_share_state() {
        let observer = MemoryBackend::new();
        let mut worker = observer.clone();
        worker
            .create(&FirewallRule::outbound_block("Test", "C:\\a.exe"))
            .unwrap();
        assert!(observer.contains("[Test] a.exe"));
    }

    #[test]
    fn test_simulated_outage() {
        let mut backend = MemoryBackend::new();
        backend.set_unavailable(true);
        assert!(matches!(
            backend.list("[Test]"),
            Err(BackendError::Unavailable(_))
        ));
        backend.set_unavailable(false);
        assert!(backend.list("[Test]").unwrap().is_empty());
    }
}

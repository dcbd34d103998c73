//! Firewall rule model and the rule naming contract.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::identity::{basename, canonical_key};

/// Traffic direction a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Inbound traffic.
    In,
    /// Outbound traffic.
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "IN"),
            Direction::Out => write!(f, "OUT"),
        }
    }
}

/// What a rule does with matching traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Permit the traffic.
    Allow,
    /// Drop the traffic.
    Block,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Allow => write!(f, "allow"),
            RuleAction::Block => write!(f, "block"),
        }
    }
}

/// A rule in the native firewall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Unique rule name.
    pub name: String,
    /// Executable the rule applies to (may be empty for foreign rules).
    pub app_path: String,
    /// Whether the rule is active.
    pub enabled: bool,
    /// Traffic direction.
    pub direction: Direction,
    /// Rule action.
    pub action: RuleAction,
    /// Free-text description.
    pub description: String,
}

impl FirewallRule {
    /// The enabled outbound block rule for `app_path`.
    #[must_use]
    pub fn outbound_block(prefix: &str, app_path: &str) -> Self {
        let app_name = basename(app_path);
        Self {
            name: rule_name(prefix, app_path),
            app_path: app_path.to_string(),
            enabled: true,
            direction: Direction::Out,
            action: RuleAction::Block,
            description: format!("Block {app_name} - Created by [{prefix}]"),
        }
    }

    /// Whether the rule targets `path` (case-insensitive).
    #[must_use]
    pub fn targets(&self, path: &str) -> bool {
        canonical_key(&self.app_path) == canonical_key(path)
    }
}

/// Name of the rule that blocks `app_path`: `"[<prefix>] <basename>"`.
#[must_use]
pub fn rule_name(prefix: &str, app_path: &str) -> String {
    format!("{} {}", name_prefix(prefix), basename(app_path))
}

/// Prefix carried by every rule this application owns: `"[<prefix>]"`.
#[must_use]
pub fn name_prefix(prefix: &str) -> String {
    format!("[{prefix}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_name() {
        assert_eq!(
            rule_name("WinNetGuard", "C:\\Apps\\foo.exe"),
            "[WinNetGuard] foo.exe"
        );
        assert_eq!(rule_name("Test", "/opt/bin/tool.exe"), "[Test] tool.exe");
    }

    #[test]
    fn test_outbound_block() {
        let rule = FirewallRule::outbound_block("WinNetGuard", "C:\\Apps\\foo.exe");
        assert_eq!(rule.name, "[WinNetGuard] foo.exe");
        assert_eq!(rule.direction, Direction::Out);
        assert_eq!(rule.action, RuleAction::Block);
        assert!(rule.enabled);
        assert!(rule.description.contains("[WinNetGuard]"));
    }

    #[test]
    fn test_targets_ignores_case() {
        let rule = FirewallRule::outbound_block("WinNetGuard", "C:\\Apps\\Foo.exe");
        assert!(rule.targets("c:\\apps\\foo.EXE"));
        assert!(!rule.targets("C:\\Other\\foo.exe"));
    }
}

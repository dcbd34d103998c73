//! Windows Defender Firewall backend driven through `netsh advfirewall`.
//!
//! Rules are created with `add rule`, enumerated with `show rule ... verbose`
//! and deleted with `delete rule`. `netsh` happily creates several rules with
//! the same name, so [`create`](RuleBackend::create) looks the name up first.

use std::process::Command;

use tracing::debug;

use super::backend::RuleBackend;
use super::error::BackendError;
use super::rule::{Direction, FirewallRule, RuleAction};

const NO_MATCH: &str = "No rules match the specified criteria";

/// Rule backend that shells out to `netsh`.
#[derive(Debug, Clone)]
pub struct NetshBackend {
    program: String,
}

impl Default for NetshBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NetshBackend {
    /// Backend using `netsh` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "netsh".to_string(),
        }
    }

    fn run_netsh(&self, args: &[&str]) -> Result<NetshOutput, BackendError> {
        let command = format!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| BackendError::Spawn {
                command: command.clone(),
                source,
            })?;

        // netsh reports most errors on stdout.
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug!("{} exited with {}", command, output.status);

        Ok(NetshOutput {
            command,
            success: output.status.success(),
            text: format!("{stdout}{stderr}"),
        })
    }
}

struct NetshOutput {
    command: String,
    success: bool,
    text: String,
}

impl NetshOutput {
    fn no_match(&self) -> bool {
        self.text.contains(NO_MATCH)
    }

    fn into_result(self) -> Result<String, BackendError> {
        if self.success {
            Ok(self.text)
        } else {
            Err(BackendError::CommandFailed {
                command: self.command,
                message: self.text.trim().to_string(),
            })
        }
    }
}

impl RuleBackend for NetshBackend {
    fn create(&mut self, rule: &FirewallRule) -> Result<(), BackendError> {
        if self.find(&rule.name)?.is_some() {
            return Err(BackendError::DuplicateRule(rule.name.clone()));
        }

        let name = format!("name={}", rule.name);
        let dir = match rule.direction {
            Direction::In => "dir=in",
            Direction::Out => "dir=out",
        };
        let action = match rule.action {
            RuleAction::Allow => "action=allow",
            RuleAction::Block => "action=block",
        };
        let program = format!("program={}", rule.app_path);
        let enable = if rule.enabled { "enable=yes" } else { "enable=no" };
        let description = format!("description={}", rule.description);

        self.run_netsh(&[
            "advfirewall",
            "firewall",
            "add",
            "rule",
            &name,
            dir,
            action,
            &program,
            enable,
            &description,
        ])?
        .into_result()
        .map(|_| ())
    }

    fn list(&mut self, name_prefix: &str) -> Result<Vec<FirewallRule>, BackendError> {
        let output = self.run_netsh(&[
            "advfirewall",
            "firewall",
            "show",
            "rule",
            "name=all",
            "dir=out",
            "verbose",
        ])?;
        if output.no_match() {
            return Ok(Vec::new());
        }

        Ok(parse_show_rules(&output.into_result()?)
            .into_iter()
            .filter(|rule| rule.name.starts_with(name_prefix))
            .collect())
    }

    fn remove(&mut self, name: &str) -> Result<(), BackendError> {
        let arg = format!("name={name}");
        let output = self.run_netsh(&["advfirewall", "firewall", "delete", "rule", &arg])?;
        if output.no_match() {
            return Err(BackendError::NoSuchRule(name.to_string()));
        }
        output.into_result().map(|_| ())
    }

    fn find(&mut self, name: &str) -> Result<Option<FirewallRule>, BackendError> {
        let arg = format!("name={name}");
        let output = self.run_netsh(&["advfirewall", "firewall", "show", "rule", &arg, "verbose"])?;
        if output.no_match() {
            return Ok(None);
        }
        Ok(parse_show_rules(&output.into_result()?)
            .into_iter()
            .find(|rule| rule.name == name))
    }
}

/// Parse the output of `netsh advfirewall firewall show rule ... verbose`.
///
/// Each rule is a block of `Key: value` lines starting at `Rule Name:`.
/// Unknown keys are ignored.
fn parse_show_rules(output: &str) -> Vec<FirewallRule> {
    let mut rules = Vec::new();
    let mut current: Option<FirewallRule> = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "Rule Name" => {
                if let Some(rule) = current.take() {
                    rules.push(rule);
                }
                current = Some(FirewallRule {
                    name: value.to_string(),
                    app_path: String::new(),
                    enabled: false,
                    direction: Direction::Out,
                    action: RuleAction::Allow,
                    description: String::new(),
                });
            }
            key => {
                let Some(rule) = current.as_mut() else {
                    continue;
                };
                match key {
                    "Enabled" => rule.enabled = value.eq_ignore_ascii_case("yes"),
                    "Direction" => {
                        rule.direction = if value.eq_ignore_ascii_case("in") {
                            Direction::In
                        } else {
                            Direction::Out
                        }
                    }
                    "Action" => {
                        rule.action = if value.eq_ignore_ascii_case("block") {
                            RuleAction::Block
                        } else {
                            RuleAction::Allow
                        }
                    }
                    "Description" => rule.description = value.to_string(),
                    "Program" => rule.app_path = value.to_string(),
                    _ => {}
                }
            }
        }
    }

    rules.extend(current);
    rules
}

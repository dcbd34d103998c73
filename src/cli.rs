//! Command-line interface definitions for winnetguard.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Per-application outbound firewall.
///
/// winnetguard watches live network connections, blocks every application the
/// first time it connects, and lets you allow or block it for good.
#[derive(Parser, Debug)]
#[command(name = "winnetguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of system and user configs,
    /// giving it the highest priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Keep rules in memory instead of touching the OS firewall.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Subcommands for winnetguard.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Monitor connections and enforce decisions until interrupted.
    Run {
        /// Do not read commands from stdin; stop only on Ctrl-C.
        #[arg(long = "no-console")]
        no_console: bool,
    },

    /// Allow an application and remove its block rule.
    Allow {
        /// Absolute path of the executable.
        path: String,
    },

    /// Block an application.
    Block {
        /// Absolute path of the executable.
        path: String,
    },

    /// Clear every decision about an application.
    Forget {
        /// Absolute path of the executable.
        path: String,
    },

    /// List the block rules this tool created.
    Rules,

    /// Show list sizes, rule count and settings.
    Status,

    /// Change a persisted setting.
    Set {
        /// Setting name (e.g. `max_connections_display`).
        key: String,
        /// New value.
        value: String,
    },

    /// Remove every rule this tool created and clear all decisions.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(long = "yes", short = 'y')]
        yes: bool,
    },
}

impl Command {
    /// Whether the command may rewrite the policy store.
    ///
    /// `run` counts: the daemon writes the store for its whole lifetime.
    #[must_use]
    pub fn writes_store(&self) -> bool {
        !matches!(self, Command::Rules | Command::Status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_globals() {
        let cli = Cli::try_parse_from(["winnetguard", "-vv", "--dry-run", "run"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.dry_run);
        assert_eq!(cli.command, Command::Run { no_console: false });
    }

    #[test]
    fn test_parse_decision_path_with_spaces() {
        let cli = Cli::try_parse_from([
            "winnetguard",
            "allow",
            "C:\\Program Files\\App\\app.exe",
            "-c",
            "/tmp/extra.toml",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Allow {
                path: "C:\\Program Files\\App\\app.exe".to_string()
            }
        );
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/extra.toml")));
    }

    #[test]
    fn test_parse_set_and_reset() {
        let cli = Cli::try_parse_from(["winnetguard", "set", "ui_font_size", "14"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Set {
                key: "ui_font_size".to_string(),
                value: "14".to_string()
            }
        );

        let cli = Cli::try_parse_from(["winnetguard", "reset", "--yes"]).unwrap();
        assert_eq!(cli.command, Command::Reset { yes: true });
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["winnetguard"]).is_err());
    }

    #[test]
    fn test_only_read_commands_skip_store_lock() {
        assert!(!Command::Rules.writes_store());
        assert!(!Command::Status.writes_store());
        assert!(Command::Run { no_console: true }.writes_store());
        assert!(
            Command::Set {
                key: "ui_font_size".to_string(),
                value: "14".to_string()
            }
            .writes_store()
        );
        assert!(Command::Reset { yes: true }.writes_store());
    }
}

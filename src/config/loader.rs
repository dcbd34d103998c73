//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults
//! 2. System config: `/etc/winnetguard/config.toml`
//! 3. User config: `<config_dir>/winnetguard/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{BackendKind, Config};
use crate::cli::Cli;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/winnetguard/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "winnetguard";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    system_path: PathBuf,
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load, merge and validate configuration from all sources.
    ///
    /// Missing system and user files are skipped. A missing `--config` file,
    /// invalid TOML, and out-of-range values are errors.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        for (label, path) in [("system", &self.system_path), ("user", &self.user_path)] {
            match load_file(path)? {
                Some(layer) => {
                    config.merge(layer);
                    debug!("Loaded {} config from {:?}", label, path);
                }
                None => debug!("No {} config found at {:?}", label, path),
            }
        }

        if let Some(ref cli_config_path) = cli.config {
            match load_file(cli_config_path)? {
                Some(layer) => {
                    config.merge(layer);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // Unlike system/user config, a missing CLI-specified config is an error
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        if cli.dry_run {
            config.firewall.backend = Some(BackendKind::Memory);
            debug!("Dry run: using in-memory rule backend");
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Load a config file, returning None if it doesn't exist.
fn load_file(path: &Path) -> Result<Option<Config>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let config: Config = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;
            Ok(Some(config))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Command;
    use tempfile::tempdir;

    fn create_test_cli() -> Cli {
        Cli {
            command: Command::Status,
            config: None,
            dry_run: false,
            verbose: 0,
        }
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_paths(
            dir.path().join("nonexistent_system.toml"),
            dir.path().join("nonexistent_user.toml"),
        );

        let config = loader.load(&create_test_cli()).unwrap();
        assert_eq!(config.firewall.rule_prefix(), "WinNetGuard");
        assert_eq!(config.firewall.backend(), BackendKind::Netsh);
    }

    #[test]
    fn test_user_config_overrides_system() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("system.toml"),
            "[monitor]\ntick_timeout_ms = 6000\nstop_timeout_ms = 1000\n",
        )
        .unwrap();
        fs::write(dir.path().join("user.toml"), "[monitor]\ntick_timeout_ms = 9000\n").unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let config = loader.load(&create_test_cli()).unwrap();

        assert_eq!(config.monitor.tick_timeout_ms, Some(9000));
        assert_eq!(config.monitor.stop_timeout_ms, Some(1000));
    }

    #[test]
    fn test_cli_config_layer_and_dry_run() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("extra.toml"), "[firewall]\nrule_prefix = \"Lab\"\n").unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let mut cli = create_test_cli();
        cli.config = Some(dir.path().join("extra.toml"));
        cli.dry_run = true;

        let config = loader.load(&cli).unwrap();
        assert_eq!(config.firewall.rule_prefix(), "Lab");
        assert_eq!(config.firewall.backend(), BackendKind::Memory);
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        let mut cli = create_test_cli();
        cli.config = Some(dir.path().join("missing.toml"));

        assert!(matches!(
            loader.load(&cli),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("invalid.toml"), "this is not valid TOML [[[").unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("invalid.toml"), dir.path().join("user.toml"));
        let err = loader.load(&create_test_cli()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("invalid.toml"));
    }

    #[test]
    fn test_invalid_value_returns_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("user.toml"), "[firewall]\ncall_timeout_ms = 0\n").unwrap();

        let loader =
            ConfigLoader::with_paths(dir.path().join("system.toml"), dir.path().join("user.toml"));
        assert!(matches!(
            loader.load(&create_test_cli()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}

//! Persisted allow/block membership and user settings.
//!
//! The registry holds three disjoint sets of [`AppIdentity`] values. The
//! whitelist and blacklist are persisted as a JSON document; the pending set
//! only lives for the current session. Every mutation of a persisted set is
//! followed by a whole-document write, done by writing a temporary file next
//! to the store and renaming it over the old one.
//!
//! # Store Format
//!
//! ```json
//! {
//!   "whitelist": ["C:\\Apps\\editor.exe"],
//!   "blacklist": ["C:\\Apps\\updater.exe"],
//!   "settings": { "ui_font_size": 14 }
//! }
//! ```
//!
//! This is the layout of the legacy `firewall_settings.json`, so `store_path`
//! may point at an existing one.
//!
//! Write failures are logged and never returned: the in-memory state stays
//! authoritative for the running process. Changes made after a failed write are
//! lost if the process crashes before the next successful one.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::RegistryError;
use super::identity::{AppIdentity, canonical_key};
use super::settings::{SettingKey, SettingValue, Settings, SettingsError};

/// Serialized form of the registry.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    whitelist: Vec<AppIdentity>,
    #[serde(default)]
    blacklist: Vec<AppIdentity>,
    #[serde(default)]
    settings: serde_json::Map<String, serde_json::Value>,
}

/// Which sets an application belongs to.
///
/// Captured before a transition so a failed rule-store mutation can restore the
/// exact prior membership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Membership {
    /// In the whitelist.
    pub whitelisted: bool,
    /// In the blacklist.
    pub blacklisted: bool,
    /// Awaiting a user decision.
    pub pending: bool,
}

/// Allow/block/pending membership plus settings.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    whitelist: HashSet<AppIdentity>,
    blacklist: HashSet<AppIdentity>,
    pending: HashSet<AppIdentity>,
    settings: Settings,
    store_path: Option<PathBuf>,
}

impl PolicyRegistry {
    /// A registry that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the registry from `path`, persisting future changes there.
    ///
    /// A missing store yields an empty registry. An unreadable or corrupt store
    /// is logged as a warning and also yields an empty registry with default
    /// settings.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut registry = match read_document(&path) {
            Ok(Some(doc)) => {
                debug!("Loaded policy store from {:?}", path);
                Self::from_document(doc)
            }
            Ok(None) => {
                debug!("No policy store at {:?}, starting empty", path);
                Self::default()
            }
            Err(e) => {
                warn!("{}; starting with an empty policy", e);
                Self::default()
            }
        };
        registry.store_path = Some(path);
        registry
    }

    fn from_document(doc: PolicyDocument) -> Self {
        let blacklist: HashSet<AppIdentity> = doc.blacklist.into_iter().collect();
        let mut whitelist = HashSet::new();
        for app in doc.whitelist {
            if blacklist.contains(&app) {
                warn!(
                    "Policy store lists {} as both allowed and blocked; keeping it blocked",
                    app
                );
                continue;
            }
            whitelist.insert(app);
        }

        Self {
            whitelist,
            blacklist,
            pending: HashSet::new(),
            settings: Settings::from_map(&doc.settings),
            store_path: None,
        }
    }

    /// Location of the backing store, if any.
    #[must_use]
    pub fn store_path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    /// Whether `path` is allowed.
    #[must_use]
    pub fn is_whitelisted(&self, path: &str) -> bool {
        self.whitelist.contains(canonical_key(path).as_str())
    }

    /// Whether `path` is blocked.
    #[must_use]
    pub fn is_blacklisted(&self, path: &str) -> bool {
        self.blacklist.contains(canonical_key(path).as_str())
    }

    /// Whether `path` awaits a user decision.
    #[must_use]
    pub fn is_pending(&self, path: &str) -> bool {
        self.pending.contains(canonical_key(path).as_str())
    }

    /// Whether a decision has been recorded for `path`.
    #[must_use]
    pub fn is_known(&self, path: &str) -> bool {
        let key = canonical_key(path);
        self.whitelist.contains(key.as_str()) || self.blacklist.contains(key.as_str())
    }

    /// Current membership of `path`.
    #[must_use]
    pub fn membership(&self, path: &str) -> Membership {
        let key = canonical_key(path);
        Membership {
            whitelisted: self.whitelist.contains(key.as_str()),
            blacklisted: self.blacklist.contains(key.as_str()),
            pending: self.pending.contains(key.as_str()),
        }
    }

    /// Allow `app`: removes it from the blacklist and pending set first.
    pub fn add_to_whitelist(&mut self, app: &AppIdentity) {
        self.blacklist.remove(app);
        self.pending.remove(app);
        self.whitelist.insert(app.clone());
        self.flush();
    }

    /// Block `app`: removes it from the whitelist and pending set first.
    pub fn add_to_blacklist(&mut self, app: &AppIdentity) {
        self.whitelist.remove(app);
        self.pending.remove(app);
        self.blacklist.insert(app.clone());
        self.flush();
    }

    /// Queue `app` for a user decision. Not persisted.
    pub fn add_pending(&mut self, app: &AppIdentity) {
        self.pending.insert(app.clone());
    }

    /// Remove `app` from the whitelist.
    pub fn remove_from_whitelist(&mut self, app: &AppIdentity) {
        if self.whitelist.remove(app) {
            self.flush();
        }
    }

    /// Remove `app` from the blacklist.
    pub fn remove_from_blacklist(&mut self, app: &AppIdentity) {
        if self.blacklist.remove(app) {
            self.flush();
        }
    }

    /// Clear the pending flag for `app`.
    pub fn remove_pending(&mut self, app: &AppIdentity) {
        self.pending.remove(app);
    }

    /// Remove `app` from all three sets.
    pub fn forget(&mut self, app: &AppIdentity) {
        self.whitelist.remove(app);
        self.blacklist.remove(app);
        self.pending.remove(app);
        self.flush();
    }

    /// Put `app` back into exactly the sets recorded in `membership`.
    pub fn restore(&mut self, app: &AppIdentity, membership: Membership) {
        self.whitelist.remove(app);
        self.blacklist.remove(app);
        self.pending.remove(app);
        if membership.whitelisted {
            self.whitelist.insert(app.clone());
        }
        if membership.blacklisted {
            self.blacklist.insert(app.clone());
        }
        if membership.pending {
            self.pending.insert(app.clone());
        }
        self.flush();
    }

    /// Clear every list and the pending set. Settings are kept.
    pub fn clear(&mut self) {
        self.whitelist.clear();
        self.blacklist.clear();
        self.pending.clear();
        self.flush();
    }

    /// Allowed applications, sorted by path.
    #[must_use]
    pub fn whitelist(&self) -> Vec<AppIdentity> {
        sorted(&self.whitelist)
    }

    /// Blocked applications, sorted by path.
    #[must_use]
    pub fn blacklist(&self) -> Vec<AppIdentity> {
        sorted(&self.blacklist)
    }

    /// Applications awaiting a decision, sorted by path.
    #[must_use]
    pub fn pending(&self) -> Vec<AppIdentity> {
        sorted(&self.pending)
    }

    /// Effective value of a setting.
    #[must_use]
    pub fn get_setting(&self, key: SettingKey) -> SettingValue {
        self.settings.get(key)
    }

    /// Typed view of all settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validate, apply and persist a setting.
    pub fn update_setting(
        &mut self,
        key: SettingKey,
        value: SettingValue,
    ) -> Result<(), SettingsError> {
        self.settings.set(key, value)?;
        self.flush();
        Ok(())
    }

    /// Write the whole registry to its store.
    ///
    /// Does nothing for an in-memory registry.
    pub fn persist(&self) -> Result<(), RegistryError> {
        let Some(path) = &self.store_path else {
            return Ok(());
        };

        let doc = PolicyDocument {
            whitelist: self.whitelist(),
            blacklist: self.blacklist(),
            settings: self.settings.to_map(),
        };
        let contents = serde_json::to_string_pretty(&doc)?;
        write_atomically(path, contents.as_bytes())?;
        debug!("Persisted policy store to {:?}", path);
        Ok(())
    }

    fn flush(&self) {
        if let Err(e) = self.persist() {
            warn!("{}; in-memory policy remains in effect", e);
        }
    }
}

fn sorted(set: &HashSet<AppIdentity>) -> Vec<AppIdentity> {
    let mut apps: Vec<AppIdentity> = set.iter().cloned().collect();
    apps.sort_by(|a, b| a.key().cmp(b.key()));
    apps
}

fn read_document(path: &Path) -> Result<Option<PolicyDocument>, RegistryError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RegistryError::Read {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| RegistryError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), RegistryError> {
    let write_err = |source| RegistryError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(write_err)?;

    let mut file = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    file.write_all(contents).map_err(write_err)?;
    file.as_file().sync_all().map_err(write_err)?;
    file.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

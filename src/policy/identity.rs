//! Application identity.
//!
//! Every registry entry and firewall rule is keyed by the absolute path of an
//! executable. Paths are compared case-insensitively, so the canonical
//! (lowercased) key is computed once when an identity is created and used for
//! all hashing and equality. The original spelling is kept for display and for
//! touching the filesystem.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// An executable path used as the key for all policy decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppIdentity {
    /// Lowercased path, used for equality and hashing.
    key: String,
    /// Path as it was first observed.
    path: String,
}

/// Error returned when a string cannot be used as an application identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Application path must not be empty")]
pub struct EmptyPath;

impl AppIdentity {
    /// Create an identity from an executable path.
    ///
    /// Leading and trailing whitespace is ignored. An empty path (the sampler's
    /// marker for an unresolvable process) is rejected.
    pub fn new(path: &str) -> Result<Self, EmptyPath> {
        let path = path.trim();
        if path.is_empty() {
            return Err(EmptyPath);
        }
        Ok(Self {
            key: canonical_key(path),
            path: path.to_string(),
        })
    }

    /// The canonical, case-folded key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The path as originally observed.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final path component (file name) of the executable.
    #[must_use]
    pub fn basename(&self) -> &str {
        basename(&self.path)
    }
}

impl PartialEq for AppIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for AppIdentity {}

// Hashes exactly like the `str` key so sets can be queried with `&str`.
impl Hash for AppIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl Borrow<str> for AppIdentity {
    fn borrow(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl TryFrom<String> for AppIdentity {
    type Error = EmptyPath;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<AppIdentity> for String {
    fn from(identity: AppIdentity) -> Self {
        identity.path
    }
}

/// Case-fold a path into its canonical comparison key.
#[must_use]
pub fn canonical_key(path: &str) -> String {
    path.trim().to_lowercase()
}

/// Final component of a path, accepting both `/` and `\` separators.
///
/// Rule names and critical-process checks operate on this value, and the
/// monitored paths may come from either Windows or Unix hosts.
#[must_use]
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_case_insensitive_equality() {
        let a = AppIdentity::new("C:\\Apps\\Foo.exe").unwrap();
        let b = AppIdentity::new("c:\\apps\\foo.EXE").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.path(), "C:\\Apps\\Foo.exe");
        assert_eq!(a.key(), "c:\\apps\\foo.exe");
    }

    #[test]
    fn test_set_lookup_by_str() {
        let mut set = HashSet::new();
        set.insert(AppIdentity::new("/usr/bin/Curl").unwrap());
        assert!(set.contains(canonical_key("/USR/BIN/curl").as_str()));
        assert!(!set.contains("/usr/bin/wget"));
    }

    #[test]
    fn test_empty_path_rejected() {
        assert_eq!(AppIdentity::new(""), Err(EmptyPath));
        assert_eq!(AppIdentity::new("   "), Err(EmptyPath));
    }

    #[test]
    fn test_basename_windows_and_unix() {
        assert_eq!(basename("C:\\Apps\\foo.exe"), "foo.exe");
        assert_eq!(basename("/usr/bin/curl"), "curl");
        assert_eq!(basename("mixed/dir\\tool.exe"), "tool.exe");
        assert_eq!(basename("plain.exe"), "plain.exe");
    }

    #[test]
    fn test_serde_uses_original_path() {
        let id = AppIdentity::new("C:\\Apps\\Foo.exe").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"C:\\\\Apps\\\\Foo.exe\"");

        let back: AppIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<AppIdentity>("\"\"").is_err());
    }
}

//! Exclusive ownership of a policy store.
//!
//! A running daemon keeps its registry in memory and rewrites the whole store
//! on every change, so a second writer would have its changes overwritten.
//! Every process that mutates the store first takes an advisory write lock on
//! `<store>.lock` and holds it for as long as it may write.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::RegistryError;

/// Lock file guarding one policy store.
///
/// A lock built with [`StoreLock::unlocked`] guards nothing and always
/// acquires; it stands in for registries that are never persisted.
pub struct StoreLock {
    file: Option<fd_lock::RwLock<File>>,
    path: PathBuf,
}

/// Proof that the store is held. Dropping it releases the lock.
pub struct StoreGuard<'a> {
    _guard: Option<fd_lock::RwLockWriteGuard<'a, File>>,
}

impl StoreLock {
    /// Open (creating if needed) the lock file for the store at `store`.
    pub fn open(store: &Path) -> Result<Self, RegistryError> {
        let path = lock_path(store);
        let lock_err = |source| RegistryError::Lock {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;

        Ok(Self {
            file: Some(fd_lock::RwLock::new(file)),
            path,
        })
    }

    /// A lock that guards nothing.
    #[must_use]
    pub fn unlocked() -> Self {
        Self {
            file: None,
            path: PathBuf::new(),
        }
    }

    /// Location of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without waiting.
    ///
    /// Fails with [`RegistryError::Locked`] while another process holds it.
    pub fn try_acquire(&mut self) -> Result<StoreGuard<'_>, RegistryError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(StoreGuard { _guard: None });
        };

        match file.try_write() {
            Ok(guard) => {
                debug!("Holding policy store lock {:?}", self.path);
                Ok(StoreGuard {
                    _guard: Some(guard),
                })
            }
            Err(e) if is_contended(&e) => Err(RegistryError::Locked {
                path: self.path.clone(),
            }),
            Err(e) => Err(RegistryError::Lock {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

/// `<store>.lock`, next to the store itself.
fn lock_path(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// `EWOULDBLOCK` on Unix, `ERROR_LOCK_VIOLATION` on Windows.
fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || (cfg!(windows) && e.raw_os_error() == Some(33))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_holder_is_refused() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("policy.json");

        let mut daemon = StoreLock::open(&store).unwrap();
        let held = daemon.try_acquire().unwrap();

        let mut cli = StoreLock::open(&store).unwrap();
        let err = cli.try_acquire().err().unwrap();
        assert!(matches!(err, RegistryError::Locked { .. }));
        assert!(err.to_string().contains("policy.json.lock"));

        drop(held);
        assert!(cli.try_acquire().is_ok());
    }

    #[test]
    fn test_lock_file_sits_next_to_store() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("nested").join("policy.json");

        let lock = StoreLock::open(&store).unwrap();
        assert_eq!(lock.path(), dir.path().join("nested").join("policy.json.lock"));
        assert!(lock.path().exists());
    }

    #[test]
    fn test_unlocked_always_acquires() {
        let mut lock = StoreLock::unlocked();
        let _first = lock.try_acquire().unwrap();
    }
}

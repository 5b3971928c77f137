//! Run lock.
//!
//! Two reconcilers mutating the same host would race on the package
//! manager and the unit file. A run holds an exclusive, non-blocking
//! `flock` on the lock file for its whole duration; the kernel drops it
//! when the process exits, however it exits.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{ReconcileError, Result};

/// Default lock file location
pub const DEFAULT_LOCK_FILE: &str = "/run/pgreconcile.lock";

/// Held for the duration of a run; released on drop
pub struct RunLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl RunLock {
    /// Take the lock or fail immediately if another run holds it
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ReconcileError::lock(format!("cannot open {}: {}", path.display(), e)))?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => {
                let holder = std::fs::read_to_string(path).unwrap_or_default();
                return Err(ReconcileError::lock(format!(
                    "another run holds {} (pid {})",
                    path.display(),
                    holder.trim()
                )));
            }
            Err((_, errno)) => {
                return Err(ReconcileError::lock(format!(
                    "cannot lock {}: {}",
                    path.display(),
                    errno
                )));
            }
        };

        lock.set_len(0)?;
        lock.seek(SeekFrom::Start(0))?;
        writeln!(lock, "{}", std::process::id())?;
        tracing::debug!("Acquired run lock {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for RunLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pgreconcile.lock");

        let first = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, ReconcileError::Lock(_)));
        assert!(err.to_string().contains(&std::process::id().to_string()));

        drop(first);
        assert!(RunLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_debug_names_the_lock_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pgreconcile.lock");

        let lock = RunLock::acquire(&path).unwrap();
        let debug = format!("{:?}", lock);
        assert!(debug.starts_with("RunLock"));
        assert!(debug.contains("pgreconcile.lock"));
    }

    #[test]
    fn test_unwritable_location() {
        let err = RunLock::acquire("/nonexistent-dir/pgreconcile.lock").unwrap_err();
        assert!(matches!(err, ReconcileError::Lock(_)));
    }
}

/// Advisory lock that keeps two evaluation cycles from overlapping.
///
/// Acquisition never blocks: a cycle that finds the lock held is skipped.
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive lock on the cycle lock file. Released on drop.
#[derive(Debug)]
pub struct CycleLock {
    file: File,
    path: PathBuf,
}

impl CycleLock {
    /// Try to take the lock without waiting.
    ///
    /// Returns `Ok(None)` when another cycle holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<CycleLock>, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LockError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(CycleLock {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(LockError::Lock {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Whether some process currently holds the lock at `path`.
    pub fn is_held(path: &Path) -> bool {
        match CycleLock::try_acquire(path) {
            Ok(Some(_lock)) => false,
            Ok(None) => true,
            Err(_) => false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::debug!(error = %e, path = %self.path.display(), "failed to release cycle lock");
        }
    }
}

/// Errors from opening or locking the lock file.
#[derive(Debug)]
pub enum LockError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Open { path, source } => {
                write!(f, "failed to open lock file {}: {source}", path.display())
            }
            LockError::Lock { path, source } => {
                write!(f, "failed to lock {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Open { source, .. } => Some(source),
            LockError::Lock { source, .. } => Some(source),
        }
    }
}

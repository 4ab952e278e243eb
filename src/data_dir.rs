use std::path::{Path, PathBuf};

/// Manages the detector's state directory layout.
///
/// Everything idlewatch persists between cycles lives under a single data
/// directory (default `/var/lib/idlewatch/`). This struct provides accessors
/// for each well-known path and handles initialization.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Create a new DataDir referencing the given root path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory (e.g. `/var/lib/idlewatch/`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the idle streak counter file.
    pub fn idle_streak(&self) -> PathBuf {
        self.root.join("idle_streak")
    }

    /// Path to the per-cycle lock file.
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Default audit log path when none is configured.
    pub fn audit_log(&self) -> PathBuf {
        self.root.join("audit.log")
    }

    /// Create the data directory if missing.
    /// Returns Ok(true) if it was created, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_paths() {
        let dd = DataDir::new("/var/lib/idlewatch");
        assert_eq!(dd.root(), Path::new("/var/lib/idlewatch"));
        assert_eq!(dd.idle_streak(), PathBuf::from("/var/lib/idlewatch/idle_streak"));
        assert_eq!(dd.lock(), PathBuf::from("/var/lib/idlewatch/lock"));
        assert_eq!(dd.audit_log(), PathBuf::from("/var/lib/idlewatch/audit.log"));
    }

    #[test]
    fn test_init_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("state");
        let dd = DataDir::new(&root);

        assert!(!root.exists());
        assert!(dd.init().unwrap());
        assert!(root.is_dir());
    }

    #[test]
    fn test_init_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dd = DataDir::new(tmp.path().join("state"));

        assert!(dd.init().unwrap());
        assert!(!dd.init().unwrap());
    }
}

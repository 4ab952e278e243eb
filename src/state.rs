/// Idle streak persistence.
///
/// The counter is the only state carried between cycles. Writes replace the
/// whole value atomically (temp file then rename) so a reader never sees a
/// partial write.
use std::io::Write;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::Mutex;

/// State the decision function consumes and returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdleState {
    /// Consecutive cycles classified idle.
    pub idle_streak: u32,
}

/// Where the idle streak lives between cycles.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<IdleState, StateError>;
    fn save(&self, state: IdleState) -> Result<(), StateError>;
}

/// Counter kept in a small text file holding the decimal value.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl StateStore for FileStateStore {
    /// A missing file is a fresh counter. A corrupt one is treated the same,
    /// with a warning, so a damaged file can never block the detector.
    fn load(&self) -> Result<IdleState, StateError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(IdleState::default()),
            Err(e) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        match contents.trim().parse::<u32>() {
            Ok(idle_streak) => Ok(IdleState { idle_streak }),
            Err(_) => {
                tracing::warn!(
                    path = %self.path.display(),
                    contents = %contents.trim(),
                    "idle streak file is corrupt, starting from 0"
                );
                Ok(IdleState::default())
            }
        }
    }

    fn save(&self, state: IdleState) -> Result<(), StateError> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StateError::Write {
            path: dir.to_path_buf(),
            source: e,
        })?;
        writeln!(tmp, "{}", state.idle_streak).map_err(|e| StateError::Write {
            path: tmp.path().to_path_buf(),
            source: e,
        })?;
        tmp.persist(&self.path).map_err(|e| StateError::Write {
            path: self.path.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}

/// In-memory store for exercising cycles without a data directory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<IdleState>,
}

#[cfg(test)]
impl MemoryStateStore {
    pub fn new(state: IdleState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn get(&self) -> IdleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<IdleState, StateError> {
        Ok(self.get())
    }

    fn save(&self, state: IdleState) -> Result<(), StateError> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        Ok(())
    }
}

/// Errors from reading or writing persisted state.
#[derive(Debug)]
pub enum StateError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Read { path, source } => {
                write!(f, "failed to read idle streak {}: {source}", path.display())
            }
            StateError::Write { path, source } => {
                write!(f, "failed to write idle streak {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateError::Read { source, .. } => Some(source),
            StateError::Write { source, .. } => Some(source),
        }
    }
}

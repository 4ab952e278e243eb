/// `status` report: idle streak, threshold, lock state and the last audit line.
///
/// Read-only. Takes no lock, so it can run while a cycle is in flight.
use crate::audit::AuditLog;
use crate::config::DetectorConfig;
use crate::data_dir::DataDir;
use crate::lock::CycleLock;
use crate::state::{FileStateStore, StateStore};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

/// Snapshot of the detector's persisted state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub idle_streak: u32,
    pub idle_threshold: u32,
    /// Idle cycles still needed before shutdown.
    pub cycles_until_shutdown: u32,
    pub lock_held: bool,
    pub dry_run: bool,
    pub last_audit: Option<String>,
    pub data_dir: PathBuf,
    pub audit_log: PathBuf,
    /// Set when the counter file could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_error: Option<String>,
}

impl StatusReport {
    pub fn collect(config: &DetectorConfig) -> Self {
        let data_dir = DataDir::new(&config.storage.data_dir);
        let store = FileStateStore::new(data_dir.idle_streak());
        let (idle_streak, state_error) = match store.load() {
            Ok(state) => (state.idle_streak, None),
            Err(e) => (0, Some(e.to_string())),
        };
        let audit = AuditLog::new(config.audit_log_path());
        let idle_threshold = config.decision.idle_threshold;

        Self {
            idle_streak,
            idle_threshold,
            cycles_until_shutdown: idle_threshold.saturating_sub(idle_streak),
            lock_held: CycleLock::is_held(&data_dir.lock()),
            dry_run: config.shutdown.dry_run,
            last_audit: audit.last_line(),
            data_dir: data_dir.root().to_path_buf(),
            audit_log: audit.path().to_path_buf(),
            state_error,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "idle streak:  {}/{} ({} more idle cycle(s) to shutdown)",
            self.idle_streak, self.idle_threshold, self.cycles_until_shutdown
        );
        if let Some(err) = &self.state_error {
            let _ = writeln!(out, "state error:  {err}");
        }
        let _ = writeln!(
            out,
            "cycle lock:   {}",
            if self.lock_held { "held" } else { "free" }
        );
        if self.dry_run {
            let _ = writeln!(out, "shutdown:     dry run");
        }
        let _ = writeln!(out, "data dir:     {}", self.data_dir.display());
        let _ = writeln!(out, "audit log:    {}", self.audit_log.display());
        let _ = writeln!(
            out,
            "last cycle:   {}",
            self.last_audit.as_deref().unwrap_or("(none)")
        );
        out
    }
}

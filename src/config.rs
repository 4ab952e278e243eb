use crate::decision::Policy;
use crate::probes::{SignalKind, SignalRole};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/idlewatch/config.toml";

/// Top-level configuration loaded from config.toml.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub schedule: ScheduleConfig,
    pub decision: DecisionConfig,
    pub signals: SignalsConfig,
    pub thresholds: ThresholdsConfig,
    pub sessions: SessionsConfig,
    pub workload: WorkloadConfig,
    pub storage: StorageConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    pub grace_period_secs: u64,
    pub sample_window_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub policy: Policy,
    pub quorum: usize,
    pub idle_threshold: u32,
}

/// Role of each signal. Vetoes force "active", quorum members vote on idleness.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalsConfig {
    pub sessions: SignalRole,
    pub processes: SignalRole,
    pub accelerator: SignalRole,
    pub cpu: SignalRole,
    pub network: SignalRole,
    pub disk: SignalRole,
    pub memory: SignalRole,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub cpu_percent: u64,
    pub network_kbps: u64,
    pub disk_iops: u64,
    pub disk_kbps: u64,
    pub memory_percent: u64,
    pub accelerator_percent: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub who_command: String,
    pub count_tmux: bool,
    pub count_ssm: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
#[derive(Default)]
pub struct WorkloadConfig {
    /// Regexes matched against full process command lines.
    pub process_patterns: Vec<String>,
    /// Pin the network signal to one interface instead of the default route.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
    pub proc_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub command: String,
    pub args: Vec<String>,
    pub dry_run: bool,
}

// --- Default implementations ---

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            grace_period_secs: 300,
            sample_window_ms: 1000,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            policy: Policy::Quorum,
            quorum: 2,
            idle_threshold: 2,
        }
    }
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            sessions: SignalRole::Veto,
            processes: SignalRole::Veto,
            accelerator: SignalRole::Off,
            cpu: SignalRole::Quorum,
            network: SignalRole::Quorum,
            disk: SignalRole::Quorum,
            memory: SignalRole::Off,
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            cpu_percent: 10,
            network_kbps: 50,
            disk_iops: 10,
            disk_kbps: 100,
            memory_percent: 90,
            accelerator_percent: 5,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            who_command: "who".to_string(),
            count_tmux: true,
            count_ssm: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/idlewatch"),
            audit_log: None,
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            command: "shutdown".to_string(),
            args: vec!["-h".to_string(), "now".to_string()],
            dry_run: false,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn sample_window(&self) -> Duration {
        Duration::from_millis(self.sample_window_ms)
    }
}

impl SignalsConfig {
    /// Configured role for a signal.
    pub fn role(&self, kind: SignalKind) -> SignalRole {
        match kind {
            SignalKind::Sessions => self.sessions,
            SignalKind::Processes => self.processes,
            SignalKind::Accelerator => self.accelerator,
            SignalKind::Cpu => self.cpu,
            SignalKind::Network => self.network,
            SignalKind::Disk => self.disk,
            SignalKind::Memory => self.memory,
        }
    }

    /// Number of signals voting in the idle quorum.
    pub fn quorum_size(&self) -> usize {
        SignalKind::ALL
            .iter()
            .filter(|kind| self.role(**kind) == SignalRole::Quorum)
            .count()
    }
}

impl DetectorConfig {
    /// Load config from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse config from TOML text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            source: e,
        })
    }

    /// Reject settings the detector cannot act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "schedule.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.schedule.sample_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "schedule.sample_window_ms must be greater than 0".to_string(),
            ));
        }
        if self.decision.idle_threshold == 0 {
            return Err(ConfigError::Invalid(
                "decision.idle_threshold must be greater than 0".to_string(),
            ));
        }
        if self.decision.quorum == 0 {
            return Err(ConfigError::Invalid(
                "decision.quorum must be greater than 0".to_string(),
            ));
        }
        let quorum_size = self.signals.quorum_size();
        if self.decision.policy == Policy::Quorum && self.decision.quorum > quorum_size {
            return Err(ConfigError::Invalid(format!(
                "decision.quorum is {} but only {} signal(s) have role \"quorum\"",
                self.decision.quorum, quorum_size
            )));
        }
        for pattern in &self.workload.process_patterns {
            regex::Regex::new(pattern).map_err(|e| ConfigError::Pattern {
                pattern: pattern.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Audit log path, defaulting into the data directory.
    pub fn audit_log_path(&self) -> PathBuf {
        self.storage
            .audit_log
            .clone()
            .unwrap_or_else(|| crate::data_dir::DataDir::new(&self.storage.data_dir).audit_log())
    }

    /// Render the resolved config as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Default content written by `idlewatch init`.
pub const DEFAULT_CONFIG: &str = "\
# idlewatch configuration
# Missing keys fall back to built-in defaults.

[schedule]
interval_secs = 60
grace_period_secs = 300
sample_window_ms = 1000

[decision]
policy = \"quorum\"
quorum = 2
idle_threshold = 2

[signals]
sessions = \"veto\"
processes = \"veto\"
accelerator = \"off\"
cpu = \"quorum\"
network = \"quorum\"
disk = \"quorum\"
memory = \"off\"

[thresholds]
cpu_percent = 10
network_kbps = 50
disk_iops = 10
disk_kbps = 100
memory_percent = 90
accelerator_percent = 5

[sessions]
who_command = \"who\"
count_tmux = true
count_ssm = true

[workload]
process_patterns = []

[storage]
data_dir = \"/var/lib/idlewatch\"

[shutdown]
command = \"shutdown\"
args = [\"-h\", \"now\"]
dry_run = false
";

/// Write the default config to `path` unless a file is already there.
/// Returns Ok(true) if the file was written.
pub fn write_default(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    Ok(true)
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Serialize(toml::ser::Error),
    Pattern {
        pattern: String,
        source: regex::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Serialize(source) => write!(f, "failed to render config: {source}"),
            ConfigError::Pattern { pattern, source } => {
                write!(f, "invalid process pattern {pattern:?}: {source}")
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Serialize(source) => Some(source),
            ConfigError::Pattern { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observed_configuration() {
        let config = DetectorConfig::default();
        assert_eq!(config.schedule.interval_secs, 60);
        assert_eq!(config.schedule.grace_period_secs, 300);
        assert_eq!(config.decision.policy, Policy::Quorum);
        assert_eq!(config.decision.quorum, 2);
        assert_eq!(config.decision.idle_threshold, 2);
        assert_eq!(config.signals.quorum_size(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_text_parses_to_defaults() {
        let parsed = DetectorConfig::parse(DEFAULT_CONFIG).unwrap();
        let defaults = DetectorConfig::default();
        assert_eq!(parsed.to_toml().unwrap(), defaults.to_toml().unwrap());
    }

    #[test]
    fn test_default_config_text_lists_every_section() {
        let table: toml::Table = toml::from_str(DEFAULT_CONFIG).unwrap();
        for section in [
            "schedule",
            "decision",
            "signals",
            "thresholds",
            "sessions",
            "workload",
            "storage",
            "shutdown",
        ] {
            assert!(table.contains_key(section), "missing [{section}]");
        }
        assert_eq!(table["sessions"]["who_command"].as_str(), Some("who"));
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let config = DetectorConfig::parse(
            "[decision]\nidle_threshold = 3\n\n[signals]\nmemory = \"quorum\"\n",
        )
        .unwrap();
        assert_eq!(config.decision.idle_threshold, 3);
        assert_eq!(config.decision.quorum, 2);
        assert_eq!(config.signals.memory, SignalRole::Quorum);
        assert_eq!(config.signals.quorum_size(), 4);
        assert_eq!(config.thresholds.cpu_percent, 10);
    }

    #[test]
    fn test_strict_or_policy_parses() {
        let config = DetectorConfig::parse("[decision]\npolicy = \"strict_or\"\n").unwrap();
        assert_eq!(config.decision.policy, Policy::StrictOr);
    }

    #[test]
    fn test_unknown_role_is_parse_error() {
        let err = DetectorConfig::parse("[signals]\ncpu = \"sometimes\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = DetectorConfig::default();
        config.decision.idle_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("idle_threshold"));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = DetectorConfig::default();
        config.schedule.sample_window_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sample_window_ms"));
    }

    #[test]
    fn test_validate_rejects_quorum_larger_than_set() {
        let mut config = DetectorConfig::default();
        config.decision.quorum = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("only 3 signal(s)"));
    }

    #[test]
    fn test_strict_or_ignores_quorum_size() {
        let mut config = DetectorConfig::default();
        config.decision.policy = Policy::StrictOr;
        config.decision.quorum = 7;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut config = DetectorConfig::default();
        config.workload.process_patterns = vec!["python.*train(".to_string()];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Pattern { .. }));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DetectorConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.schedule.interval_secs, 60);
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[schedule\n").unwrap();
        let err = DetectorConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_audit_log_defaults_into_data_dir() {
        let mut config = DetectorConfig::default();
        config.storage.data_dir = PathBuf::from("/tmp/iw");
        assert_eq!(config.audit_log_path(), PathBuf::from("/tmp/iw/audit.log"));
        config.storage.audit_log = Some(PathBuf::from("/var/log/iw.log"));
        assert_eq!(config.audit_log_path(), PathBuf::from("/var/log/iw.log"));
    }

    #[test]
    fn test_write_default_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/config.toml");
        assert!(write_default(&path).unwrap());
        std::fs::write(&path, "[decision]\nquorum = 1\n").unwrap();
        assert!(!write_default(&path).unwrap());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "[decision]\nquorum = 1\n");
    }
}

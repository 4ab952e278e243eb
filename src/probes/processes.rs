/// Workload process detection: compilers, training jobs and the like.
///
/// Patterns are regular expressions matched against each process's full
/// command line, e.g. `cargo (build|test)` or `python.*train`.
use super::{ActivityProbe, Metric, SignalKind, SignalReading, SignalRole};
use crate::config::ConfigError;
use crate::procfs::{HostCounters, ProcessInfo};
use regex::Regex;
use std::sync::Arc;

/// How many matching process names the audit note lists.
const NOTE_LIMIT: usize = 3;

pub struct WorkloadProcessProbe {
    role: SignalRole,
    patterns: Vec<Regex>,
    host: Arc<dyn HostCounters>,
    own_pid: u32,
}

impl WorkloadProcessProbe {
    pub fn new(
        role: SignalRole,
        patterns: &[String],
        host: Arc<dyn HostCounters>,
    ) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::Pattern {
                    pattern: p.clone(),
                    source: e,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            role,
            patterns,
            host,
            own_pid: std::process::id(),
        })
    }

    /// Processes whose command line matches any pattern, excluding ourselves.
    fn matching<'a>(&self, processes: &'a [ProcessInfo]) -> Vec<&'a ProcessInfo> {
        processes
            .iter()
            .filter(|p| p.pid != self.own_pid)
            .filter(|p| self.patterns.iter().any(|re| re.is_match(&p.cmdline)))
            .collect()
    }
}

impl ActivityProbe for WorkloadProcessProbe {
    fn name(&self) -> &str {
        "processes"
    }

    fn sample(&self) -> Vec<SignalReading> {
        if self.patterns.is_empty() {
            return vec![SignalReading::new(
                SignalKind::Processes,
                self.role,
                Metric::Count { value: 0 },
                false,
            )];
        }

        let processes = match self.host.processes() {
            Ok(p) => p,
            Err(e) => {
                return vec![SignalReading::degraded(
                    SignalKind::Processes,
                    self.role,
                    Metric::Count { value: 0 },
                    e.to_string(),
                )]
            }
        };

        let matches = self.matching(&processes);
        for p in &matches {
            tracing::debug!(pid = p.pid, cmdline = %p.cmdline, "workload process matched");
        }
        let reading = SignalReading::new(
            SignalKind::Processes,
            self.role,
            Metric::Count {
                value: matches.len() as u64,
            },
            !matches.is_empty(),
        );
        if matches.is_empty() {
            return vec![reading];
        }
        let mut names: Vec<&str> = matches.iter().map(|p| p.comm.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.truncate(NOTE_LIMIT);
        vec![reading.with_note(names.join(","))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::tests::{fake_proc, fake_process};
    use crate::procfs::ProcFs;

    fn probe(dir: &std::path::Path, patterns: &[&str]) -> WorkloadProcessProbe {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        WorkloadProcessProbe::new(SignalRole::Veto, &patterns, Arc::new(ProcFs::new(dir))).unwrap()
    }

    #[test]
    fn test_no_patterns_is_idle_without_scanning() {
        let probe = probe(std::path::Path::new("/nonexistent"), &[]);
        let readings = probe.sample();
        assert!(!readings[0].active);
        assert!(!readings[0].degraded);
    }

    #[test]
    fn test_matching_process_is_active() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        fake_process(dir.path(), 100, "python3", &["python3", "train.py"]);
        fake_process(dir.path(), 101, "bash", &["-bash"]);

        let readings = probe(dir.path(), &[r"python.*train", r"cargo (build|test)"]).sample();
        assert!(readings[0].active);
        assert_eq!(readings[0].metric, Metric::Count { value: 1 });
        assert_eq!(readings[0].note.as_deref(), Some("python3"));
    }

    #[test]
    fn test_note_lists_each_name_once() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        fake_process(dir.path(), 100, "python3", &["python3", "train.py", "--rank", "0"]);
        fake_process(dir.path(), 101, "rustc", &["rustc", "--crate-name", "train"]);
        fake_process(dir.path(), 102, "python3", &["python3", "train.py", "--rank", "1"]);

        let readings = probe(dir.path(), &[r"train"]).sample();
        assert_eq!(readings[0].metric, Metric::Count { value: 3 });
        assert_eq!(readings[0].note.as_deref(), Some("python3,rustc"));
    }

    #[test]
    fn test_unmatched_processes_are_idle() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        fake_process(dir.path(), 101, "bash", &["-bash"]);

        let readings = probe(dir.path(), &[r"rustc"]).sample();
        assert!(!readings[0].active);
    }

    #[test]
    fn test_own_pid_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        fake_process(
            dir.path(),
            std::process::id(),
            "idlewatch",
            &["idlewatch", "check", "--pattern", "rustc"],
        );
        let readings = probe(dir.path(), &[r"rustc"]).sample();
        assert!(!readings[0].active);
    }

    #[test]
    fn test_unreadable_process_table_fails_toward_active() {
        let readings = probe(std::path::Path::new("/nonexistent"), &["rustc"]).sample();
        assert!(readings[0].active);
        assert!(readings[0].degraded);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let host = Arc::new(ProcFs::new("/proc"));
        let result = WorkloadProcessProbe::new(SignalRole::Veto, &["(".to_string()], host);
        assert!(matches!(result, Err(ConfigError::Pattern { .. })));
    }
}

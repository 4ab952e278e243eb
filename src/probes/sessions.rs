/// Interactive session detection.
///
/// Counts logged-in terminals (`who`), live tmux servers and SSM session
/// workers. Any session at all means someone may be using the host.
use super::{ActivityProbe, Metric, SignalKind, SignalReading, SignalRole};
use crate::config::SessionsConfig;
use crate::procfs::{HostCounters, ProcessInfo};
use std::process::Command;
use std::sync::Arc;

pub struct SessionProbe {
    role: SignalRole,
    who_command: String,
    count_tmux: bool,
    count_ssm: bool,
    host: Arc<dyn HostCounters>,
}

impl SessionProbe {
    pub fn new(role: SignalRole, config: &SessionsConfig, host: Arc<dyn HostCounters>) -> Self {
        Self {
            role,
            who_command: config.who_command.clone(),
            count_tmux: config.count_tmux,
            count_ssm: config.count_ssm,
            host,
        }
    }

    fn count_logins(&self) -> Result<u64, String> {
        let output = Command::new(&self.who_command)
            .output()
            .map_err(|e| format!("failed to run {}: {e}", self.who_command))?;
        if !output.status.success() {
            return Err(format!("{} exited with {}", self.who_command, output.status));
        }
        Ok(count_who_lines(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl ActivityProbe for SessionProbe {
    fn name(&self) -> &str {
        "sessions"
    }

    fn sample(&self) -> Vec<SignalReading> {
        let logins = match self.count_logins() {
            Ok(n) => n,
            Err(reason) => {
                return vec![SignalReading::degraded(
                    SignalKind::Sessions,
                    self.role,
                    Metric::Count { value: 0 },
                    reason,
                )]
            }
        };

        let (mut tmux, mut ssm) = (0, 0);
        if self.count_tmux || self.count_ssm {
            match self.host.processes() {
                Ok(processes) => {
                    if self.count_tmux {
                        tmux = count_tmux_servers(&processes);
                    }
                    if self.count_ssm {
                        ssm = count_ssm_workers(&processes);
                    }
                }
                Err(e) => {
                    return vec![SignalReading::degraded(
                        SignalKind::Sessions,
                        self.role,
                        Metric::Count { value: logins },
                        e.to_string(),
                    )]
                }
            }
        }

        let total = logins + tmux + ssm;
        tracing::debug!(logins, tmux, ssm, "sampled sessions");
        vec![SignalReading::new(
            SignalKind::Sessions,
            self.role,
            Metric::Count { value: total },
            total > 0,
        )
        .with_note(format!("who={logins} tmux={tmux} ssm={ssm}"))]
    }
}

/// One non-empty line of `who` output per login.
pub fn count_who_lines(output: &str) -> u64 {
    output.lines().filter(|l| !l.trim().is_empty()).count() as u64
}

/// A tmux server only stays alive while it has sessions, attached or not.
pub fn count_tmux_servers(processes: &[ProcessInfo]) -> u64 {
    processes
        .iter()
        .filter(|p| p.comm.starts_with("tmux: server"))
        .count() as u64
}

/// SSM Session Manager spawns one worker per remote session.
pub fn count_ssm_workers(processes: &[ProcessInfo]) -> u64 {
    processes
        .iter()
        .filter(|p| {
            p.cmdline
                .split_whitespace()
                .next()
                .is_some_and(|bin| bin.ends_with("ssm-session-worker"))
        })
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::tests::{fake_proc, fake_process};
    use crate::procfs::ProcFs;

    fn probe(dir: &std::path::Path, who: &str) -> SessionProbe {
        let config = SessionsConfig {
            who_command: who.to_string(),
            count_tmux: true,
            count_ssm: true,
        };
        SessionProbe::new(SignalRole::Veto, &config, Arc::new(ProcFs::new(dir)))
    }

    #[test]
    fn test_count_who_lines() {
        let out = "ec2-user pts/0        2026-10-19 09:12 (10.0.0.5)\nroot     tty1         2026-10-19 08:00\n\n";
        assert_eq!(count_who_lines(out), 2);
        assert_eq!(count_who_lines(""), 0);
    }

    #[test]
    fn test_count_tmux_and_ssm() {
        let processes = vec![
            ProcessInfo {
                pid: 10,
                comm: "tmux: server".to_string(),
                cmdline: "tmux new -s work".to_string(),
            },
            ProcessInfo {
                pid: 11,
                comm: "tmux: client".to_string(),
                cmdline: "tmux attach".to_string(),
            },
            ProcessInfo {
                pid: 12,
                comm: "ssm-session-wor".to_string(),
                cmdline: "/usr/bin/ssm-session-worker ec2-user-0a1b2c i-0123".to_string(),
            },
            ProcessInfo {
                pid: 13,
                comm: "grep".to_string(),
                cmdline: "grep ssm-session-worker".to_string(),
            },
        ];
        assert_eq!(count_tmux_servers(&processes), 1);
        assert_eq!(count_ssm_workers(&processes), 1);
    }

    #[test]
    fn test_no_sessions_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        // `true` prints nothing and succeeds: zero logins
        let readings = probe(dir.path(), "true").sample();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].metric, Metric::Count { value: 0 });
        assert!(!readings[0].active);
        assert!(!readings[0].degraded);
    }

    #[test]
    fn test_detached_tmux_session_is_active() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        fake_process(dir.path(), 300, "tmux: server", &["tmux", "new", "-d"]);
        let readings = probe(dir.path(), "true").sample();
        assert!(readings[0].active);
        assert_eq!(readings[0].note.as_deref(), Some("who=0 tmux=1 ssm=0"));
    }

    #[test]
    fn test_missing_who_fails_toward_active() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        let readings = probe(dir.path(), "/nonexistent/who").sample();
        assert!(readings[0].active);
        assert!(readings[0].degraded);
    }

    #[test]
    fn test_failing_who_fails_toward_active() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path());
        let readings = probe(dir.path(), "false").sample();
        assert!(readings[0].active);
        assert!(readings[0].degraded);
    }
}

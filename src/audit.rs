/// Append-only audit log: one line per cycle.
///
/// Each line records the timestamp, every sampled signal with its verdict,
/// the classification and the counter transition. Rotation is left to
/// external tooling.
use crate::decision::{Classification, Decision, Effect};
use crate::probes::SignalReading;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line with a timestamp prefix. Failures are logged, never raised.
    pub fn append(&self, entry: &str) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{timestamp} {entry}\n");
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to append audit line");
        }
    }

    /// Last line written, if any.
    pub fn last_line(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        contents
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(str::to_string)
    }
}

/// Entry for a cycle that ran the decision.
pub fn evaluated_entry(
    uptime: Option<Duration>,
    readings: &[SignalReading],
    decision: &Decision,
) -> String {
    let mut parts = Vec::with_capacity(readings.len() + 4);
    parts.push(uptime_fragment(uptime));
    parts.extend(readings.iter().map(SignalReading::audit_fragment));

    let verdict = match &decision.classification {
        Classification::Active { reasons } => format!("=> active [{}]", reasons.join(",")),
        Classification::Idle {
            idle_votes,
            quorum_size,
            required,
        } => format!("=> idle votes={idle_votes}/{quorum_size} need={required}"),
    };
    parts.push(verdict);
    parts.push(format!(
        "count={}->{}",
        decision.previous.idle_streak, decision.next.idle_streak
    ));
    parts.push(match &decision.effect {
        Some(Effect::Shutdown { .. }) => "action=shutdown".to_string(),
        None => "action=none".to_string(),
    });
    parts.join(" ")
}

/// Entry for a cycle skipped because another cycle holds the lock.
pub fn locked_entry() -> String {
    "=> skipped (lock held)".to_string()
}

/// Entry for a cycle skipped inside the boot grace period.
pub fn grace_entry(uptime: Duration, grace: Duration) -> String {
    format!(
        "{} => skipped (grace period {}s<{}s)",
        uptime_fragment(Some(uptime)),
        uptime.as_secs(),
        grace.as_secs()
    )
}

fn uptime_fragment(uptime: Option<Duration>) -> String {
    match uptime {
        Some(u) => format!("uptime={}s", u.as_secs()),
        None => "uptime=unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::{Metric, SignalKind, SignalRole};
    use crate::state::IdleState;

    fn scenario_a_readings() -> Vec<SignalReading> {
        vec![
            SignalReading::new(
                SignalKind::Sessions,
                SignalRole::Veto,
                Metric::Count { value: 0 },
                false,
            )
            .with_note("who=0 tmux=0 ssm=0"),
            SignalReading::new(
                SignalKind::Cpu,
                SignalRole::Quorum,
                Metric::Percent { value: 2 },
                false,
            ),
            SignalReading::new(
                SignalKind::Network,
                SignalRole::Quorum,
                Metric::Throughput {
                    kbps: 5,
                    interface: Some("eth0".to_string()),
                },
                false,
            ),
            SignalReading::new(
                SignalKind::Disk,
                SignalRole::Quorum,
                Metric::DiskIo { iops: 1, kbps: 3 },
                false,
            ),
        ]
    }

    #[test]
    fn test_evaluated_entry_lists_every_signal() {
        let decision = Decision {
            classification: Classification::Idle {
                idle_votes: 3,
                quorum_size: 3,
                required: 2,
            },
            previous: IdleState { idle_streak: 0 },
            next: IdleState { idle_streak: 1 },
            effect: None,
        };
        let entry = evaluated_entry(
            Some(Duration::from_secs(400)),
            &scenario_a_readings(),
            &decision,
        );
        assert_eq!(
            entry,
            "uptime=400s sessions=0{who=0 tmux=0 ssm=0}(idle) cpu=2%(idle) \
             network=5KB/s[eth0](idle) disk=1iops/3KB/s(idle) \
             => idle votes=3/3 need=2 count=0->1 action=none"
        );
    }

    #[test]
    fn test_evaluated_entry_active_with_shutdown_reset() {
        let decision = Decision {
            classification: Classification::Active {
                reasons: vec!["sessions".to_string()],
            },
            previous: IdleState { idle_streak: 1 },
            next: IdleState { idle_streak: 0 },
            effect: None,
        };
        let entry = evaluated_entry(None, &[], &decision);
        assert_eq!(entry, "uptime=unknown => active [sessions] count=1->0 action=none");
    }

    #[test]
    fn test_grace_entry() {
        assert_eq!(
            grace_entry(Duration::from_secs(120), Duration::from_secs(300)),
            "uptime=120s => skipped (grace period 120s<300s)"
        );
    }

    #[test]
    fn test_append_and_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));
        assert_eq!(log.last_line(), None);

        log.append("first");
        log.append(&locked_entry());

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let last = log.last_line().unwrap();
        assert!(last.ends_with(" => skipped (lock held)"));
        // "YYYY-MM-DD HH:MM:SS " prefix
        assert_eq!(&last[4..5], "-");
        assert_eq!(&last[19..20], " ");
    }

    #[test]
    fn test_append_to_unwritable_path_does_not_panic() {
        let log = AuditLog::new(PathBuf::from("/nonexistent/dir/audit.log"));
        log.append("ignored");
        assert_eq!(log.last_line(), None);
    }
}

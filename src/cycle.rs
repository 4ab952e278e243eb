/// One evaluation cycle: lock, grace check, sample, decide, persist, audit.
///
/// A cycle never fails. Every branch ends in a `CycleOutcome`; sampling
/// problems are already folded into degraded readings by the probes, and
/// state or audit write failures are logged.
use crate::audit::{self, AuditLog};
use crate::config::{ConfigError, DecisionConfig, DetectorConfig};
use crate::data_dir::DataDir;
use crate::decision::{decide, Decision, Effect};
use crate::lock::CycleLock;
use crate::probes::{build_probes, ActivityProbe, SignalReading};
use crate::procfs::{HostCounters, ProcFs};
use crate::shutdown::PowerOff;
use crate::state::{FileStateStore, IdleState, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What happened in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle held the lock; nothing was touched.
    Locked,
    /// Host is still inside the boot grace period; nothing was touched.
    GracePeriod { uptime: Duration },
    Evaluated(Decision),
}

pub struct Detector {
    decision: DecisionConfig,
    grace_period: Duration,
    lock_path: PathBuf,
    store: Box<dyn StateStore>,
    host: Arc<dyn HostCounters>,
    probes: Vec<Box<dyn ActivityProbe>>,
    audit: AuditLog,
}

impl Detector {
    /// Detector reading the live host through procfs and persisting to the data dir.
    pub fn from_config(config: &DetectorConfig) -> Result<Self, ConfigError> {
        let host: Arc<dyn HostCounters> = Arc::new(ProcFs::new(config.storage.proc_root.clone()));
        let probes = build_probes(config, Arc::clone(&host))?;
        let data_dir = DataDir::new(&config.storage.data_dir);
        let store = Box::new(FileStateStore::new(data_dir.idle_streak()));
        Ok(Self::new(config, host, probes, store))
    }

    pub fn new(
        config: &DetectorConfig,
        host: Arc<dyn HostCounters>,
        probes: Vec<Box<dyn ActivityProbe>>,
        store: Box<dyn StateStore>,
    ) -> Self {
        let data_dir = DataDir::new(&config.storage.data_dir);
        Self {
            decision: config.decision.clone(),
            grace_period: config.schedule.grace_period(),
            lock_path: data_dir.lock(),
            store,
            host,
            probes,
            audit: AuditLog::new(config.audit_log_path()),
        }
    }

    /// Run one cycle. The returned decision may carry a shutdown effect for
    /// the caller to execute.
    pub fn run_cycle(&self) -> CycleOutcome {
        let _lock = match CycleLock::try_acquire(&self.lock_path) {
            Ok(Some(lock)) => {
                tracing::debug!(path = %lock.path().display(), "cycle lock acquired");
                lock
            }
            Ok(None) => {
                tracing::info!("previous cycle still running, skipping");
                self.audit.append(&audit::locked_entry());
                return CycleOutcome::Locked;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot take cycle lock, skipping");
                return CycleOutcome::Locked;
            }
        };

        let uptime = match self.host.uptime() {
            Ok(u) => Some(u),
            Err(e) => {
                tracing::warn!(error = %e, "uptime unavailable, skipping grace check");
                None
            }
        };
        if let Some(uptime) = uptime {
            if uptime < self.grace_period {
                tracing::info!(
                    uptime_secs = uptime.as_secs(),
                    grace_secs = self.grace_period.as_secs(),
                    "inside boot grace period, skipping"
                );
                self.audit
                    .append(&audit::grace_entry(uptime, self.grace_period));
                return CycleOutcome::GracePeriod { uptime };
            }
        }

        let state = self.store.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load idle streak, starting from 0");
            IdleState::default()
        });

        let mut readings: Vec<SignalReading> = Vec::new();
        for probe in &self.probes {
            let sampled = probe.sample();
            tracing::debug!(probe = probe.name(), readings = sampled.len(), "probe sampled");
            readings.extend(sampled);
        }
        let decision = decide(&self.decision, state, &readings);

        if let Err(e) = self.store.save(decision.next) {
            tracing::error!(error = %e, "failed to persist idle streak");
        }
        self.audit
            .append(&audit::evaluated_entry(uptime, &readings, &decision));

        tracing::info!(
            idle = decision.classification.is_idle(),
            idle_streak = decision.next.idle_streak,
            threshold = self.decision.idle_threshold,
            "cycle evaluated"
        );
        CycleOutcome::Evaluated(decision)
    }
}

/// A cycle's outcome and whether its shutdown effect was carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleRun {
    pub outcome: CycleOutcome,
    /// The power-off command was issued; no further cycle should run.
    pub powered_off: bool,
}

/// Run one cycle and execute any shutdown effect it produced.
pub fn run_once(detector: &Detector, power_off: &dyn PowerOff) -> CycleRun {
    let outcome = detector.run_cycle();
    let mut powered_off = false;
    if let CycleOutcome::Evaluated(Decision {
        effect: Some(Effect::Shutdown { reason }),
        ..
    }) = &outcome
    {
        match power_off.power_off(reason) {
            Ok(()) => powered_off = true,
            Err(e) => {
                tracing::error!(error = %e, "shutdown failed; will retry on the next idle cycle")
            }
        }
    }
    CycleRun {
        outcome,
        powered_off,
    }
}

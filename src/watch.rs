/// In-process scheduler for hosts without a timer service.
///
/// Each tick runs one synchronous cycle on a blocking task. The cycle lock
/// still guards every cycle, so `watch` can coexist with timer-driven
/// `check` runs. Stops on SIGINT or SIGTERM, or once the shutdown command
/// has been issued.
use crate::cycle::{run_once, CycleOutcome, CycleRun, Detector};
use crate::shutdown::PowerOff;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Counts of cycle outcomes over one `watch` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub cycles: u64,
    pub skipped: u64,
    pub idle: u64,
    pub active: u64,
    pub shutdowns: u64,
}

impl WatchSummary {
    fn record(&mut self, run: &CycleRun) {
        self.cycles += 1;
        if run.powered_off {
            self.shutdowns += 1;
        }
        match &run.outcome {
            CycleOutcome::Locked | CycleOutcome::GracePeriod { .. } => self.skipped += 1,
            CycleOutcome::Evaluated(decision) => {
                if decision.classification.is_idle() {
                    self.idle += 1;
                } else {
                    self.active += 1;
                }
            }
        }
    }
}

/// Run cycles every `every` until SIGINT, SIGTERM or power-off.
pub async fn run(detector: Detector, power_off: Box<dyn PowerOff>, every: Duration) -> WatchSummary {
    run_until(detector, power_off.into(), every, shutdown_signal()).await
}

/// Run cycles every `every` until `stop` resolves or a shutdown goes through.
/// A failed shutdown keeps the loop running so the next idle cycle retries.
/// The first cycle runs immediately.
pub async fn run_until(
    detector: Detector,
    power_off: Arc<dyn PowerOff>,
    every: Duration,
    stop: impl Future<Output = ()>,
) -> WatchSummary {
    let detector = Arc::new(detector);
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(stop);

    tracing::info!(interval_secs = every.as_secs(), "watching for idle host");
    let mut summary = WatchSummary::default();
    loop {
        tokio::select! {
            biased;
            () = &mut stop => break,
            _ = ticker.tick() => {}
        }

        let detector = Arc::clone(&detector);
        let power_off = Arc::clone(&power_off);
        match tokio::task::spawn_blocking(move || run_once(&detector, power_off.as_ref())).await {
            Ok(run) => {
                summary.record(&run);
                if run.powered_off {
                    tracing::info!("shutdown issued, no further cycles");
                    break;
                }
            }
            Err(e) => tracing::error!(error = %e, "cycle task failed"),
        }
    }

    tracing::info!(
        cycles = summary.cycles,
        idle = summary.idle,
        active = summary.active,
        skipped = summary.skipped,
        shutdowns = summary.shutdowns,
        "watch stopped"
    );
    summary
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, stopping"),
        () = terminate => tracing::info!("received SIGTERM, stopping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::probes::resource::tests::ScriptedHost;
    use crate::shutdown::ShutdownError;
    use crate::state::{IdleState, MemoryStateStore};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingPowerOff(Mutex<u32>);

    impl PowerOff for CountingPowerOff {
        fn power_off(&self, _reason: &str) -> Result<(), ShutdownError> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// Detector with no probes: every evaluated cycle is idle.
    fn quiet_detector(dir: &std::path::Path, uptime_secs: u64) -> Detector {
        let mut config = DetectorConfig::default();
        config.storage.data_dir = dir.to_path_buf();
        let mut host = ScriptedHost::default();
        host.uptime = Some(Duration::from_secs(uptime_secs));
        Detector::new(
            &config,
            Arc::new(host),
            Vec::new(),
            Box::new(MemoryStateStore::new(IdleState::default())),
        )
    }

    #[tokio::test]
    async fn test_stops_after_single_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let power = Arc::new(CountingPowerOff::default());
        let summary = run_until(
            quiet_detector(dir.path(), 400),
            power.clone(),
            Duration::from_millis(20),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;

        // Streak reaches the threshold of 2 on the second cycle
        assert_eq!(summary.cycles, 2, "{summary:?}");
        assert_eq!(summary.idle, 2);
        assert_eq!(summary.shutdowns, 1);
        assert_eq!(*power.0.lock().unwrap(), 1);

        let audit = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        assert_eq!(audit.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_failed_shutdown_keeps_watching() {
        struct FailingPowerOff(Mutex<u32>);
        impl PowerOff for FailingPowerOff {
            fn power_off(&self, _reason: &str) -> Result<(), ShutdownError> {
                *self.0.lock().unwrap() += 1;
                Err(ShutdownError::Spawn {
                    command: "shutdown".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let power = Arc::new(FailingPowerOff(Mutex::new(0)));
        let summary = run_until(
            quiet_detector(dir.path(), 400),
            power.clone(),
            Duration::from_millis(20),
            tokio::time::sleep(Duration::from_millis(150)),
        )
        .await;

        assert!(summary.cycles >= 3, "{summary:?}");
        assert_eq!(summary.shutdowns, 0);
        // Every idle cycle from the second on retries
        assert_eq!(*power.0.lock().unwrap() as u64, summary.cycles - 1);
    }

    #[tokio::test]
    async fn test_grace_period_cycles_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let power = Arc::new(CountingPowerOff::default());
        let summary = run_until(
            quiet_detector(dir.path(), 10),
            power.clone(),
            Duration::from_millis(20),
            tokio::time::sleep(Duration::from_millis(70)),
        )
        .await;

        assert!(summary.cycles >= 1);
        assert_eq!(summary.skipped, summary.cycles);
        assert_eq!(*power.0.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_before_first_tick_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_until(
            quiet_detector(dir.path(), 400),
            Arc::new(CountingPowerOff::default()),
            Duration::from_secs(60),
            std::future::ready(()),
        )
        .await;
        assert_eq!(summary, WatchSummary::default());
    }
}

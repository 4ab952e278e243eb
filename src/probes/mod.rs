pub mod accelerator;
pub mod processes;
pub mod resource;
pub mod sessions;

use crate::config::{ConfigError, DetectorConfig};
use crate::procfs::HostCounters;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Every signal the detector knows how to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Sessions,
    Processes,
    Accelerator,
    Cpu,
    Network,
    Disk,
    Memory,
}

impl SignalKind {
    pub const ALL: [SignalKind; 7] = [
        SignalKind::Sessions,
        SignalKind::Processes,
        SignalKind::Accelerator,
        SignalKind::Cpu,
        SignalKind::Network,
        SignalKind::Disk,
        SignalKind::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Sessions => "sessions",
            SignalKind::Processes => "processes",
            SignalKind::Accelerator => "accelerator",
            SignalKind::Cpu => "cpu",
            SignalKind::Network => "network",
            SignalKind::Disk => "disk",
            SignalKind::Memory => "memory",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a signal takes part in the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalRole {
    /// Any activity forces the cycle active.
    Veto,
    /// Votes on idleness; a quorum of idle votes is required.
    Quorum,
    /// Not sampled.
    Off,
}

impl SignalRole {
    /// Direction a signal resolves to when its source cannot be read.
    /// Vetoes fail toward active, everything else toward idle.
    pub fn fails_active(&self) -> bool {
        matches!(self, SignalRole::Veto)
    }
}

/// Raw value behind a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    Count { value: u64 },
    Percent { value: u64 },
    Throughput { kbps: u64, interface: Option<String> },
    DiskIo { iops: u64, kbps: u64 },
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Count { value } => write!(f, "{value}"),
            Metric::Percent { value } => write!(f, "{value}%"),
            Metric::Throughput { kbps, interface } => match interface {
                Some(iface) => write!(f, "{kbps}KB/s[{iface}]"),
                None => write!(f, "{kbps}KB/s"),
            },
            Metric::DiskIo { iops, kbps } => write!(f, "{iops}iops/{kbps}KB/s"),
        }
    }
}

/// Typed verdict plus raw metric produced by a probe for one signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalReading {
    pub kind: SignalKind,
    pub role: SignalRole,
    pub metric: Metric,
    pub active: bool,
    /// The source could not be read; `active` follows the role's failure direction.
    pub degraded: bool,
    pub note: Option<String>,
}

impl SignalReading {
    pub fn new(kind: SignalKind, role: SignalRole, metric: Metric, active: bool) -> Self {
        Self {
            kind,
            role,
            metric,
            active,
            degraded: false,
            note: None,
        }
    }

    /// Reading for a signal whose source failed.
    pub fn degraded(kind: SignalKind, role: SignalRole, metric: Metric, reason: String) -> Self {
        tracing::warn!(signal = %kind, %reason, "signal unavailable, using safe default");
        Self {
            kind,
            role,
            metric,
            active: role.fails_active(),
            degraded: true,
            note: Some(reason),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// `cpu=8%(idle)` style fragment for the audit log.
    pub fn audit_fragment(&self) -> String {
        let verdict = match (self.active, self.degraded) {
            (true, false) => "active",
            (false, false) => "idle",
            (true, true) => "active,degraded",
            (false, true) => "idle,degraded",
        };
        match &self.note {
            Some(note) if !self.degraded => {
                format!("{}={}{{{}}}({verdict})", self.kind, self.metric, note)
            }
            _ => format!("{}={}({verdict})", self.kind, self.metric),
        }
    }
}

/// One source of activity evidence.
///
/// A probe samples the host and returns a typed reading per signal it owns.
/// Sampling never fails outright: unreadable sources come back as degraded
/// readings so the decision always sees every configured signal.
pub trait ActivityProbe: Send + Sync {
    /// Human-readable probe name (e.g., "sessions", "resource").
    fn name(&self) -> &str;

    fn sample(&self) -> Vec<SignalReading>;
}

/// Build the probes for every signal whose role is not `off`.
pub fn build_probes(
    config: &DetectorConfig,
    host: Arc<dyn HostCounters>,
) -> Result<Vec<Box<dyn ActivityProbe>>, ConfigError> {
    let signals = &config.signals;
    let mut probes: Vec<Box<dyn ActivityProbe>> = Vec::new();

    if signals.sessions != SignalRole::Off {
        probes.push(Box::new(sessions::SessionProbe::new(
            signals.sessions,
            &config.sessions,
            Arc::clone(&host),
        )));
    }
    if signals.processes != SignalRole::Off {
        probes.push(Box::new(processes::WorkloadProcessProbe::new(
            signals.processes,
            &config.workload.process_patterns,
            Arc::clone(&host),
        )?));
    }
    if signals.accelerator != SignalRole::Off {
        probes.push(Box::new(accelerator::AcceleratorProbe::new(
            signals.accelerator,
            config.thresholds.accelerator_percent,
        )));
    }
    let resource = resource::ResourceProbe::new(config, host);
    if resource.has_signals() {
        probes.push(Box::new(resource));
    }

    Ok(probes)
}

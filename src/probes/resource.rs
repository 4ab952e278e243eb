/// CPU, network, disk and memory sampling.
///
/// CPU is measured over its own window; network and disk share a second one.
/// Rates are normalized to per-second values over the configured window.
use super::{ActivityProbe, Metric, SignalKind, SignalReading, SignalRole};
use crate::config::{DetectorConfig, ThresholdsConfig};
use crate::procfs::{cpu_busy_percent, HostCounters};
use std::sync::Arc;
use std::time::Duration;

pub struct ResourceProbe {
    host: Arc<dyn HostCounters>,
    window: Duration,
    sleep: fn(Duration),
    thresholds: ThresholdsConfig,
    interface: Option<String>,
    cpu: SignalRole,
    network: SignalRole,
    disk: SignalRole,
    memory: SignalRole,
}

impl ResourceProbe {
    pub fn new(config: &DetectorConfig, host: Arc<dyn HostCounters>) -> Self {
        Self {
            host,
            window: config.schedule.sample_window(),
            sleep: std::thread::sleep,
            thresholds: config.thresholds.clone(),
            interface: config.workload.interface.clone(),
            cpu: config.signals.cpu,
            network: config.signals.network,
            disk: config.signals.disk,
            memory: config.signals.memory,
        }
    }

    /// Whether any resource signal is enabled.
    pub fn has_signals(&self) -> bool {
        [self.cpu, self.network, self.disk, self.memory]
            .iter()
            .any(|role| *role != SignalRole::Off)
    }

    #[cfg(test)]
    pub(crate) fn without_sleep(mut self) -> Self {
        self.sleep = |_| {};
        self
    }

    fn window_ms(&self) -> u64 {
        (self.window.as_millis() as u64).max(1)
    }

    fn per_second(&self, delta: u64) -> u64 {
        delta.saturating_mul(1000) / self.window_ms()
    }

    fn sample_cpu(&self) -> SignalReading {
        let before = self.host.cpu_ticks();
        (self.sleep)(self.window);
        let after = self.host.cpu_ticks();
        match (before, after) {
            (Ok(before), Ok(after)) => {
                let busy = cpu_busy_percent(before, after);
                SignalReading::new(
                    SignalKind::Cpu,
                    self.cpu,
                    Metric::Percent { value: busy },
                    busy >= self.thresholds.cpu_percent,
                )
            }
            (Err(e), _) | (_, Err(e)) => SignalReading::degraded(
                SignalKind::Cpu,
                self.cpu,
                Metric::Percent { value: 0 },
                e.to_string(),
            ),
        }
    }

    fn sample_io(&self) -> Vec<SignalReading> {
        let want_net = self.network != SignalRole::Off;
        let want_disk = self.disk != SignalRole::Off;

        let iface = if want_net {
            match &self.interface {
                Some(name) => Ok(name.clone()),
                None => self.host.primary_interface().map_err(|e| e.to_string()),
            }
        } else {
            Err(String::new())
        };
        let net_before = iface
            .as_ref()
            .map_err(Clone::clone)
            .and_then(|name| self.host.interface_bytes(name).map_err(|e| e.to_string()));
        let disk_before = want_disk.then(|| self.host.disk_totals());

        (self.sleep)(self.window);

        let mut readings = Vec::new();
        if want_net {
            let net_after = iface
                .as_ref()
                .map_err(Clone::clone)
                .and_then(|name| self.host.interface_bytes(name).map_err(|e| e.to_string()));
            readings.push(match (net_before, net_after) {
                (Ok(before), Ok(after)) => {
                    let kbps = self.per_second(after.saturating_sub(before)) / 1024;
                    SignalReading::new(
                        SignalKind::Network,
                        self.network,
                        Metric::Throughput {
                            kbps,
                            interface: iface.ok(),
                        },
                        kbps >= self.thresholds.network_kbps,
                    )
                }
                (Err(e), _) | (_, Err(e)) => SignalReading::degraded(
                    SignalKind::Network,
                    self.network,
                    Metric::Throughput {
                        kbps: 0,
                        interface: iface.ok(),
                    },
                    e,
                ),
            });
        }
        if let Some(disk_before) = disk_before {
            let disk_after = self.host.disk_totals();
            readings.push(match (disk_before, disk_after) {
                (Ok(before), Ok(after)) => {
                    let iops = self.per_second(after.ios.saturating_sub(before.ios));
                    // 512-byte sectors
                    let kbps = self.per_second(after.sectors.saturating_sub(before.sectors)) / 2;
                    SignalReading::new(
                        SignalKind::Disk,
                        self.disk,
                        Metric::DiskIo { iops, kbps },
                        iops >= self.thresholds.disk_iops || kbps >= self.thresholds.disk_kbps,
                    )
                }
                (Err(e), _) | (_, Err(e)) => SignalReading::degraded(
                    SignalKind::Disk,
                    self.disk,
                    Metric::DiskIo { iops: 0, kbps: 0 },
                    e.to_string(),
                ),
            });
        }
        readings
    }

    fn sample_memory(&self) -> SignalReading {
        match self.host.memory() {
            Ok(mem) => {
                let used = mem.used_percent();
                SignalReading::new(
                    SignalKind::Memory,
                    self.memory,
                    Metric::Percent { value: used },
                    used >= self.thresholds.memory_percent,
                )
            }
            Err(e) => SignalReading::degraded(
                SignalKind::Memory,
                self.memory,
                Metric::Percent { value: 0 },
                e.to_string(),
            ),
        }
    }
}

impl ActivityProbe for ResourceProbe {
    fn name(&self) -> &str {
        "resource"
    }

    fn sample(&self) -> Vec<SignalReading> {
        let mut readings = Vec::new();
        if self.cpu != SignalRole::Off {
            readings.push(self.sample_cpu());
        }
        if self.network != SignalRole::Off || self.disk != SignalRole::Off {
            readings.extend(self.sample_io());
        }
        if self.memory != SignalRole::Off {
            readings.push(self.sample_memory());
        }
        readings
    }
}

/// GPU utilization via `nvidia-smi`.
///
/// A host without the tool has no accelerator to keep busy, which reads as 0%.
use super::{ActivityProbe, Metric, SignalKind, SignalReading, SignalRole};
use std::process::Command;

pub struct AcceleratorProbe {
    role: SignalRole,
    threshold_percent: u64,
    command: String,
}

impl AcceleratorProbe {
    pub fn new(role: SignalRole, threshold_percent: u64) -> Self {
        Self {
            role,
            threshold_percent,
            command: "nvidia-smi".to_string(),
        }
    }

    #[cfg(test)]
    fn with_command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }

    fn reading(&self, percent: u64) -> SignalReading {
        SignalReading::new(
            SignalKind::Accelerator,
            self.role,
            Metric::Percent { value: percent },
            percent >= self.threshold_percent,
        )
    }
}

impl ActivityProbe for AcceleratorProbe {
    fn name(&self) -> &str {
        "accelerator"
    }

    fn sample(&self) -> Vec<SignalReading> {
        let output = Command::new(&self.command)
            .args([
                "--query-gpu=utilization.gpu",
                "--format=csv,noheader,nounits",
            ])
            .output();
        let output = match output {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return vec![self.reading(0).with_note("none")];
            }
            Err(e) => {
                return vec![SignalReading::degraded(
                    SignalKind::Accelerator,
                    self.role,
                    Metric::Percent { value: 0 },
                    format!("failed to run {}: {e}", self.command),
                )]
            }
        };
        if !output.status.success() {
            return vec![SignalReading::degraded(
                SignalKind::Accelerator,
                self.role,
                Metric::Percent { value: 0 },
                format!("{} exited with {}", self.command, output.status),
            )];
        }
        match parse_max_utilization(&String::from_utf8_lossy(&output.stdout)) {
            Some(percent) => vec![self.reading(percent)],
            None => vec![SignalReading::degraded(
                SignalKind::Accelerator,
                self.role,
                Metric::Percent { value: 0 },
                format!("unparseable {} output", self.command),
            )],
        }
    }
}

/// Highest per-device utilization, one integer per line.
pub fn parse_max_utilization(output: &str) -> Option<u64> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?
        .into_iter()
        .max()
}

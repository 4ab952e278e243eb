/// systemd service and timer units for timer-driven `check` runs.
use crate::config::DetectorConfig;
use std::path::Path;

pub const SERVICE_NAME: &str = "idlewatch.service";
pub const TIMER_NAME: &str = "idlewatch.timer";

/// Rendered unit file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemdUnits {
    pub service: String,
    pub timer: String,
}

/// Render both units for the configured schedule.
///
/// The first run waits out the boot grace period; later runs follow the
/// interval measured from the previous activation.
pub fn render(config: &DetectorConfig, binary: &Path, config_path: &Path) -> SystemdUnits {
    let service = format!(
        "[Unit]
Description=Power off the host once it has been idle
After=network.target

[Service]
Type=oneshot
ExecStart={binary} --config {config} check
StandardOutput=journal
StandardError=journal
",
        binary = binary.display(),
        config = config_path.display(),
    );

    let timer = format!(
        "[Unit]
Description=Periodic idle check

[Timer]
OnBootSec={grace}s
OnUnitActiveSec={interval}s
AccuracySec=1s
Unit={SERVICE_NAME}

[Install]
WantedBy=timers.target
",
        grace = config.schedule.grace_period_secs,
        interval = config.schedule.interval_secs,
    );

    SystemdUnits { service, timer }
}

impl std::fmt::Display for SystemdUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "# {SERVICE_NAME}")?;
        writeln!(f, "{}", self.service)?;
        writeln!(f, "# {TIMER_NAME}")?;
        write!(f, "{}", self.timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_runs_check_once() {
        let units = render(
            &DetectorConfig::default(),
            Path::new("/usr/local/bin/idlewatch"),
            Path::new("/etc/idlewatch/config.toml"),
        );
        assert!(units.service.contains("Type=oneshot"));
        assert!(units
            .service
            .contains("ExecStart=/usr/local/bin/idlewatch --config /etc/idlewatch/config.toml check"));
    }

    #[test]
    fn test_timer_follows_schedule() {
        let mut config = DetectorConfig::default();
        config.schedule.interval_secs = 120;
        config.schedule.grace_period_secs = 600;
        let units = render(&config, Path::new("idlewatch"), Path::new("c.toml"));
        assert!(units.timer.contains("OnBootSec=600s\n"));
        assert!(units.timer.contains("OnUnitActiveSec=120s\n"));
        assert!(units.timer.contains("AccuracySec=1s\n"));
        assert!(units.timer.contains("Unit=idlewatch.service\n"));
    }

    #[test]
    fn test_display_labels_both_units() {
        let units = render(
            &DetectorConfig::default(),
            Path::new("idlewatch"),
            Path::new("c.toml"),
        );
        let text = units.to_string();
        let service_at = text.find("# idlewatch.service").unwrap();
        let timer_at = text.find("# idlewatch.timer").unwrap();
        assert!(service_at < timer_at);
        assert!(text.contains("OnBootSec=300s"));
    }
}

/// Terminal power-off action.
///
/// Fire-and-forget: the command is spawned and never waited on, since the
/// host tears down this process as part of shutting down.
use crate::config::ShutdownConfig;
use std::process::{Command, Stdio};

/// Executes the shutdown effect returned by a decision.
pub trait PowerOff: Send + Sync {
    fn power_off(&self, reason: &str) -> Result<(), ShutdownError>;
}

/// Runs the configured shutdown command with the reason as final argument.
#[derive(Debug, Clone)]
pub struct CommandPowerOff {
    command: String,
    args: Vec<String>,
}

impl CommandPowerOff {
    pub fn new(config: &ShutdownConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }
}

impl PowerOff for CommandPowerOff {
    fn power_off(&self, reason: &str) -> Result<(), ShutdownError> {
        tracing::warn!(command = %self.command, args = ?self.args, %reason, "powering off host");
        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(reason)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| ShutdownError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;
        tracing::info!(pid = child.id(), "shutdown command started");
        Ok(())
    }
}

/// Logs the shutdown that would have happened.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunPowerOff;

impl PowerOff for DryRunPowerOff {
    fn power_off(&self, reason: &str) -> Result<(), ShutdownError> {
        tracing::warn!(%reason, "dry run: would power off host");
        Ok(())
    }
}

/// Pick the executor for the configured mode.
pub fn from_config(config: &ShutdownConfig) -> Box<dyn PowerOff> {
    if config.dry_run {
        Box::new(DryRunPowerOff)
    } else {
        Box::new(CommandPowerOff::new(config))
    }
}

/// Errors from starting the shutdown command.
#[derive(Debug)]
pub enum ShutdownError {
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::Spawn { command, source } => {
                write!(f, "failed to run shutdown command {command}: {source}")
            }
        }
    }
}

impl std::error::Error for ShutdownError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShutdownError::Spawn { source, .. } => Some(source),
        }
    }
}

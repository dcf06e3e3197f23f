//! Launching external collaborator processes.

use anyhow::{anyhow, Result};
use engine_core::ResourceAssignment;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::cancel::CancelToken;

/// Environment variable carrying the device assignment to child processes
pub const DEVICE_ENV: &str = "EVOLVE_DEVICE";

/// A parsed command line: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Split a command line on whitespace. Quoting is not supported.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("command line is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Build the process for `device`. The child is killed if its handle is
    /// dropped, so an abandoned job never outlives the evolver.
    pub fn command(&self, device: ResourceAssignment) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(DEVICE_ENV, device.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match device {
            ResourceAssignment::General => {
                command.env("CUDA_VISIBLE_DEVICES", "-1");
            }
            ResourceAssignment::Accelerated => {
                if std::env::var("CUDA_VISIBLE_DEVICES").as_deref() == Ok("-1") {
                    command.env_remove("CUDA_VISIBLE_DEVICES");
                }
            }
        }
        command
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a supervised child ended.
#[derive(Debug)]
pub enum ChildExit {
    Exited(ExitStatus),
    Cancelled,
}

/// Wait for `child`, killing it if `cancel` fires first.
pub async fn supervise(mut child: Child, cancel: &CancelToken) -> Result<ChildExit> {
    tokio::select! {
        status = child.wait() => Ok(ChildExit::Exited(status?)),
        _ = cancel.cancelled() => {
            debug!(pid = ?child.id(), "Cancellation requested, killing child process");
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill child process: {}", e);
            }
            let _ = child.wait().await;
            Ok(ChildExit::Cancelled)
        }
    }
}

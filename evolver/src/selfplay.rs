//! Self-play engine contract and the process-launching adapter.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use engine_core::ResourceAssignment;
use tracing::info;

use crate::cancel::CancelToken;
use crate::process::{supervise, ChildExit, CommandLine};

/// A job that writes game-record files until cancelled or done.
///
/// `run` returns `Ok(())` when the job exits cleanly or is cancelled, and an
/// error when it cannot start or fails on its own.
#[async_trait]
pub trait SelfPlayEngine: Send + Sync {
    async fn run(&self, device: ResourceAssignment, cancel: CancelToken) -> Result<()>;
}

/// Runs an external self-play program.
#[derive(Debug, Clone)]
pub struct CommandSelfPlay {
    command: CommandLine,
}

impl CommandSelfPlay {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

#[async_trait]
impl SelfPlayEngine for CommandSelfPlay {
    async fn run(&self, device: ResourceAssignment, cancel: CancelToken) -> Result<()> {
        info!(command = %self.command.display(), device = %device, "Launching self-play");

        let child = self
            .command
            .command(device)
            .spawn()
            .with_context(|| format!("failed to launch self-play '{}'", self.command.program))?;

        match supervise(child, &cancel).await? {
            ChildExit::Cancelled => Ok(()),
            ChildExit::Exited(status) if status.success() => Ok(()),
            ChildExit::Exited(status) => Err(anyhow!("self-play exited with {}", status)),
        }
    }
}

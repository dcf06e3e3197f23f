//! Evaluator contract and the process-launching adapter.
//!
//! An evaluator compares `best` against `candidate` and may promote the
//! candidate. External evaluators promote through the store (for example by
//! running `evolver promote`); promotion is detected from the `best` digest.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use engine_core::ResourceAssignment;
use model_store::{short, CheckpointStore, Role};
use tracing::info;

use crate::cancel::CancelToken;
use crate::process::{supervise, ChildExit, CommandLine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationReport {
    pub promoted: bool,
    /// Digest of `best` after evaluation
    pub best_digest: Option<String>,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        device: ResourceAssignment,
        cancel: CancelToken,
    ) -> Result<EvaluationReport>;
}

/// Runs an external evaluator to completion.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    command: CommandLine,
    store: CheckpointStore,
}

impl CommandEvaluator {
    pub fn new(command: CommandLine, store: CheckpointStore) -> Self {
        Self { command, store }
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn evaluate(
        &self,
        device: ResourceAssignment,
        cancel: CancelToken,
    ) -> Result<EvaluationReport> {
        if !self.store.exists(Role::Candidate) {
            return Err(anyhow!("no candidate checkpoint to evaluate"));
        }
        let before = self.store.digest(Role::Best)?;

        info!(command = %self.command.display(), device = %device, "Launching evaluation");
        let child = self
            .command
            .command(device)
            .spawn()
            .with_context(|| format!("failed to launch evaluator '{}'", self.command.program))?;

        match supervise(child, &cancel).await? {
            ChildExit::Cancelled => return Err(anyhow!("evaluation interrupted")),
            ChildExit::Exited(status) if !status.success() => {
                return Err(anyhow!("evaluator exited with {}", status));
            }
            ChildExit::Exited(_) => {}
        }

        let after = self.store.digest(Role::Best)?;
        let promoted = after.is_some() && after != before;
        if let Some(digest) = after.as_deref() {
            info!(promoted, best = %short(digest), "Evaluation finished");
        }
        Ok(EvaluationReport {
            promoted,
            best_digest: after,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use engine_core::{ComputeContext, NetError, PolicyValueNet, TrainingBatch};
    use std::path::Path;
    use tempfile::tempdir;

    struct Fixed(&'static str);

    impl PolicyValueNet for Fixed {
        fn build(&mut self) {}
        fn is_built(&self) -> bool {
            true
        }
        fn save(&self, config_path: &Path, weight_path: &Path) -> Result<(), NetError> {
            std::fs::write(config_path, b"{}")?;
            std::fs::write(weight_path, self.0)?;
            Ok(())
        }
        fn load(&mut self, _: &Path, _: &Path) -> Result<bool, NetError> {
            Ok(true)
        }
        fn train(&mut self, _: &TrainingBatch, _: usize, _: u32) -> Result<u64, NetError> {
            Ok(0)
        }
        fn learning_rate(&self) -> f64 {
            0.0
        }
        fn set_learning_rate(&mut self, _: f64) {}
        fn bind_context(&mut self, _: ComputeContext) -> Result<(), NetError> {
            Ok(())
        }
    }

    fn store_with_pair() -> (tempfile::TempDir, CheckpointStore) {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        store.save(Role::Best, &Fixed("best")).unwrap();
        store.save(Role::Candidate, &Fixed("candidate")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_promotion_detected_from_digest() {
        let (dir, store) = store_with_pair();
        // The script has spaces, so build the command line directly.
        let command = CommandLine {
            program: "sh".into(),
            args: vec![
                "-c".into(),
                format!(
                    "cp {0}/candidate/weights.json {0}/best/weights.json",
                    dir.path().display()
                ),
            ],
        };

        let evaluator = CommandEvaluator::new(command, store.clone());
        let report = evaluator
            .evaluate(ResourceAssignment::General, CancelToken::new())
            .await
            .unwrap();

        assert!(report.promoted);
        assert_eq!(report.best_digest, store.digest(Role::Candidate).unwrap());
    }

    #[tokio::test]
    async fn test_no_promotion_when_best_unchanged() {
        let (_dir, store) = store_with_pair();
        let before = store.digest(Role::Best).unwrap();

        let evaluator = CommandEvaluator::new(CommandLine::parse("true").unwrap(), store);
        let report = evaluator
            .evaluate(ResourceAssignment::General, CancelToken::new())
            .await
            .unwrap();

        assert!(!report.promoted);
        assert_eq!(report.best_digest, before);
    }

    #[tokio::test]
    async fn test_failing_evaluator_is_an_error() {
        let (_dir, store) = store_with_pair();
        let evaluator = CommandEvaluator::new(CommandLine::parse("false").unwrap(), store);

        assert!(evaluator
            .evaluate(ResourceAssignment::General, CancelToken::new())
            .await
            .is_err());
    }
}

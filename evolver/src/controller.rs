//! Evolution controller: the self-play / train / evaluate loop.
//!
//! One iteration walks `Idle -> SelfPlay -> Training -> Evaluation -> Cooldown`
//! and ends in `Stopped` once the stop token fires or the iteration limit is
//! reached. A failed phase aborts only its own iteration. The stop token is
//! consulted between phases, between training rounds and inside the monitor's
//! poll loop; it never interrupts a write, a save or a training call.

use anyhow::{anyhow, Result};
use engine_core::{list_record_files, ComputeContext, ResourceAssignment};
use model_store::{short, CheckpointStore, Role};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::arbiter::{assign, ArbiterConfig};
use crate::cancel::CancelToken;
use crate::evaluation::Evaluator;
use crate::metrics;
use crate::monitor::{MonitorOutcome, SelfPlayMonitor};
use crate::pipeline::TrainingPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    SelfPlay,
    Training,
    Evaluation,
    Cooldown,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::SelfPlay => "selfplay",
            Phase::Training => "training",
            Phase::Evaluation => "evaluation",
            Phase::Cooldown => "cooldown",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loop bookkeeping, mutated only between phases.
#[derive(Debug)]
pub struct IterationState {
    /// Current iteration, 1-based; 0 before the first one starts
    pub iteration: u32,
    pub started: Instant,
    pub phase: Phase,
    pub completed: u32,
    pub failed: u32,
    pub interrupted: u32,
}

impl IterationState {
    fn new() -> Self {
        Self {
            iteration: 0,
            started: Instant::now(),
            phase: Phase::Idle,
            completed: 0,
            failed: 0,
            interrupted: 0,
        }
    }
}

/// What happened over a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Iterations started
    pub iterations: u32,
    pub completed: u32,
    pub failed: u32,
    pub interrupted: u32,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn average(&self) -> Option<Duration> {
        (self.iterations > 0).then(|| self.elapsed / self.iterations)
    }

    pub fn log(&self) {
        info!(
            iterations = self.iterations,
            completed = self.completed,
            failed = self.failed,
            interrupted = self.interrupted,
            total_secs = %format!("{:.1}", self.elapsed.as_secs_f64()),
            average_secs = %self
                .average()
                .map(|d| format!("{:.1}", d.as_secs_f64()))
                .unwrap_or_else(|| "-".to_string()),
            "Evolution finished"
        );
    }
}

enum RoundOutcome {
    Completed,
    Failed,
    Interrupted,
}

pub struct EvolutionController {
    monitor: SelfPlayMonitor,
    pipeline: TrainingPipeline,
    evaluator: Option<Arc<dyn Evaluator>>,
    store: CheckpointStore,
    arbiter: ArbiterConfig,
    stop: CancelToken,
    assignment: Option<ResourceAssignment>,
    metrics_path: Option<PathBuf>,
}

impl EvolutionController {
    pub fn new(
        monitor: SelfPlayMonitor,
        pipeline: TrainingPipeline,
        store: CheckpointStore,
        arbiter: ArbiterConfig,
        stop: CancelToken,
    ) -> Self {
        Self {
            monitor,
            pipeline,
            evaluator: None,
            store,
            arbiter,
            stop,
            assignment: None,
            metrics_path: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Write a metrics snapshot to `path` at every cooldown.
    pub fn with_metrics_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_path = Some(path.into());
        self
    }

    pub fn pipeline(&self) -> &TrainingPipeline {
        &self.pipeline
    }

    /// Run until stopped or until `max_iterations` (0 = unlimited) have run.
    ///
    /// Evaluation needs an evaluator: without one, `skip_evaluation` is
    /// forced on and every training phase saves straight to `best`.
    pub async fn run(&mut self, max_iterations: u32, skip_evaluation: bool) -> RunSummary {
        let skip_evaluation = if !skip_evaluation && self.evaluator.is_none() {
            warn!("No evaluator configured, skipping evaluation");
            true
        } else {
            skip_evaluation
        };

        let limit = if max_iterations == 0 {
            "unlimited".to_string()
        } else {
            max_iterations.to_string()
        };
        info!(
            max_iterations = %limit,
            skip_evaluation,
            device_mode = self.arbiter.device_mode(),
            target_file_count = self.arbiter.target_file_count,
            "Starting evolution loop"
        );

        let mut state = IterationState::new();
        loop {
            if self.stop.is_cancelled() {
                info!(iteration = state.iteration, "Stop requested");
                break;
            }
            if max_iterations > 0 && state.iteration >= max_iterations {
                info!(max_iterations, "Iteration limit reached");
                break;
            }

            state.iteration += 1;
            metrics::ITERATIONS_TOTAL.inc();
            let iteration_started = Instant::now();
            info!(iteration = state.iteration, "Iteration started");

            match self.run_iteration(&mut state, skip_evaluation).await {
                RoundOutcome::Completed => {
                    state.completed += 1;
                    metrics::ROUNDS_COMPLETED.inc();
                }
                RoundOutcome::Failed => state.failed += 1,
                RoundOutcome::Interrupted => {
                    state.interrupted += 1;
                    metrics::ROUNDS_INTERRUPTED.inc();
                }
            }

            self.cooldown(&mut state, iteration_started);
            state.phase = Phase::Idle;
        }

        state.phase = Phase::Stopped;
        RunSummary {
            iterations: state.iteration,
            completed: state.completed,
            failed: state.failed,
            interrupted: state.interrupted,
            elapsed: state.started.elapsed(),
        }
    }

    async fn run_iteration(
        &mut self,
        state: &mut IterationState,
        skip_evaluation: bool,
    ) -> RoundOutcome {
        // Self-play
        let device = self.enter(state, Phase::SelfPlay);
        let phase_started = Instant::now();
        let report = self
            .monitor
            .ensure_enough_data(self.arbiter.target_file_count, device, &self.stop)
            .await;
        metrics::record_phase(Phase::SelfPlay.as_str(), phase_started.elapsed());
        let report = match report {
            Ok(report) => report,
            Err(e) => return self.fail(state, Phase::SelfPlay, e),
        };
        info!(
            iteration = state.iteration,
            outcome = %report.outcome,
            files = report.files,
            launched = report.launched,
            elapsed_secs = report.elapsed.as_secs(),
            "Self-play phase finished"
        );
        match report.outcome {
            MonitorOutcome::Interrupted => return RoundOutcome::Interrupted,
            MonitorOutcome::Failed(reason) => {
                return self.fail(state, Phase::SelfPlay, anyhow!(reason));
            }
            MonitorOutcome::Reached | MonitorOutcome::Exhausted | MonitorOutcome::TimedOut => {}
        }
        if self.stop.is_cancelled() {
            return RoundOutcome::Interrupted;
        }

        // Training
        self.enter(state, Phase::Training);
        let role = if skip_evaluation {
            Role::Best
        } else {
            Role::Candidate
        };
        let phase_started = Instant::now();
        let trained = self.train(state, role).await;
        metrics::record_phase(Phase::Training.as_str(), phase_started.elapsed());
        let rounds = match trained {
            Ok(rounds) => rounds,
            Err(e) => return self.fail(state, Phase::Training, e),
        };
        self.log_best();
        if self.stop.is_cancelled() {
            return RoundOutcome::Interrupted;
        }

        // Evaluation
        if skip_evaluation {
            return RoundOutcome::Completed;
        }
        let Some(evaluator) = self.evaluator.clone() else {
            return RoundOutcome::Completed;
        };
        if rounds == 0 {
            info!(iteration = state.iteration, "No new candidate, skipping evaluation");
            return RoundOutcome::Completed;
        }

        let device = self.enter(state, Phase::Evaluation);
        let phase_started = Instant::now();
        let result = evaluator.evaluate(device, self.stop.child()).await;
        metrics::record_phase(Phase::Evaluation.as_str(), phase_started.elapsed());
        match result {
            Ok(report) => {
                if report.promoted {
                    metrics::PROMOTIONS.inc();
                }
                info!(
                    iteration = state.iteration,
                    promoted = report.promoted,
                    best = report.best_digest.as_deref().map(short).unwrap_or("-"),
                    "Evaluation finished"
                );
            }
            Err(e) => {
                metrics::EVALUATION_FAILURES.inc();
                warn!(
                    iteration = state.iteration,
                    elapsed_secs = state.started.elapsed().as_secs(),
                    "Evaluation failed: {:#}",
                    e
                );
            }
        }
        RoundOutcome::Completed
    }

    /// Move to `phase` and return the device it runs on.
    fn enter(&mut self, state: &mut IterationState, phase: Phase) -> ResourceAssignment {
        state.phase = phase;
        let wanted = assign(phase, &self.arbiter);
        if self.assignment == Some(wanted) {
            return wanted;
        }

        match self.pipeline.bind_context(ComputeContext::new(wanted)) {
            Ok(()) => {
                info!(phase = %phase, device = %wanted, "Compute context rebuilt");
                self.assignment = Some(wanted);
                wanted
            }
            Err(e) => {
                let kept = self.assignment.unwrap_or(wanted);
                warn!(
                    phase = %phase,
                    wanted = %wanted,
                    kept = %kept,
                    "Failed to switch compute context: {:#}",
                    e
                );
                kept
            }
        }
    }

    /// Successive pipeline rounds while enough data remains. Returns the
    /// number of rounds that trained.
    async fn train(&mut self, state: &IterationState, role: Role) -> Result<u32> {
        let digest = self.pipeline.prepare_model()?;
        info!(
            iteration = state.iteration,
            role = %role,
            start_from = %short(&digest),
            "Training phase started"
        );

        let min_files = self.pipeline.config().min_files_to_train;
        let mut rounds = 0;
        loop {
            let report = self.pipeline.run_round(role).await?;
            metrics::record_round(&report);
            if !report.trained() {
                break;
            }
            report.log();
            rounds += 1;

            if report.archived == 0 {
                warn!(
                    iteration = state.iteration,
                    rounds,
                    archive_failures = report.archive_failures,
                    "No game records archived, ending training phase"
                );
                break;
            }
            if self.stop.is_cancelled() {
                info!(
                    iteration = state.iteration,
                    rounds,
                    "Stop requested, ending training phase"
                );
                break;
            }
            if self.pipeline.pending_files()? < min_files {
                break;
            }
        }

        info!(
            iteration = state.iteration,
            rounds,
            total_steps = self.pipeline.total_steps(),
            "Training phase finished"
        );
        Ok(rounds)
    }

    fn log_best(&self) {
        match self.store.digest(Role::Best) {
            Ok(Some(digest)) => {
                let age_secs = self
                    .store
                    .modified(Role::Best)
                    .and_then(|m| m.elapsed().ok())
                    .map(|d| d.as_secs());
                info!(digest = %short(&digest), age_secs = ?age_secs, "Best checkpoint");
            }
            Ok(None) => warn!("No best checkpoint on disk"),
            Err(e) => warn!("Failed to read best checkpoint: {}", e),
        }
    }

    fn fail(&self, state: &IterationState, phase: Phase, err: anyhow::Error) -> RoundOutcome {
        metrics::record_failure(phase.as_str());
        error!(
            iteration = state.iteration,
            phase = %phase,
            elapsed_secs = state.started.elapsed().as_secs(),
            "Round aborted: {:#}",
            err
        );
        RoundOutcome::Failed
    }

    fn cooldown(&mut self, state: &mut IterationState, iteration_started: Instant) {
        self.enter(state, Phase::Cooldown);

        let active = match self.pipeline.pending_files() {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to count active game records: {:#}", e);
                0
            }
        };
        let archived = match list_record_files(&self.pipeline.config().archive_dir) {
            Ok(files) => files.len(),
            Err(e) => {
                warn!("Failed to count archived game records: {}", e);
                0
            }
        };
        metrics::ACTIVE_FILES.set(active as i64);
        metrics::ARCHIVED_FILES.set(archived as i64);

        let elapsed = iteration_started.elapsed();
        metrics::record_phase("iteration", elapsed);
        info!(
            iteration = state.iteration,
            elapsed_secs = %format!("{:.1}", elapsed.as_secs_f64()),
            total_secs = state.started.elapsed().as_secs(),
            active_files = active,
            archived_files = archived,
            completed = state.completed,
            failed = state.failed,
            "Iteration finished"
        );

        if let Some(path) = &self.metrics_path {
            if let Err(e) = metrics::write_snapshot(path) {
                warn!("Failed to write metrics snapshot: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::EvaluationReport;
    use crate::net::LinearPolicyValueNet;
    use crate::pipeline::PipelineConfig;
    use crate::selfplay::SelfPlayEngine;
    use async_trait::async_trait;
    use engine_core::{record_file_name, NetError, PolicyValueNet, TrainingBatch};
    use games_tictactoe::{play_random_game, TicTacToe, OBSERVATION_SIZE};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /// Plays random games into the record directory until cancelled.
    struct RandomGames {
        dir: PathBuf,
    }

    #[async_trait]
    impl SelfPlayEngine for RandomGames {
        async fn run(&self, _device: ResourceAssignment, cancel: CancelToken) -> Result<()> {
            let mut rng = ChaCha20Rng::seed_from_u64(5);
            while !cancel.is_cancelled() {
                let record = play_random_game(&mut rng);
                record.write_atomic(&self.dir.join(record_file_name()))?;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            Ok(())
        }
    }

    struct Crashing;

    #[async_trait]
    impl SelfPlayEngine for Crashing {
        async fn run(&self, _device: ResourceAssignment, _cancel: CancelToken) -> Result<()> {
            Err(anyhow!("engine crashed"))
        }
    }

    /// Requests a stop from inside the first training call.
    struct StopDuringTraining {
        inner: LinearPolicyValueNet,
        stop: CancelToken,
    }

    impl PolicyValueNet for StopDuringTraining {
        fn build(&mut self) {
            self.inner.build()
        }
        fn is_built(&self) -> bool {
            self.inner.is_built()
        }
        fn save(&self, config_path: &Path, weight_path: &Path) -> Result<(), NetError> {
            self.inner.save(config_path, weight_path)
        }
        fn load(&mut self, config_path: &Path, weight_path: &Path) -> Result<bool, NetError> {
            self.inner.load(config_path, weight_path)
        }
        fn train(
            &mut self,
            batch: &TrainingBatch,
            batch_size: usize,
            epochs: u32,
        ) -> Result<u64, NetError> {
            self.stop.cancel();
            self.inner.train(batch, batch_size, epochs)
        }
        fn learning_rate(&self) -> f64 {
            self.inner.learning_rate()
        }
        fn set_learning_rate(&mut self, lr: f64) {
            self.inner.set_learning_rate(lr)
        }
        fn bind_context(&mut self, context: ComputeContext) -> Result<(), NetError> {
            self.inner.bind_context(context)
        }
    }

    /// Promotes every candidate.
    struct Promoter {
        store: CheckpointStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Evaluator for Promoter {
        async fn evaluate(
            &self,
            _device: ResourceAssignment,
            _cancel: CancelToken,
        ) -> Result<EvaluationReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let digest = self.store.promote()?;
            Ok(EvaluationReport {
                promoted: true,
                best_digest: Some(digest),
            })
        }
    }

    struct FailingEvaluator;

    #[async_trait]
    impl Evaluator for FailingEvaluator {
        async fn evaluate(
            &self,
            _device: ResourceAssignment,
            _cancel: CancelToken,
        ) -> Result<EvaluationReport> {
            Err(anyhow!("tournament crashed"))
        }
    }

    struct Harness {
        dir: TempDir,
        store: CheckpointStore,
        stop: CancelToken,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let store = CheckpointStore::new(dir.path().join("model")).unwrap();
            std::fs::create_dir_all(dir.path().join("play_data")).unwrap();
            Self {
                dir,
                store,
                stop: CancelToken::new(),
            }
        }

        fn play_data(&self) -> PathBuf {
            self.dir.path().join("play_data")
        }

        fn controller(
            &self,
            engine: Arc<dyn SelfPlayEngine>,
            net: Box<dyn PolicyValueNet>,
        ) -> EvolutionController {
            let monitor = SelfPlayMonitor::new(
                self.play_data(),
                engine,
                Duration::from_millis(10),
                Duration::from_secs(10),
                Duration::from_secs(1),
            );
            let pipeline = TrainingPipeline::new(
                PipelineConfig {
                    play_data_dir: self.play_data(),
                    archive_dir: self.dir.path().join("trained"),
                    min_files_to_train: 5,
                    dataset_size: 1_000,
                    batch_size: 8,
                    workers: 2,
                    epochs_per_round: 1,
                    max_files_per_round: 0,
                    start_total_steps: 0,
                    lr_schedule: vec![(0, 0.01)],
                    shuffle_seed: Some(3),
                },
                Arc::new(TicTacToe::new()),
                self.store.clone(),
                net,
            );
            let arbiter = ArbiterConfig {
                large_config: None,
                target_file_count: 5,
                force_accelerated_training: false,
            };
            EvolutionController::new(
                monitor,
                pipeline,
                self.store.clone(),
                arbiter,
                self.stop.clone(),
            )
            .with_metrics_path(self.dir.path().join("metrics.prom"))
        }

        fn games(&self) -> Arc<dyn SelfPlayEngine> {
            Arc::new(RandomGames {
                dir: self.play_data(),
            })
        }
    }

    /// Linear net whose n-th `bind_context` call fails, optionally with a
    /// failing trainer. Logs the device each training call ran on.
    struct Scripted {
        inner: LinearPolicyValueNet,
        device: Option<ResourceAssignment>,
        binds: usize,
        fail_bind: Option<usize>,
        fail_training: bool,
        trained_on: Arc<Mutex<Vec<Option<ResourceAssignment>>>>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                inner: LinearPolicyValueNet::new(OBSERVATION_SIZE, 9, 0.01).with_seed(1),
                device: None,
                binds: 0,
                fail_bind: None,
                fail_training: false,
                trained_on: Arc::default(),
            }
        }
    }

    impl PolicyValueNet for Scripted {
        fn build(&mut self) {
            self.inner.build()
        }
        fn is_built(&self) -> bool {
            self.inner.is_built()
        }
        fn save(&self, config_path: &Path, weight_path: &Path) -> Result<(), NetError> {
            self.inner.save(config_path, weight_path)
        }
        fn load(&mut self, config_path: &Path, weight_path: &Path) -> Result<bool, NetError> {
            self.inner.load(config_path, weight_path)
        }
        fn train(
            &mut self,
            batch: &TrainingBatch,
            batch_size: usize,
            epochs: u32,
        ) -> Result<u64, NetError> {
            self.trained_on.lock().unwrap().push(self.device);
            if self.fail_training {
                return Err(NetError::Device("device lost".into()));
            }
            self.inner.train(batch, batch_size, epochs)
        }
        fn learning_rate(&self) -> f64 {
            self.inner.learning_rate()
        }
        fn set_learning_rate(&mut self, lr: f64) {
            self.inner.set_learning_rate(lr)
        }
        fn bind_context(&mut self, context: ComputeContext) -> Result<(), NetError> {
            self.binds += 1;
            if self.fail_bind == Some(self.binds) {
                return Err(NetError::Device("context creation failed".into()));
            }
            self.device = Some(context.assignment());
            self.inner.bind_context(context)
        }
    }

    fn linear() -> Box<dyn PolicyValueNet> {
        Box::new(LinearPolicyValueNet::new(OBSERVATION_SIZE, 9, 0.01).with_seed(1))
    }

    #[tokio::test]
    async fn test_stops_exactly_at_max_iterations() {
        let h = Harness::new();
        let mut controller = h.controller(h.games(), linear());

        let summary = controller.run(3, true).await;

        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 0);
        assert!(controller.pipeline().total_steps() > 0);
        assert!(h.store.exists(Role::Best));
        assert!(!h.store.exists(Role::Candidate));
        assert!(h.dir.path().join("metrics.prom").exists());
        assert!(!list_record_files(&h.dir.path().join("trained")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_before_start_runs_nothing() {
        let h = Harness::new();
        h.stop.cancel();
        let mut controller = h.controller(h.games(), linear());

        let summary = controller.run(0, true).await;

        assert_eq!(summary.iterations, 0);
        assert_eq!(summary.average(), None);
    }

    #[tokio::test]
    async fn test_stop_during_training_saves_checkpoint() {
        let h = Harness::new();
        let net = Box::new(StopDuringTraining {
            inner: LinearPolicyValueNet::new(OBSERVATION_SIZE, 9, 0.01).with_seed(1),
            stop: h.stop.clone(),
        });
        let mut controller = h.controller(h.games(), net);

        let summary = controller.run(0, true).await;

        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.interrupted, 1);
        assert_eq!(summary.completed, 0);
        assert!(controller.pipeline().total_steps() > 0);
        assert_eq!(
            h.store.digest(Role::Best).unwrap().as_deref(),
            controller.pipeline().held_digest()
        );
    }

    #[tokio::test]
    async fn test_selfplay_failure_aborts_round_only() {
        let h = Harness::new();
        let mut controller = h.controller(Arc::new(Crashing), linear());

        let summary = controller.run(2, true).await;

        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.completed, 0);
        assert_eq!(controller.pipeline().total_steps(), 0);
    }

    #[tokio::test]
    async fn test_candidate_promoted_by_evaluator() {
        let h = Harness::new();
        let promoter = Arc::new(Promoter {
            store: h.store.clone(),
            calls: AtomicUsize::new(0),
        });
        let mut controller = h
            .controller(h.games(), linear())
            .with_evaluator(promoter.clone());

        let summary = controller.run(1, false).await;

        assert_eq!(summary.completed, 1);
        assert_eq!(promoter.calls.load(Ordering::SeqCst), 1);
        assert!(!h.store.exists(Role::Candidate));
        assert_eq!(
            h.store.digest(Role::Best).unwrap().as_deref(),
            controller.pipeline().held_digest()
        );
    }

    #[tokio::test]
    async fn test_evaluation_failure_is_not_fatal() {
        let h = Harness::new();
        let mut controller = h
            .controller(h.games(), linear())
            .with_evaluator(Arc::new(FailingEvaluator));

        let summary = controller.run(2, false).await;

        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.completed, 2);
        assert!(h.store.exists(Role::Candidate));
    }

    #[tokio::test]
    async fn test_failed_context_switch_keeps_previous_device() {
        let h = Harness::new();
        // Bind 1 is self-play, bind 2 is the switch to training
        let net = Scripted {
            fail_bind: Some(2),
            ..Scripted::new()
        };
        let trained_on = Arc::clone(&net.trained_on);
        let mut controller = h.controller(h.games(), Box::new(net));

        let summary = controller.run(1, true).await;

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);
        assert!(controller.pipeline().total_steps() > 0);
        let trained_on = trained_on.lock().unwrap();
        assert!(!trained_on.is_empty());
        assert!(trained_on
            .iter()
            .all(|device| *device == Some(ResourceAssignment::Accelerated)));
    }

    #[tokio::test]
    async fn test_training_failure_fails_round_and_keeps_records() {
        let h = Harness::new();
        let net = Scripted {
            fail_training: true,
            ..Scripted::new()
        };
        let mut controller = h.controller(h.games(), Box::new(net));

        let summary = controller.run(2, true).await;

        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.completed, 0);
        assert_eq!(controller.pipeline().total_steps(), 0);
        assert!(list_record_files(&h.play_data()).unwrap().len() >= 5);
        assert!(list_record_files(&h.dir.path().join("trained"))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_archive_ends_training_phase() {
        let h = Harness::new();
        std::fs::write(h.dir.path().join("trained"), b"not a directory").unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        for _ in 0..10 {
            let record = play_random_game(&mut rng);
            record
                .write_atomic(&h.play_data().join(record_file_name()))
                .unwrap();
        }
        let mut controller = h.controller(h.games(), linear());

        let summary = tokio::time::timeout(Duration::from_secs(30), controller.run(1, true))
            .await
            .expect("training phase never ended");

        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.completed, 1);
        assert!(controller.pipeline().total_steps() > 0);
        assert!(list_record_files(&h.play_data()).unwrap().len() >= 10);
    }

    #[tokio::test]
    async fn test_missing_evaluator_trains_best_directly() {
        let h = Harness::new();
        let mut controller = h.controller(h.games(), linear());

        let summary = controller.run(1, false).await;

        assert_eq!(summary.completed, 1);
        assert!(!h.store.exists(Role::Candidate));
        assert_eq!(
            h.store.digest(Role::Best).unwrap().as_deref(),
            controller.pipeline().held_digest()
        );
    }
}

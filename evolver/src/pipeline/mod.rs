//! Training data pipeline
//!
//! One round:
//! 1. List unconsumed game records; skip the round below `min_files_to_train`
//! 2. Take the oldest `max_files_per_round` (0 = all) and shuffle them
//! 3. Fill the bounded window with bounded parallel loads
//! 4. If the window holds more than one batch, drain it into a training call
//! 5. Save a checkpoint under the caller's role and archive merged files
//!
//! The window is emptied every round whether or not training happened.
//! Records trained on but left unarchived are held back until the next
//! phase, so a broken archive cannot feed the same files round after round.

mod archive;
mod loader;
mod schedule;
mod window;

use archive::archive_files;
use loader::fill_window;
pub use schedule::LearningRateSchedule;
use window::DatasetWindow;

use anyhow::{anyhow, Context, Result};
use engine_core::{list_record_files, ComputeContext, Environment, PolicyValueNet};
use model_store::{short, CheckpointStore, Role};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Settings for [`TrainingPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub play_data_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub min_files_to_train: usize,
    /// Window capacity in examples
    pub dataset_size: usize,
    pub batch_size: usize,
    /// Maximum in-flight file loads
    pub workers: usize,
    pub epochs_per_round: u32,
    /// 0 takes every unconsumed file
    pub max_files_per_round: usize,
    pub start_total_steps: u64,
    pub lr_schedule: Vec<(u64, f64)>,
    pub shuffle_seed: Option<u64>,
}

/// Outcome of one [`TrainingPipeline::run_round`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundReport {
    /// Files queued for loading
    pub files_considered: usize,
    pub files_loaded: usize,
    pub corrupt_files: usize,
    /// Examples handed to the trainer (0 when nothing trained)
    pub examples: usize,
    /// Steps added to the global counter
    pub steps: u64,
    pub total_steps: u64,
    /// Rate in force after the round
    pub learning_rate: Option<f64>,
    /// Digest of the checkpoint saved this round
    pub digest: Option<String>,
    pub archived: usize,
    pub archive_failures: usize,
}

impl RoundReport {
    pub fn trained(&self) -> bool {
        self.digest.is_some()
    }

    pub fn log(&self) {
        info!(
            files_considered = self.files_considered,
            files_loaded = self.files_loaded,
            corrupt_files = self.corrupt_files,
            examples = self.examples,
            steps = self.steps,
            total_steps = self.total_steps,
            learning_rate = ?self.learning_rate,
            digest = self.digest.as_deref().map(short).unwrap_or("-"),
            archived = self.archived,
            archive_failures = self.archive_failures,
            "Training round finished"
        );
    }
}

pub struct TrainingPipeline {
    config: PipelineConfig,
    env: Arc<dyn Environment>,
    store: CheckpointStore,
    net: Arc<Mutex<Box<dyn PolicyValueNet>>>,
    /// Digest of the weights currently held in `net`
    held_digest: Option<String>,
    total_steps: u64,
    schedule: LearningRateSchedule,
    window: DatasetWindow,
    rng: ChaCha20Rng,
    /// Records already trained on this phase
    consumed: HashSet<PathBuf>,
}

fn lock_net(
    net: &Mutex<Box<dyn PolicyValueNet>>,
) -> Result<MutexGuard<'_, Box<dyn PolicyValueNet>>> {
    net.lock().map_err(|e| anyhow!("Network lock poisoned: {}", e))
}

impl TrainingPipeline {
    pub fn new(
        config: PipelineConfig,
        env: Arc<dyn Environment>,
        store: CheckpointStore,
        net: Box<dyn PolicyValueNet>,
    ) -> Self {
        let rng = match config.shuffle_seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        Self {
            total_steps: config.start_total_steps,
            schedule: LearningRateSchedule::new(config.lr_schedule.clone()),
            window: DatasetWindow::new(config.dataset_size),
            config,
            env,
            store,
            net: Arc::new(Mutex::new(net)),
            held_digest: None,
            rng,
            consumed: HashSet::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn held_digest(&self) -> Option<&str> {
        self.held_digest.as_deref()
    }

    /// Number of game records not yet trained on this phase.
    pub fn pending_files(&self) -> Result<usize> {
        Ok(self.list_pending()?.len())
    }

    fn list_pending(&self) -> Result<Vec<PathBuf>> {
        let mut files = list_record_files(&self.config.play_data_dir)
            .with_context(|| format!("listing {}", self.config.play_data_dir.display()))?;
        files.retain(|path| !self.consumed.contains(path));
        Ok(files)
    }

    /// Bind a freshly built compute context into the network.
    pub fn bind_context(&self, context: ComputeContext) -> Result<()> {
        lock_net(&self.net)?
            .bind_context(context)
            .map_err(|e| anyhow!("failed to bind compute context: {}", e))
    }

    /// Start a training phase: make sure the held model matches `best`,
    /// building one if none exists.
    pub fn prepare_model(&mut self) -> Result<String> {
        if !self.consumed.is_empty() {
            debug!(held_back = self.consumed.len(), "Releasing unarchived records");
            self.consumed.clear();
        }

        if let Some(held) = self.held_digest.as_deref() {
            if !self.store.needs_reload(Some(held))? {
                debug!(digest = %short(held), "Held model is current");
                return Ok(held.to_string());
            }
        }

        let mut net = lock_net(&self.net)?;
        let digest = match self.store.load_into(Role::Best, &mut **net)? {
            Some(digest) => digest,
            None => {
                info!("No best checkpoint found, building a fresh model");
                net.build();
                self.store.save(Role::Best, &**net)?
            }
        };
        drop(net);

        self.held_digest = Some(digest.clone());
        Ok(digest)
    }

    /// Run one load/train/save/archive round, saving under `role`.
    pub async fn run_round(&mut self, role: Role) -> Result<RoundReport> {
        self.window.clear();
        let mut report = RoundReport {
            total_steps: self.total_steps,
            learning_rate: self.schedule.rate_at(self.total_steps),
            ..RoundReport::default()
        };

        let mut files = self.list_pending()?;
        if files.len() < self.config.min_files_to_train {
            info!(
                files = files.len(),
                min_files = self.config.min_files_to_train,
                "Not enough game records to train"
            );
            return Ok(report);
        }

        if self.config.max_files_per_round > 0 {
            files.truncate(self.config.max_files_per_round);
        }
        files.shuffle(&mut self.rng);
        report.files_considered = files.len();

        let fill = fill_window(
            Arc::clone(&self.env),
            files,
            &mut self.window,
            self.config.workers,
        )
        .await;
        report.files_loaded = fill.merged.len();
        report.corrupt_files = fill.corrupt;
        debug!(
            merged = fill.merged.len(),
            corrupt = fill.corrupt,
            missing = fill.missing,
            examples = fill.examples,
            discarded = fill.discarded,
            "Window filled"
        );

        let window_len = self.window.len();
        if window_len <= self.config.batch_size {
            info!(
                examples = window_len,
                batch_size = self.config.batch_size,
                "Not enough examples for a batch, skipping training"
            );
            self.window.clear();
            return Ok(report);
        }

        let batch_size = self.config.batch_size;
        let epochs = self.config.epochs_per_round;
        let steps = (window_len / batch_size) as u64 * epochs as u64;
        let rate_before = self.schedule.rate_at(self.total_steps);
        let batch = self.window.drain_batch();

        info!(
            examples = window_len,
            batch_size,
            epochs,
            learning_rate = ?rate_before,
            "Training"
        );

        let net = Arc::clone(&self.net);
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut net = lock_net(&net)?;
            if let Some(rate) = rate_before {
                net.set_learning_rate(rate);
            }
            net.train(&batch, batch_size, epochs)
                .map_err(|e| anyhow!("training failed: {}", e))
        })
        .await
        .context("training task panicked")??;

        self.total_steps += steps;
        let rate_after = self.schedule.rate_at(self.total_steps);

        let digest = {
            let mut net = lock_net(&self.net)?;
            if let Some(rate) = rate_after {
                net.set_learning_rate(rate);
            }
            self.store.save(role, &**net)?
        };
        self.held_digest = Some(digest.clone());

        let archive = archive_files(&fill.merged, &self.config.archive_dir);
        if archive.failures > 0 {
            self.consumed
                .extend(fill.merged.into_iter().filter(|path| path.exists()));
        }

        report.examples = window_len;
        report.steps = steps;
        report.total_steps = self.total_steps;
        report.learning_rate = rate_after.or(rate_before).or(report.learning_rate);
        report.digest = Some(digest);
        report.archived = archive.archived;
        report.archive_failures = archive.failures;
        Ok(report)
    }
}

//! Configuration for the evolver service
//!
//! Configuration is loaded from config.toml with environment variable overrides.
//! CLI arguments take highest priority, followed by env vars, then config.toml,
//! then the built-in defaults.

use anyhow::{anyhow, Result};
use clap::{ArgAction, Args};
use engine_config::{load_config, parse_lr_schedule, CentralConfig};
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

use crate::arbiter::ArbiterConfig;
use crate::pipeline::PipelineConfig;

// Load central config once at startup
pub static CENTRAL_CONFIG: Lazy<CentralConfig> = Lazy::new(load_config);

/// Sub-directory holding active game records
pub const PLAY_DATA_DIR: &str = "play_data";
/// Sub-directory receiving consumed game records
pub const ARCHIVE_DIR: &str = "trained";
/// Sub-directory holding the best/candidate checkpoints
pub const MODEL_DIR: &str = "model";
/// Prometheus text snapshot written at every cooldown
pub const METRICS_FILE: &str = "metrics.prom";

fn default_lr_schedule() -> String {
    format_lr_schedule(&CENTRAL_CONFIG.trainer.lr_schedule)
}

/// Render a learning-rate table in the `step:rate,...` CLI form.
pub fn format_lr_schedule(table: &[(u64, f64)]) -> String {
    table
        .iter()
        .map(|(step, rate)| format!("{step}:{rate}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Root directory for play_data/, trained/, model/ and metrics.prom
    #[arg(long, default_value_t = CENTRAL_CONFIG.common.data_dir.clone())]
    pub data_dir: String,

    /// Environment ID used to replay game records (e.g., tictactoe)
    #[arg(long, default_value_t = CENTRAL_CONFIG.common.env_id.clone())]
    pub env_id: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value_t = CENTRAL_CONFIG.common.log_level.clone())]
    pub log_level: String,

    /// Maximum iterations to run (0 for unlimited)
    #[arg(long, default_value_t = CENTRAL_CONFIG.evolve.max_iterations)]
    pub max_iterations: u32,

    /// Skip evaluation; trained models are saved directly as best
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
        default_value_t = CENTRAL_CONFIG.evolve.skip_evaluation
    )]
    pub skip_evaluation: bool,

    /// Run training on the accelerator instead of general compute
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
        default_value_t = CENTRAL_CONFIG.evolve.force_accelerated_training
    )]
    pub force_accelerated_training: bool,

    /// Treat the configuration as large (self-play on general compute).
    /// Inferred from --target-file-count when unset.
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub large_config: Option<bool>,

    /// Number of active game-record files self-play must reach each round
    #[arg(long, default_value_t = CENTRAL_CONFIG.self_play.target_file_count)]
    pub target_file_count: usize,

    /// Seconds between file-count polls while self-play runs
    #[arg(long, default_value_t = CENTRAL_CONFIG.self_play.poll_interval_secs)]
    pub poll_interval_secs: u64,

    /// Maximum seconds to wait for self-play data
    #[arg(long, default_value_t = CENTRAL_CONFIG.self_play.timeout_secs)]
    pub self_play_timeout_secs: u64,

    /// Seconds to wait for the self-play job after cancelling it
    #[arg(long, default_value_t = CENTRAL_CONFIG.self_play.shutdown_grace_secs)]
    pub shutdown_grace_secs: u64,

    /// Self-play command line ({play_data_dir} and {model_dir} are substituted)
    #[arg(long, default_value_t = CENTRAL_CONFIG.self_play.command.clone())]
    pub self_play_command: String,

    /// Minimum unconsumed files before a training round runs
    #[arg(long, default_value_t = CENTRAL_CONFIG.trainer.min_files_to_train)]
    pub min_files_to_train: usize,

    /// Capacity of the training window, in examples
    #[arg(long, default_value_t = CENTRAL_CONFIG.trainer.dataset_size)]
    pub dataset_size: usize,

    /// Training batch size
    #[arg(long, default_value_t = CENTRAL_CONFIG.trainer.batch_size)]
    pub batch_size: usize,

    /// Maximum in-flight file loads
    #[arg(long, default_value_t = CENTRAL_CONFIG.trainer.workers)]
    pub workers: usize,

    /// Epochs per training call
    #[arg(long, default_value_t = CENTRAL_CONFIG.trainer.epochs_per_round)]
    pub epochs_per_round: u32,

    /// Global step counter at startup (selects the initial learning rate)
    #[arg(long, default_value_t = CENTRAL_CONFIG.trainer.start_total_steps)]
    pub start_total_steps: u64,

    /// Oldest files considered per training round (0 for all)
    #[arg(long, default_value_t = CENTRAL_CONFIG.trainer.max_files_per_round)]
    pub max_files_per_round: usize,

    /// Learning-rate table as ascending step:rate pairs (e.g. 0:0.01,400000:0.001)
    #[arg(long, default_value_t = default_lr_schedule())]
    pub lr_schedule: String,

    /// Seed for the per-round file shuffle (random when unset)
    #[arg(long)]
    pub shuffle_seed: Option<u64>,

    /// Evaluator command line ({model_dir} is substituted); required unless
    /// evaluation is skipped
    #[arg(long, default_value_t = CENTRAL_CONFIG.evaluation.command.clone())]
    pub evaluation_command: String,
}

impl Config {
    /// Fill optional settings left unset on the command line from config.toml.
    pub fn with_central_fallbacks(mut self) -> Self {
        self.large_config = self.large_config.or(CENTRAL_CONFIG.evolve.large_config);
        self.shuffle_seed = self.shuffle_seed.or(CENTRAL_CONFIG.trainer.shuffle_seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.is_empty() {
            return Err(anyhow!("data_dir cannot be empty"));
        }

        if self.env_id.is_empty() {
            return Err(anyhow!("env_id cannot be empty"));
        }

        if self.log_level.parse::<LevelFilter>().is_err() {
            return Err(anyhow!(
                "invalid log level '{}', expected one of trace, debug, info, warn, error",
                self.log_level
            ));
        }

        if self.target_file_count == 0 {
            return Err(anyhow!("target_file_count must be greater than 0"));
        }

        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be greater than 0"));
        }

        if self.self_play_timeout_secs == 0 {
            return Err(anyhow!("self_play_timeout_secs must be greater than 0"));
        }

        if self.self_play_command.trim().is_empty() {
            return Err(anyhow!("self_play_command cannot be empty"));
        }

        if self.dataset_size == 0 {
            return Err(anyhow!("dataset_size must be greater than 0"));
        }

        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be greater than 0"));
        }

        if self.workers == 0 {
            return Err(anyhow!("workers must be greater than 0"));
        }

        if self.epochs_per_round == 0 {
            return Err(anyhow!("epochs_per_round must be greater than 0"));
        }

        self.lr_table()?;

        if !self.skip_evaluation && self.evaluation_command.trim().is_empty() {
            return Err(anyhow!(
                "evaluation_command is required unless --skip-evaluation is set"
            ));
        }

        Ok(())
    }

    /// Parsed learning-rate table, rejecting malformed or unsorted input.
    pub fn lr_table(&self) -> Result<Vec<(u64, f64)>> {
        let table = parse_lr_schedule(&self.lr_schedule)
            .ok_or_else(|| anyhow!("invalid lr_schedule '{}'", self.lr_schedule))?;

        if table.windows(2).any(|pair| pair[0].0 >= pair[1].0) {
            return Err(anyhow!(
                "lr_schedule steps must be strictly ascending: '{}'",
                self.lr_schedule
            ));
        }

        if table.iter().any(|&(_, rate)| !(rate.is_finite() && rate > 0.0)) {
            return Err(anyhow!(
                "lr_schedule rates must be positive: '{}'",
                self.lr_schedule
            ));
        }

        Ok(table)
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn play_data_dir(&self) -> PathBuf {
        self.data_path().join(PLAY_DATA_DIR)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_path().join(ARCHIVE_DIR)
    }

    pub fn model_dir(&self) -> PathBuf {
        self.data_path().join(MODEL_DIR)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.data_path().join(METRICS_FILE)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn self_play_timeout(&self) -> Duration {
        Duration::from_secs(self.self_play_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn arbiter_config(&self) -> ArbiterConfig {
        ArbiterConfig {
            large_config: self.large_config,
            target_file_count: self.target_file_count,
            force_accelerated_training: self.force_accelerated_training,
        }
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            play_data_dir: self.play_data_dir(),
            archive_dir: self.archive_dir(),
            min_files_to_train: self.min_files_to_train,
            dataset_size: self.dataset_size,
            batch_size: self.batch_size,
            workers: self.workers,
            epochs_per_round: self.epochs_per_round,
            max_files_per_round: self.max_files_per_round,
            start_total_steps: self.start_total_steps,
            lr_schedule: self.lr_table()?,
            shuffle_seed: self.shuffle_seed,
        })
    }

    /// Substitute `{play_data_dir}` and `{model_dir}` in a command template.
    pub fn expand_command(&self, template: &str) -> String {
        template
            .replace("{play_data_dir}", &self.play_data_dir().to_string_lossy())
            .replace("{model_dir}", &self.model_dir().to_string_lossy())
            .replace("{data_dir}", &self.data_dir)
    }
}

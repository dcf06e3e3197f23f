//! Configuration struct definitions.
//!
//! Every section uses `#[serde(default)]`, so a config.toml only needs to
//! mention the keys it changes.

use crate::defaults;
use serde::Deserialize;

/// Root configuration structure matching config.toml
#[derive(Debug, Deserialize, Default, Clone)]
pub struct CentralConfig {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub evolve: EvolveConfig,
    #[serde(default)]
    pub self_play: SelfPlayConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

/// Common configuration shared by all components
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CommonConfig {
    /// Root for play_data/, trained/ and model/
    pub data_dir: String,
    pub env_id: String,
    pub log_level: String,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir().into(),
            env_id: defaults::env_id().into(),
            log_level: defaults::log_level().into(),
        }
    }
}

/// Controller-level settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EvolveConfig {
    /// 0 means unbounded
    pub max_iterations: u32,
    pub skip_evaluation: bool,
    pub force_accelerated_training: bool,
    /// Explicit "large configuration" flag. When unset the resource arbiter
    /// infers it from `self_play.target_file_count`.
    pub large_config: Option<bool>,
}

impl Default for EvolveConfig {
    fn default() -> Self {
        Self {
            max_iterations: defaults::max_iterations(),
            skip_evaluation: defaults::skip_evaluation(),
            force_accelerated_training: defaults::force_accelerated_training(),
            large_config: None,
        }
    }
}

/// Self-play launching and monitoring
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SelfPlayConfig {
    pub target_file_count: usize,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    /// Command line of the external engine. `{play_data_dir}` and
    /// `{model_dir}` are substituted before launch.
    pub command: String,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        Self {
            target_file_count: defaults::target_file_count(),
            poll_interval_secs: defaults::poll_interval_secs(),
            timeout_secs: defaults::self_play_timeout_secs(),
            shutdown_grace_secs: defaults::shutdown_grace_secs(),
            command: defaults::self_play_command().into(),
        }
    }
}

/// Training data pipeline settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrainerConfig {
    pub min_files_to_train: usize,
    /// Dataset window capacity, in examples
    pub dataset_size: usize,
    pub batch_size: usize,
    /// Maximum number of game-record files loaded concurrently
    pub workers: usize,
    pub epochs_per_round: u32,
    pub start_total_steps: u64,
    /// Oldest files taken per round (0 = all active files)
    pub max_files_per_round: usize,
    /// Ascending (step threshold, learning rate) pairs
    pub lr_schedule: Vec<(u64, f64)>,
    pub shuffle_seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            min_files_to_train: defaults::min_files_to_train(),
            dataset_size: defaults::dataset_size(),
            batch_size: defaults::batch_size(),
            workers: defaults::workers(),
            epochs_per_round: defaults::epochs_per_round(),
            start_total_steps: defaults::start_total_steps(),
            max_files_per_round: defaults::max_files_per_round(),
            lr_schedule: defaults::lr_schedule().to_vec(),
            shuffle_seed: None,
        }
    }
}

/// External evaluator settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Command line of the evaluator; empty when no evaluator is installed
    pub command: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            command: defaults::evaluation_command().into(),
        }
    }
}

//! Default configuration values loaded from config.defaults.toml.
//!
//! The defaults file is embedded at compile time, so a binary always has a
//! complete configuration even when no config.toml is deployed next to it.

use once_cell::sync::Lazy;
use serde::Deserialize;

/// The embedded defaults TOML file (loaded at compile time)
const DEFAULTS_TOML: &str = include_str!("../../../config.defaults.toml");

/// Parsed defaults structure (parsed once at first use)
static DEFAULTS: Lazy<DefaultsConfig> = Lazy::new(|| {
    toml::from_str(DEFAULTS_TOML).expect("config.defaults.toml should be valid TOML")
});

// ============================================================================
// Internal structs for parsing config.defaults.toml
// ============================================================================

#[derive(Debug, Deserialize)]
struct DefaultsConfig {
    common: CommonDefaults,
    evolve: EvolveDefaults,
    self_play: SelfPlayDefaults,
    trainer: TrainerDefaults,
    evaluation: EvaluationDefaults,
}

#[derive(Debug, Deserialize)]
struct CommonDefaults {
    data_dir: String,
    env_id: String,
    log_level: String,
}

#[derive(Debug, Deserialize)]
struct EvolveDefaults {
    max_iterations: u32,
    skip_evaluation: bool,
    force_accelerated_training: bool,
}

#[derive(Debug, Deserialize)]
struct SelfPlayDefaults {
    target_file_count: usize,
    poll_interval_secs: u64,
    timeout_secs: u64,
    shutdown_grace_secs: u64,
    command: String,
}

#[derive(Debug, Deserialize)]
struct TrainerDefaults {
    min_files_to_train: usize,
    dataset_size: usize,
    batch_size: usize,
    workers: usize,
    epochs_per_round: u32,
    start_total_steps: u64,
    max_files_per_round: usize,
    lr_schedule: Vec<(u64, f64)>,
}

#[derive(Debug, Deserialize)]
struct EvaluationDefaults {
    command: String,
}

// ============================================================================
// Public accessor functions
// ============================================================================

// Common
pub fn data_dir() -> &'static str {
    &DEFAULTS.common.data_dir
}
pub fn env_id() -> &'static str {
    &DEFAULTS.common.env_id
}
pub fn log_level() -> &'static str {
    &DEFAULTS.common.log_level
}

// Evolve
pub fn max_iterations() -> u32 {
    DEFAULTS.evolve.max_iterations
}
pub fn skip_evaluation() -> bool {
    DEFAULTS.evolve.skip_evaluation
}
pub fn force_accelerated_training() -> bool {
    DEFAULTS.evolve.force_accelerated_training
}

// Self-play
pub fn target_file_count() -> usize {
    DEFAULTS.self_play.target_file_count
}
pub fn poll_interval_secs() -> u64 {
    DEFAULTS.self_play.poll_interval_secs
}
pub fn self_play_timeout_secs() -> u64 {
    DEFAULTS.self_play.timeout_secs
}
pub fn shutdown_grace_secs() -> u64 {
    DEFAULTS.self_play.shutdown_grace_secs
}
pub fn self_play_command() -> &'static str {
    &DEFAULTS.self_play.command
}

// Trainer
pub fn min_files_to_train() -> usize {
    DEFAULTS.trainer.min_files_to_train
}
pub fn dataset_size() -> usize {
    DEFAULTS.trainer.dataset_size
}
pub fn batch_size() -> usize {
    DEFAULTS.trainer.batch_size
}
pub fn workers() -> usize {
    DEFAULTS.trainer.workers
}
pub fn epochs_per_round() -> u32 {
    DEFAULTS.trainer.epochs_per_round
}
pub fn start_total_steps() -> u64 {
    DEFAULTS.trainer.start_total_steps
}
pub fn max_files_per_round() -> usize {
    DEFAULTS.trainer.max_files_per_round
}
pub fn lr_schedule() -> &'static [(u64, f64)] {
    &DEFAULTS.trainer.lr_schedule
}

// Evaluation
pub fn evaluation_command() -> &'static str {
    &DEFAULTS.evaluation.command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        // Just accessing these will verify the TOML parses correctly
        assert_eq!(data_dir(), "./data");
        assert_eq!(env_id(), "tictactoe");
        assert_eq!(log_level(), "info");
    }

    #[test]
    fn test_self_play_defaults() {
        assert_eq!(target_file_count(), 100);
        assert_eq!(poll_interval_secs(), 3);
        assert_eq!(self_play_timeout_secs(), 1800);
        assert_eq!(shutdown_grace_secs(), 5);
        assert!(self_play_command().contains("{play_data_dir}"));
    }

    #[test]
    fn test_trainer_defaults() {
        assert_eq!(min_files_to_train(), 50);
        assert_eq!(workers(), 4);
        assert_eq!(
            lr_schedule(),
            &[(0, 0.01), (400_000, 0.001), (600_000, 0.0001)]
        );
    }

    #[test]
    fn test_evolve_defaults() {
        assert_eq!(max_iterations(), 0);
        assert!(!skip_evaluation());
        assert!(!force_accelerated_training());
        assert!(evaluation_command().is_empty());
    }
}

//! config.toml discovery and `EVOLVE_<SECTION>_<KEY>` overrides.

use crate::CentralConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Checked in order after `EVOLVE_CONFIG`
pub const CONFIG_SEARCH_PATHS: &[&str] = &["config.toml", "../config.toml", "/app/config.toml"];

/// Build the central configuration.
///
/// The first existing file wins: `$EVOLVE_CONFIG`, then each entry of
/// [`CONFIG_SEARCH_PATHS`]. Without a file the built-in defaults are used.
/// Environment overrides are applied last in every case.
pub fn load_config() -> CentralConfig {
    if let Ok(path) = std::env::var("EVOLVE_CONFIG") {
        let path = PathBuf::from(&path);
        if path.exists() {
            info!("Loading config from EVOLVE_CONFIG: {}", path.display());
            return load_from_path(&path);
        }
        warn!(
            "EVOLVE_CONFIG={} not found, searching defaults",
            path.display()
        );
    }

    if let Some(path) = CONFIG_SEARCH_PATHS
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
    {
        info!("Loading config from {}", path.display());
        return load_from_path(path);
    }

    debug!("No config.toml found, using built-in defaults");
    apply_env_overrides(CentralConfig::default())
}

/// Read one config file.
///
/// An unreadable or malformed file falls back to the built-in defaults; the
/// environment overrides are applied either way.
pub fn load_from_path(path: &Path) -> CentralConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => apply_env_overrides(config),
            Err(e) => {
                warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                apply_env_overrides(CentralConfig::default())
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}, using defaults", path.display(), e);
            apply_env_overrides(CentralConfig::default())
        }
    }
}

/// Parse a learning-rate table written as `step:rate` pairs separated by commas,
/// e.g. `0:0.01,400000:0.001`.
pub fn parse_lr_schedule(raw: &str) -> Option<Vec<(u64, f64)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (step, rate) = entry.split_once(':')?;
            Some((step.trim().parse().ok()?, rate.trim().parse().ok()?))
        })
        .collect()
}

/// Macro to reduce env override boilerplate
macro_rules! env_override {
    // String field
    ($config:expr, $section:ident . $field:ident, $key:expr) => {
        if let Ok(v) = std::env::var($key) {
            $config.$section.$field = v;
        }
    };
    // Parseable field (u32, u64, usize, bool, etc.)
    ($config:expr, $section:ident . $field:ident, $key:expr, parse) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$section.$field = v;
        }
    };
    // Optional parseable field (Option<bool>, Option<u64>, etc.)
    ($config:expr, $section:ident . $field:ident, $key:expr, optional_parse) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$section.$field = Some(v);
        }
    };
}

/// Apply environment variable overrides to a configuration.
///
/// Environment variables follow the pattern: EVOLVE_<SECTION>_<KEY>
pub fn apply_env_overrides(mut config: CentralConfig) -> CentralConfig {
    // Common
    env_override!(config, common.data_dir, "EVOLVE_COMMON_DATA_DIR");
    env_override!(config, common.env_id, "EVOLVE_COMMON_ENV_ID");
    env_override!(config, common.log_level, "EVOLVE_COMMON_LOG_LEVEL");

    // Evolve
    env_override!(
        config,
        evolve.max_iterations,
        "EVOLVE_EVOLVE_MAX_ITERATIONS",
        parse
    );
    env_override!(
        config,
        evolve.skip_evaluation,
        "EVOLVE_EVOLVE_SKIP_EVALUATION",
        parse
    );
    env_override!(
        config,
        evolve.force_accelerated_training,
        "EVOLVE_EVOLVE_FORCE_ACCELERATED_TRAINING",
        parse
    );
    env_override!(
        config,
        evolve.large_config,
        "EVOLVE_EVOLVE_LARGE_CONFIG",
        optional_parse
    );

    // Self-play
    env_override!(
        config,
        self_play.target_file_count,
        "EVOLVE_SELF_PLAY_TARGET_FILE_COUNT",
        parse
    );
    env_override!(
        config,
        self_play.poll_interval_secs,
        "EVOLVE_SELF_PLAY_POLL_INTERVAL_SECS",
        parse
    );
    env_override!(
        config,
        self_play.timeout_secs,
        "EVOLVE_SELF_PLAY_TIMEOUT_SECS",
        parse
    );
    env_override!(
        config,
        self_play.shutdown_grace_secs,
        "EVOLVE_SELF_PLAY_SHUTDOWN_GRACE_SECS",
        parse
    );
    env_override!(config, self_play.command, "EVOLVE_SELF_PLAY_COMMAND");

    // Trainer
    env_override!(
        config,
        trainer.min_files_to_train,
        "EVOLVE_TRAINER_MIN_FILES_TO_TRAIN",
        parse
    );
    env_override!(
        config,
        trainer.dataset_size,
        "EVOLVE_TRAINER_DATASET_SIZE",
        parse
    );
    env_override!(config, trainer.batch_size, "EVOLVE_TRAINER_BATCH_SIZE", parse);
    env_override!(config, trainer.workers, "EVOLVE_TRAINER_WORKERS", parse);
    env_override!(
        config,
        trainer.epochs_per_round,
        "EVOLVE_TRAINER_EPOCHS_PER_ROUND",
        parse
    );
    env_override!(
        config,
        trainer.start_total_steps,
        "EVOLVE_TRAINER_START_TOTAL_STEPS",
        parse
    );
    env_override!(
        config,
        trainer.max_files_per_round,
        "EVOLVE_TRAINER_MAX_FILES_PER_ROUND",
        parse
    );
    env_override!(
        config,
        trainer.shuffle_seed,
        "EVOLVE_TRAINER_SHUFFLE_SEED",
        optional_parse
    );
    if let Ok(raw) = std::env::var("EVOLVE_TRAINER_LR_SCHEDULE") {
        match parse_lr_schedule(&raw) {
            Some(schedule) => config.trainer.lr_schedule = schedule,
            None => warn!("Ignoring malformed EVOLVE_TRAINER_LR_SCHEDULE={}", raw),
        }
    }

    // Evaluation
    env_override!(config, evaluation.command, "EVOLVE_EVALUATION_COMMAND");

    config
}

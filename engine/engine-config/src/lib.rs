//! Centralized configuration loading from config.toml.
//!
//! This crate provides the configuration structs and loading logic shared by
//! the evolver service and the reference game binaries.
//!
//! # Configuration Priority
//!
//! Settings are loaded with the following priority (highest to lowest):
//! 1. Command-line flags (applied by each binary on top of this crate)
//! 2. Environment variables (`EVOLVE_<SECTION>_<KEY>`)
//! 3. config.toml file
//! 4. Built-in defaults (`config.defaults.toml`, embedded at compile time)
//!
//! # Environment Variable Override Pattern
//!
//! ```text
//! EVOLVE_<SECTION>_<KEY>=value
//!
//! Examples:
//!     EVOLVE_COMMON_DATA_DIR=/data
//!     EVOLVE_EVOLVE_MAX_ITERATIONS=10
//!     EVOLVE_SELF_PLAY_TARGET_FILE_COUNT=300
//!     EVOLVE_TRAINER_LR_SCHEDULE=0:0.01,400000:0.001
//! ```

mod defaults;
mod loader;
mod structs;

pub use defaults::*;
pub use loader::{
    apply_env_overrides, load_config, load_from_path, parse_lr_schedule, CONFIG_SEARCH_PATHS,
};
pub use structs::*;

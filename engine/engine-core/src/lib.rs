//! Core traits and types shared by the evolver components
//!
//! This crate provides the contracts between the training control loop and its
//! collaborators:
//! - `Environment`: game rules and the deterministic position encoding
//! - `PolicyValueNet`: the trainable model with its checkpoint API
//! - `ComputeContext` / `ResourceAssignment`: explicit device binding
//! - `GameRecord`: the on-disk game-record format written by self-play
//! - Registry: static registration of environments by env_id

pub mod compute;
pub mod environment;
pub mod network;
pub mod record;
pub mod registry;

// Re-export main types for convenience
pub use compute::{ComputeContext, ResourceAssignment};
pub use environment::{require_action_index, EnvError, Environment};
pub use network::{NetError, PolicyValueNet, TrainingBatch};
pub use record::{is_record_file, list_record_files, record_file_name, GameRecord, RecordError};
pub use registry::{
    clear_registry, create_environment, is_registered, list_registered_environments,
    register_environment, EnvironmentFactory,
};

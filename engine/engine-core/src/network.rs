//! Network contract used by the training pipeline and the checkpoint store.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::compute::ComputeContext;

/// Errors raised by a [`PolicyValueNet`].
#[derive(Debug, Error)]
pub enum NetError {
    #[error("model has not been built")]
    NotBuilt,

    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("invalid model file: {0}")]
    Format(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Parallel arrays handed to a single training call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingBatch {
    pub states: Vec<Vec<f32>>,
    pub policies: Vec<Vec<f32>>,
    pub values: Vec<f32>,
}

impl TrainingBatch {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A trainable policy/value model.
///
/// Implementations own their weights; the checkpoint store only decides where
/// the (config, weights) pair lives. `train` is a blocking call and is run on
/// the blocking pool by the caller.
pub trait PolicyValueNet: Send {
    /// Initialise fresh weights.
    fn build(&mut self);

    /// Whether weights are present (built or loaded).
    fn is_built(&self) -> bool;

    /// Write config and weights to the given paths.
    fn save(&self, config_path: &Path, weight_path: &Path) -> Result<(), NetError>;

    /// Load config and weights. Returns `Ok(false)` when either file is missing.
    fn load(&mut self, config_path: &Path, weight_path: &Path) -> Result<bool, NetError>;

    /// Train on `batch` and return the number of optimizer steps taken.
    fn train(
        &mut self,
        batch: &TrainingBatch,
        batch_size: usize,
        epochs: u32,
    ) -> Result<u64, NetError>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);

    /// Bind a freshly built compute context, replacing any previous one.
    fn bind_context(&mut self, context: ComputeContext) -> Result<(), NetError>;
}

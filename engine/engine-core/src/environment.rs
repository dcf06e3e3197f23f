//! Environment contract: game rules plus the deterministic position encoding.
//!
//! States and actions cross this boundary as strings so game records stay
//! readable and environment-agnostic. The action-label space is fixed and
//! finite; the policy target for a ply is one-hot over `action_labels()`.

use std::fmt;
use thiserror::Error;

/// Errors raised while replaying or encoding a position.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("invalid state encoding: {0}")]
    InvalidState(String),

    #[error("unknown action label: {0}")]
    UnknownAction(String),

    #[error("illegal move {action} in state {state}")]
    IllegalMove { state: String, action: String },
}

/// Game rules used to replay game records into training examples.
///
/// `encode` must be a pure function of the state: replaying the same record
/// twice has to yield identical arrays.
pub trait Environment: Send + Sync + fmt::Debug {
    /// Registry key for this environment (e.g. "tictactoe")
    fn env_id(&self) -> &str;

    /// Starting position of a fresh game.
    fn initial_state(&self) -> String;

    /// The fixed, ordered action-label space.
    fn action_labels(&self) -> &[String];

    /// Position of `label` in [`Environment::action_labels`].
    fn action_index(&self, label: &str) -> Option<usize> {
        self.action_labels().iter().position(|l| l == label)
    }

    /// Apply `action` to `state` and return the successor state.
    fn step(&self, state: &str, action: &str) -> Result<String, EnvError>;

    /// Encode a state into a flat feature vector of `observation_size()` floats.
    fn encode(&self, state: &str) -> Result<Vec<f32>, EnvError>;

    /// Length of every vector returned by [`Environment::encode`].
    fn observation_size(&self) -> usize;

    /// Legal action labels in `state`; empty once the game is over.
    fn legal_actions(&self, state: &str) -> Result<Vec<String>, EnvError>;
}

/// Position of `label` in `labels`, or `EnvError::UnknownAction`.
pub fn require_action_index(env: &dyn Environment, label: &str) -> Result<usize, EnvError> {
    env.action_index(label)
        .ok_or_else(|| EnvError::UnknownAction(label.to_string()))
}

//! Resource arbiter: which compute class each phase runs on.
//!
//! Assignment is a pure function of the phase and the configuration. The
//! caller compares consecutive assignments and rebuilds its compute context
//! when they differ.

use engine_core::ResourceAssignment;

use crate::controller::Phase;

/// Above this many target files a configuration counts as large.
pub const LARGE_CONFIG_FILE_THRESHOLD: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterConfig {
    /// Explicit override; inferred from `target_file_count` when `None`
    pub large_config: Option<bool>,
    pub target_file_count: usize,
    pub force_accelerated_training: bool,
}

impl ArbiterConfig {
    pub fn is_large(&self) -> bool {
        self.large_config
            .unwrap_or(self.target_file_count > LARGE_CONFIG_FILE_THRESHOLD)
    }

    /// Human-readable device mode for the start-of-run banner.
    pub fn device_mode(&self) -> &'static str {
        if self.force_accelerated_training {
            "all-accelerated"
        } else if self.is_large() {
            "all-general"
        } else {
            "mixed"
        }
    }
}

pub fn assign(phase: Phase, config: &ArbiterConfig) -> ResourceAssignment {
    match phase {
        // Evaluation plays games, so it follows the self-play rule.
        Phase::SelfPlay | Phase::Evaluation => {
            if config.is_large() {
                ResourceAssignment::General
            } else {
                ResourceAssignment::Accelerated
            }
        }
        Phase::Training => {
            if config.force_accelerated_training {
                ResourceAssignment::Accelerated
            } else {
                ResourceAssignment::General
            }
        }
        Phase::Idle | Phase::Cooldown | Phase::Stopped => ResourceAssignment::General,
    }
}

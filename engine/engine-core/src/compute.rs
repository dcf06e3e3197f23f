//! Device assignment and the compute context bound into a network.
//!
//! A `ComputeContext` is a value, not ambient process state: whoever owns the
//! network builds a fresh context whenever the device assignment changes and
//! binds it explicitly. Contexts are never mutated in place.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Which class of compute a phase runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAssignment {
    /// GPU or other accelerator
    Accelerated,
    /// General-purpose CPU compute
    General,
}

impl ResourceAssignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceAssignment::Accelerated => "accelerated",
            ResourceAssignment::General => "general",
        }
    }
}

impl fmt::Display for ResourceAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An in-process compute context for one device assignment.
///
/// Each call to [`ComputeContext::new`] yields a distinct generation, so a
/// network can tell a rebuilt context from the one it already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeContext {
    assignment: ResourceAssignment,
    generation: u64,
}

impl ComputeContext {
    pub fn new(assignment: ResourceAssignment) -> Self {
        Self {
            assignment,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn assignment(&self) -> ResourceAssignment {
        self.assignment
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebuilt_context_has_new_generation() {
        let first = ComputeContext::new(ResourceAssignment::General);
        let second = ComputeContext::new(ResourceAssignment::General);
        assert_eq!(first.assignment(), second.assignment());
        assert_ne!(first.generation(), second.generation());
        assert_ne!(first, second);
    }

    #[test]
    fn test_assignment_display() {
        assert_eq!(ResourceAssignment::Accelerated.to_string(), "accelerated");
        assert_eq!(ResourceAssignment::General.to_string(), "general");
    }
}

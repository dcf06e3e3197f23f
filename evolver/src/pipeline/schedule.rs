//! Step-indexed learning-rate table.

/// Ascending `(step, rate)` thresholds. The rate for a step is the one with
/// the greatest threshold not above it.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningRateSchedule {
    table: Vec<(u64, f64)>,
}

impl LearningRateSchedule {
    pub fn new(mut table: Vec<(u64, f64)>) -> Self {
        table.sort_by_key(|&(step, _)| step);
        Self { table }
    }

    /// `None` when every threshold is above `step`; the rate stays unchanged.
    pub fn rate_at(&self, step: u64) -> Option<f64> {
        self.table
            .iter()
            .take_while(|&&(threshold, _)| threshold <= step)
            .last()
            .map(|&(_, rate)| rate)
    }
}

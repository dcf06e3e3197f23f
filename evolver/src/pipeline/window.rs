//! Capacity-bounded FIFO window of training examples.

use engine_core::TrainingBatch;
use std::collections::VecDeque;

/// One training example derived from a single ply of a game record.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub state: Vec<f32>,
    pub policy: Vec<f32>,
    pub value: f32,
}

/// Three parallel sequences that never exceed `capacity`; the oldest
/// examples are evicted first.
#[derive(Debug)]
pub struct DatasetWindow {
    capacity: usize,
    states: VecDeque<Vec<f32>>,
    policies: VecDeque<Vec<f32>>,
    values: VecDeque<f32>,
}

impl DatasetWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            states: VecDeque::new(),
            policies: VecDeque::new(),
            values: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Append examples, evicting from the front. Returns how many were evicted.
    pub fn extend(&mut self, examples: impl IntoIterator<Item = TrainingExample>) -> usize {
        let mut evicted = 0;
        for example in examples {
            self.states.push_back(example.state);
            self.policies.push_back(example.policy);
            self.values.push_back(example.value);

            if self.values.len() > self.capacity {
                self.states.pop_front();
                self.policies.pop_front();
                self.values.pop_front();
                evicted += 1;
            }
        }
        evicted
    }

    /// Move every example into a training batch, leaving the window empty.
    pub fn drain_batch(&mut self) -> TrainingBatch {
        TrainingBatch {
            states: self.states.drain(..).collect(),
            policies: self.policies.drain(..).collect(),
            values: self.values.drain(..).collect(),
        }
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.policies.clear();
        self.values.clear();
    }
}

//! Baseline policy/value network.
//!
//! A single linear layer per head: softmax over the action space for the
//! policy and tanh for the value, trained with plain minibatch SGD on the
//! sum of cross-entropy and squared error. Config and weights are JSON.

use engine_core::{ComputeContext, NetError, PolicyValueNet, TrainingBatch};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

const INIT_SCALE: f32 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    pub observation_size: usize,
    pub num_actions: usize,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Weights {
    /// Row-major `num_actions x observation_size`
    policy: Vec<f32>,
    policy_bias: Vec<f32>,
    value: Vec<f32>,
    value_bias: f32,
}

impl Weights {
    fn random(config: &NetConfig, rng: &mut impl Rng) -> Self {
        let mut sample = |n: usize| -> Vec<f32> {
            (0..n)
                .map(|_| rng.gen_range(-INIT_SCALE..INIT_SCALE))
                .collect()
        };
        Self {
            policy: sample(config.num_actions * config.observation_size),
            policy_bias: vec![0.0; config.num_actions],
            value: sample(config.observation_size),
            value_bias: 0.0,
        }
    }

    fn check(&self, config: &NetConfig) -> Result<(), NetError> {
        let expect = |expected: usize, got: usize| {
            if expected == got {
                Ok(())
            } else {
                Err(NetError::ShapeMismatch { expected, got })
            }
        };
        expect(config.num_actions * config.observation_size, self.policy.len())?;
        expect(config.num_actions, self.policy_bias.len())?;
        expect(config.observation_size, self.value.len())
    }
}

pub struct LinearPolicyValueNet {
    config: NetConfig,
    weights: Option<Weights>,
    context: Option<ComputeContext>,
    seed: Option<u64>,
}

impl LinearPolicyValueNet {
    pub fn new(observation_size: usize, num_actions: usize, learning_rate: f64) -> Self {
        Self {
            config: NetConfig {
                observation_size,
                num_actions,
                learning_rate,
            },
            weights: None,
            context: None,
            seed: None,
        }
    }

    /// Fix the initialisation seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn context(&self) -> Option<&ComputeContext> {
        self.context.as_ref()
    }

    /// Policy distribution and value for one encoded state.
    pub fn predict(&self, state: &[f32]) -> Result<(Vec<f32>, f32), NetError> {
        let weights = self.weights.as_ref().ok_or(NetError::NotBuilt)?;
        self.check_input(state)?;
        Ok(forward(&self.config, weights, state))
    }

    fn check_input(&self, state: &[f32]) -> Result<(), NetError> {
        if state.len() != self.config.observation_size {
            return Err(NetError::ShapeMismatch {
                expected: self.config.observation_size,
                got: state.len(),
            });
        }
        Ok(())
    }

    fn check_batch(&self, batch: &TrainingBatch) -> Result<(), NetError> {
        for (state, policy) in batch.states.iter().zip(&batch.policies) {
            self.check_input(state)?;
            if policy.len() != self.config.num_actions {
                return Err(NetError::ShapeMismatch {
                    expected: self.config.num_actions,
                    got: policy.len(),
                });
            }
        }
        if batch.states.len() != batch.len() || batch.policies.len() != batch.len() {
            return Err(NetError::ShapeMismatch {
                expected: batch.len(),
                got: batch.states.len().min(batch.policies.len()),
            });
        }
        Ok(())
    }
}

fn forward(config: &NetConfig, weights: &Weights, state: &[f32]) -> (Vec<f32>, f32) {
    let n = config.observation_size;
    let logits: Vec<f32> = (0..config.num_actions)
        .map(|a| dot(&weights.policy[a * n..(a + 1) * n], state) + weights.policy_bias[a])
        .collect();
    let value = (dot(&weights.value, state) + weights.value_bias).tanh();
    (softmax(&logits), value)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / total).collect()
}

fn read_file(path: &Path) -> Result<Option<Vec<u8>>, NetError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl PolicyValueNet for LinearPolicyValueNet {
    fn build(&mut self) {
        let mut rng = match self.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        self.weights = Some(Weights::random(&self.config, &mut rng));
    }

    fn is_built(&self) -> bool {
        self.weights.is_some()
    }

    fn save(&self, config_path: &Path, weight_path: &Path) -> Result<(), NetError> {
        let weights = self.weights.as_ref().ok_or(NetError::NotBuilt)?;
        let config =
            serde_json::to_vec_pretty(&self.config).map_err(|e| NetError::Format(e.to_string()))?;
        let weights =
            serde_json::to_vec(weights).map_err(|e| NetError::Format(e.to_string()))?;
        fs::write(config_path, config)?;
        fs::write(weight_path, weights)?;
        Ok(())
    }

    fn load(&mut self, config_path: &Path, weight_path: &Path) -> Result<bool, NetError> {
        let (Some(config), Some(weights)) = (read_file(config_path)?, read_file(weight_path)?)
        else {
            return Ok(false);
        };
        let config: NetConfig =
            serde_json::from_slice(&config).map_err(|e| NetError::Format(e.to_string()))?;
        let weights: Weights =
            serde_json::from_slice(&weights).map_err(|e| NetError::Format(e.to_string()))?;

        if config.observation_size != self.config.observation_size {
            return Err(NetError::ShapeMismatch {
                expected: self.config.observation_size,
                got: config.observation_size,
            });
        }
        if config.num_actions != self.config.num_actions {
            return Err(NetError::ShapeMismatch {
                expected: self.config.num_actions,
                got: config.num_actions,
            });
        }
        weights.check(&config)?;

        self.config = config;
        self.weights = Some(weights);
        Ok(true)
    }

    fn train(
        &mut self,
        batch: &TrainingBatch,
        batch_size: usize,
        epochs: u32,
    ) -> Result<u64, NetError> {
        if batch_size == 0 {
            return Err(NetError::ShapeMismatch {
                expected: 1,
                got: 0,
            });
        }
        self.check_batch(batch)?;
        let config = self.config.clone();
        let weights = self.weights.as_mut().ok_or(NetError::NotBuilt)?;

        let n = config.observation_size;
        let lr = config.learning_rate as f32;
        let full_batches = batch.len() / batch_size;
        let mut steps = 0u64;

        for _ in 0..epochs {
            for b in 0..full_batches {
                let range = b * batch_size..(b + 1) * batch_size;
                let mut grad_policy = vec![0.0f32; weights.policy.len()];
                let mut grad_policy_bias = vec![0.0f32; config.num_actions];
                let mut grad_value = vec![0.0f32; n];
                let mut grad_value_bias = 0.0f32;

                for i in range {
                    let state = &batch.states[i];
                    let (probs, value) = forward(&config, weights, state);

                    for a in 0..config.num_actions {
                        let d = probs[a] - batch.policies[i][a];
                        grad_policy_bias[a] += d;
                        for (g, x) in grad_policy[a * n..(a + 1) * n].iter_mut().zip(state) {
                            *g += d * x;
                        }
                    }

                    let d = 2.0 * (value - batch.values[i]) * (1.0 - value * value);
                    grad_value_bias += d;
                    for (g, x) in grad_value.iter_mut().zip(state) {
                        *g += d * x;
                    }
                }

                let scale = lr / batch_size as f32;
                for (w, g) in weights.policy.iter_mut().zip(&grad_policy) {
                    *w -= scale * g;
                }
                for (w, g) in weights.policy_bias.iter_mut().zip(&grad_policy_bias) {
                    *w -= scale * g;
                }
                for (w, g) in weights.value.iter_mut().zip(&grad_value) {
                    *w -= scale * g;
                }
                weights.value_bias -= scale * grad_value_bias;
                steps += 1;
            }
        }

        Ok(steps)
    }

    fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.learning_rate = lr;
    }

    fn bind_context(&mut self, context: ComputeContext) -> Result<(), NetError> {
        debug!(
            assignment = %context.assignment(),
            generation = context.generation(),
            "Binding compute context"
        );
        self.context = Some(context);
        Ok(())
    }
}

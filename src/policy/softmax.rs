//! Linear softmax policy with a tanh value head.
//!
//! Features are the previous token and the current stack depth:
//!
//! ```text
//! logit(a | s) = bias[a] + after[prev(s)][a] + at_depth[depth(s)][a]
//! value(s)     = tanh(value_bias + value_depth[depth(s)] + value_len · len(s) / max_len)
//! ```
//!
//! `prev(s)` of an empty state is the End token's id, which never occurs as
//! a formula token.

use serde::{Deserialize, Serialize};

use super::{Decision, PolicyValue, Prediction, TrainablePolicy};
use crate::error::PolicyContractError;
use crate::token::{PartialState, TokenId};

/// Per-step gradient clip.
const GRAD_CLIP: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxPolicy {
    num_tokens: usize,
    max_len: usize,
    bias: Vec<f64>,
    /// `num_tokens × num_tokens`, row = previous token.
    after: Vec<f64>,
    /// `(max_len + 1) × num_tokens`, row = stack depth.
    at_depth: Vec<f64>,
    value_bias: f64,
    value_depth: Vec<f64>,
    value_len: f64,
}

impl SoftmaxPolicy {
    /// All-zero parameters: uniform priors, zero value.
    #[must_use]
    pub fn new(num_tokens: usize, max_len: usize) -> Self {
        Self {
            num_tokens,
            max_len,
            bias: vec![0.0; num_tokens],
            after: vec![0.0; num_tokens * num_tokens],
            at_depth: vec![0.0; (max_len + 1) * num_tokens],
            value_bias: 0.0,
            value_depth: vec![0.0; max_len + 1],
            value_len: 0.0,
        }
    }

    /// Vocabulary size the parameters were shaped for.
    #[must_use]
    pub fn num_tokens(&self) -> usize {
        self.num_tokens
    }

    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    fn prev(state: &PartialState) -> usize {
        state.tokens().last().map_or(0, |id| id.index())
    }

    fn depth(&self, state: &PartialState) -> usize {
        state.depth().min(self.max_len)
    }

    fn logit(&self, state: &PartialState, action: TokenId) -> f64 {
        let a = action.index();
        let n = self.num_tokens;
        let bias = self.bias.get(a).copied().unwrap_or(0.0);
        let after = if a < n {
            self.after.get(Self::prev(state) * n + a).copied().unwrap_or(0.0)
        } else {
            0.0
        };
        let at_depth = if a < n {
            self.at_depth.get(self.depth(state) * n + a).copied().unwrap_or(0.0)
        } else {
            0.0
        };
        bias + after + at_depth
    }

    /// Softmax over `legal`, max-shifted.
    fn probabilities(&self, state: &PartialState, legal: &[TokenId]) -> Vec<f64> {
        let logits: Vec<f64> = legal.iter().map(|&id| self.logit(state, id)).collect();
        let max_logit = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
        let sum: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / sum).collect()
    }

    fn value_input(&self, state: &PartialState) -> f64 {
        let len_frac = state.len() as f64 / self.max_len.max(1) as f64;
        self.value_bias
            + self.value_depth.get(self.depth(state)).copied().unwrap_or(0.0)
            + self.value_len * len_frac
    }

    fn nudge(&mut self, state: &PartialState, action: TokenId, step: f64) {
        let a = action.index();
        let n = self.num_tokens;
        if a >= n {
            return;
        }
        let prev = Self::prev(state);
        let depth = self.depth(state);
        if let Some(w) = self.bias.get_mut(a) {
            *w += step;
        }
        if let Some(w) = self.after.get_mut(prev * n + a) {
            *w += step;
        }
        if let Some(w) = self.at_depth.get_mut(depth * n + a) {
            *w += step;
        }
    }
}

impl PolicyValue for SoftmaxPolicy {
    fn predict(&self, state: &PartialState, legal: &[TokenId]) -> Result<Prediction, PolicyContractError> {
        let value = self.value_input(state).tanh();
        if legal.is_empty() {
            return Ok(Prediction {
                priors: Vec::new(),
                value,
            });
        }
        let priors = legal
            .iter()
            .copied()
            .zip(self.probabilities(state, legal))
            .collect();
        Ok(Prediction { priors, value })
    }
}

impl TrainablePolicy for SoftmaxPolicy {
    fn reinforce(&mut self, trajectory: &[Decision], weight: f64, lr: f64) -> f64 {
        if weight == 0.0 || lr == 0.0 {
            return 0.0;
        }
        let mut total = 0.0;
        for decision in trajectory {
            if decision.legal.is_empty() {
                continue;
            }
            // ∂ log softmax(a) / ∂ logit(b) = 1[a = b] - p(b)
            let probs = self.probabilities(&decision.state, &decision.legal);
            for (&id, p) in decision.legal.iter().zip(probs) {
                let indicator = if id == decision.action { 1.0 } else { 0.0 };
                let grad = (weight * (indicator - p)).clamp(-GRAD_CLIP, GRAD_CLIP);
                if !grad.is_finite() {
                    continue;
                }
                self.nudge(&decision.state, id, lr * grad);
                total += grad.abs();
            }
        }
        total
    }

    fn fit_value(&mut self, trajectory: &[Decision], target: f64, lr: f64) -> f64 {
        if trajectory.is_empty() {
            return 0.0;
        }
        let mut loss = 0.0;
        for decision in trajectory {
            let state = &decision.state;
            let pred = self.value_input(state).tanh();
            let diff = pred - target;
            loss += diff * diff;
            // MSE through tanh.
            let d_input = (2.0 * diff * (1.0 - pred * pred)).clamp(-GRAD_CLIP, GRAD_CLIP);
            let len_frac = state.len() as f64 / self.max_len.max(1) as f64;
            let depth = self.depth(state);
            self.value_bias -= lr * d_input;
            if let Some(w) = self.value_depth.get_mut(depth) {
                *w -= lr * d_input;
            }
            self.value_len -= lr * d_input * len_frac;
        }
        loss / trajectory.len() as f64
    }
}

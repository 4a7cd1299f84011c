//! Risk-seeking policy optimizer.
//!
//! Tracks the α-quantile τ of search rewards with a stochastic
//! quantile-regression step and trains the policy only on trajectories that
//! beat it:
//!
//! ```text
//! τ ← τ + β · (α − 1[r ≤ τ])
//! w = r − τ   if r > τ
//!     0       otherwise
//! ```
//!
//! A zero weight means no gradient at all, not a small one: the policy is
//! left untouched.

use log::debug;

use crate::config::OptimizerConfig;
use crate::policy::{Decision, TrainablePolicy};

/// What one optimizer step did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OptimizerStep {
    /// Threshold after the update.
    pub threshold: f64,
    /// Gate weight `r − τ`, or exactly 0.
    pub weight: f64,
    /// Whether the policy received a gradient.
    pub updated: bool,
    /// Gradient magnitude reported by the policy.
    pub gradient: f64,
}

#[derive(Clone, Debug)]
pub struct RiskSeekingOptimizer {
    config: OptimizerConfig,
    threshold: f64,
    steps: usize,
}

impl RiskSeekingOptimizer {
    #[must_use]
    pub fn new(config: OptimizerConfig) -> Self {
        let threshold = config.initial_threshold;
        Self {
            config,
            threshold,
            steps: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Current quantile estimate τ.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Restore τ, e.g. from a checkpoint.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Gate weight of `reward` against the current τ.
    #[must_use]
    pub fn gate(&self, reward: f64) -> f64 {
        if reward > self.threshold {
            reward - self.threshold
        } else {
            0.0
        }
    }

    /// One quantile-regression step. Returns the new τ.
    pub fn update_threshold(&mut self, reward: f64) -> f64 {
        let below = if reward <= self.threshold { 1.0 } else { 0.0 };
        self.threshold += self.config.beta * (self.config.quantile - below);
        self.threshold
    }

    /// Update τ with `reward`, then reinforce `trajectory` if it beats τ.
    pub fn step<P: TrainablePolicy>(&mut self, policy: &mut P, trajectory: &[Decision], reward: f64) -> OptimizerStep {
        self.steps += 1;
        let threshold = self.update_threshold(reward);
        let weight = self.gate(reward);

        if weight == 0.0 || trajectory.is_empty() {
            debug!("Reward {:.4} at or below threshold {:.4}; no update", reward, threshold);
            return OptimizerStep {
                threshold,
                weight,
                updated: false,
                gradient: 0.0,
            };
        }

        let gradient = policy.reinforce(trajectory, weight, self.config.gamma);
        policy.fit_value(trajectory, reward, self.config.gamma);
        debug!(
            "Reward {:.4} above threshold {:.4}; weight {:.4}, gradient {:.4}",
            reward, threshold, weight, gradient
        );
        OptimizerStep {
            threshold,
            weight,
            updated: true,
            gradient,
        }
    }
}

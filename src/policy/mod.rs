//! # Policy / Value Provider
//!
//! The search asks a [`PolicyValue`] for priors over the legal next tokens
//! and a value estimate of the current state:
//!
//! | Search (AlphaZero) | Formula mining |
//! |--------------------|----------------|
//! | Board position | [`PartialState`] |
//! | Legal moves | tokens passing `is_extendable` |
//! | Policy head | prior per legal token |
//! | Value head | expected terminal reward |
//! | Game outcome | adjusted IC of the finished formula |
//!
//! Providers are external collaborators, so every prediction is checked by
//! [`check_prediction`] before the search trusts it. A violation is a
//! [`PolicyContractError`] and ends the run.

mod softmax;


pub use softmax::SoftmaxPolicy;

use serde::{Deserialize, Serialize};

use crate::error::PolicyContractError;
use crate::token::{PartialState, TokenId};

/// Tolerance on the sum of priors.
pub const PRIOR_SUM_TOLERANCE: f64 = 1e-6;

/// Priors over the legal actions plus a value estimate.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub priors: Vec<(TokenId, f64)>,
    pub value: f64,
}

/// One committed choice: where the search stood, what it could do, what it did.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub state: PartialState,
    pub legal: Vec<TokenId>,
    pub action: TokenId,
}

/// Source of priors and value estimates for the search.
pub trait PolicyValue {
    /// Priors summing to 1 over exactly `legal`, plus a finite value.
    fn predict(&self, state: &PartialState, legal: &[TokenId]) -> Result<Prediction, PolicyContractError>;
}

/// A policy the risk-seeking optimizer can update.
pub trait TrainablePolicy: PolicyValue {
    /// Policy-gradient ascent on `log π(action | state)` for every decision,
    /// scaled by `weight` and `lr`. Returns the total gradient magnitude.
    fn reinforce(&mut self, trajectory: &[Decision], weight: f64, lr: f64) -> f64;

    /// Regress the value head of every visited state toward `target`.
    /// Returns the mean squared error before the update.
    fn fit_value(&mut self, trajectory: &[Decision], target: f64, lr: f64) -> f64;
}

/// Validate a provider's answer against the legal set.
pub fn check_prediction(prediction: &Prediction, legal: &[TokenId]) -> Result<(), PolicyContractError> {
    if !prediction.value.is_finite() {
        return Err(PolicyContractError::InvalidValue(prediction.value));
    }

    let mut seen = vec![false; legal.len()];
    let mut sum = 0.0;
    for &(token, prior) in &prediction.priors {
        let slot = legal
            .iter()
            .position(|&id| id == token)
            .ok_or(PolicyContractError::IllegalAction(token.index()))?;
        if seen[slot] {
            return Err(PolicyContractError::DuplicateAction(token.index()));
        }
        seen[slot] = true;
        if !prior.is_finite() || prior < 0.0 {
            return Err(PolicyContractError::InvalidPrior {
                token: token.index(),
                value: prior,
            });
        }
        sum += prior;
    }

    if let Some(missing) = seen.iter().position(|&covered| !covered) {
        return Err(PolicyContractError::MissingAction(legal[missing].index()));
    }
    if !legal.is_empty() && (sum - 1.0).abs() > PRIOR_SUM_TOLERANCE {
        return Err(PolicyContractError::NotNormalized(sum));
    }
    Ok(())
}

/// Equal priors and a zero value. Nothing to learn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UniformPolicy;

impl PolicyValue for UniformPolicy {
    fn predict(&self, _state: &PartialState, legal: &[TokenId]) -> Result<Prediction, PolicyContractError> {
        let prior = 1.0 / legal.len().max(1) as f64;
        Ok(Prediction {
            priors: legal.iter().map(|&id| (id, prior)).collect(),
            value: 0.0,
        })
    }
}

impl TrainablePolicy for UniformPolicy {
    fn reinforce(&mut self, _trajectory: &[Decision], _weight: f64, _lr: f64) -> f64 {
        0.0
    }

    fn fit_value(&mut self, _trajectory: &[Decision], target: f64, _lr: f64) -> f64 {
        target * target
    }
}

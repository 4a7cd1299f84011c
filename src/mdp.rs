//! The alpha-mining MDP.
//!
//! State is a [`PartialState`], an action is the next legal token, and the
//! transition appends it. Reward is zero everywhere except at a terminal
//! state, where the formula is scored against the current pool without being
//! committed to it. Because the pool changes between cycles, the same formula
//! can earn different rewards over a run.

use log::{debug, warn};

use crate::data::{FeatureData, Series};
use crate::error::FormulaError;
use crate::evaluator::FormulaEvaluator;
use crate::formula::Formula;
use crate::pool::AlphaPool;
use crate::token::{PartialState, RpnValidator, TokenId, TokenRegistry};

/// A finished episode: the formula, its signal and the reward it earned.
#[derive(Clone, Debug)]
pub struct TerminalOutcome {
    pub formula: Formula,
    pub signal: Series,
    pub reward: f64,
}

pub struct AlphaMiningMdp<'a> {
    registry: &'a TokenRegistry,
    validator: RpnValidator,
    evaluator: FormulaEvaluator<'a>,
    features: &'a FeatureData,
    target: &'a Series,
}

impl<'a> AlphaMiningMdp<'a> {
    #[must_use]
    pub fn new(
        registry: &'a TokenRegistry,
        validator: RpnValidator,
        features: &'a FeatureData,
        target: &'a Series,
    ) -> Self {
        Self {
            registry,
            validator,
            evaluator: FormulaEvaluator::new(registry),
            features,
            target,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &'a TokenRegistry {
        self.registry
    }

    #[must_use]
    pub fn validator(&self) -> &RpnValidator {
        &self.validator
    }

    #[must_use]
    pub fn evaluator(&self) -> &FormulaEvaluator<'a> {
        &self.evaluator
    }

    #[must_use]
    pub fn features(&self) -> &'a FeatureData {
        self.features
    }

    #[must_use]
    pub fn target(&self) -> &'a Series {
        self.target
    }

    #[must_use]
    pub fn initial_state(&self) -> PartialState {
        PartialState::new()
    }

    /// Legal next tokens in registration order. Empty once the episode is over.
    #[must_use]
    pub fn legal_actions(&self, state: &PartialState) -> Vec<TokenId> {
        if self.is_done(state) {
            return Vec::new();
        }
        self.validator.legal_actions(self.registry, state)
    }

    /// Append `action`, refusing anything the grammar does not allow.
    pub fn step(&self, state: &PartialState, action: TokenId) -> Result<PartialState, FormulaError> {
        let token = self
            .registry
            .get(action)
            .ok_or(FormulaError::UnknownTokenId(action.index()))?;
        if !self.validator.is_extendable(state, token) {
            return Err(FormulaError::IllegalExtension {
                position: state.len(),
                token: token.name(),
            });
        }
        Ok(state.with(action, token))
    }

    /// The episode is over once End was chosen or the length cap is reached.
    #[must_use]
    pub fn is_done(&self, state: &PartialState) -> bool {
        state.is_closed() || self.validator.is_at_max_len(state)
    }

    /// Evaluate and score a finished state.
    ///
    /// `Ok(None)` for a state that does not hold a complete formula.
    pub fn score(&self, state: &PartialState, pool: &mut AlphaPool) -> Result<Option<TerminalOutcome>, FormulaError> {
        if !self.validator.is_terminal(state) {
            return Ok(None);
        }
        let formula = Formula::from_state(state, self.registry)?;
        let signal = self.evaluator.evaluate(&formula, self.features)?;
        let reward = pool.score_candidate(&formula, &signal, self.target);
        Ok(Some(TerminalOutcome {
            formula,
            signal,
            reward,
        }))
    }

    /// Reward of a finished state.
    ///
    /// Zero for an incomplete formula at the length cap, and for a formula
    /// that fails to evaluate.
    pub fn terminal_reward(&self, state: &PartialState, pool: &mut AlphaPool) -> f64 {
        match self.score(state, pool) {
            Ok(Some(outcome)) => outcome.reward,
            Ok(None) => {
                debug!("Episode ended without a formula after {} tokens", state.len());
                0.0
            }
            Err(err) => {
                warn!("Scoring failed, reward 0: {}", err);
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::AlphaEntry;
    use crate::token::Token;

    fn registry() -> TokenRegistry {
        TokenRegistry::with_features(["close", "volume"])
    }

    fn data() -> (FeatureData, Series) {
        let index: Vec<i64> = (0..8).collect();
        let mut features = FeatureData::new(index.clone()).unwrap();
        features
            .insert_column("close", vec![1.0, 3.0, 2.0, 5.0, 4.0, 7.0, 6.0, 8.0])
            .unwrap();
        features
            .insert_column("volume", vec![2.0, 2.5, 1.0, 4.0, 3.0, 1.5, 5.0, 0.5])
            .unwrap();
        let target = Series::new(index, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();
        (features, target)
    }

    fn id(registry: &TokenRegistry, name: &str) -> TokenId {
        registry.lookup(name).unwrap()
    }

    #[test]
    fn test_step_and_close() {
        let registry = registry();
        let (features, target) = data();
        let mdp = AlphaMiningMdp::new(&registry, RpnValidator::new(8), &features, &target);

        let state = mdp.initial_state();
        assert!(!mdp.legal_actions(&state).contains(&registry.end()));
        let state = mdp.step(&state, id(&registry, "close")).unwrap();
        assert!(mdp.legal_actions(&state).contains(&registry.end()));
        assert!(!mdp.is_done(&state));

        let state = mdp.step(&state, registry.end()).unwrap();
        assert!(mdp.is_done(&state));
        assert!(mdp.legal_actions(&state).is_empty());
    }

    #[test]
    fn test_step_rejects_illegal_token() {
        let registry = registry();
        let (features, target) = data();
        let mdp = AlphaMiningMdp::new(&registry, RpnValidator::new(8), &features, &target);

        let err = mdp.step(&mdp.initial_state(), id(&registry, "add")).unwrap_err();
        assert_eq!(
            err,
            FormulaError::IllegalExtension {
                position: 0,
                token: "add".to_string()
            }
        );
        assert_eq!(
            mdp.step(&mdp.initial_state(), TokenId(9999)).unwrap_err(),
            FormulaError::UnknownTokenId(9999)
        );
    }

    #[test]
    fn test_reward_is_ic_on_empty_pool() {
        let registry = registry();
        let (features, target) = data();
        let mdp = AlphaMiningMdp::new(&registry, RpnValidator::new(8), &features, &target);
        let mut pool = AlphaPool::new(PoolConfig::default());

        let state = mdp.step(&mdp.initial_state(), id(&registry, "close")).unwrap();
        let reward = mdp.terminal_reward(&state, &mut pool);
        let expected = crate::stats::information_coefficient(features.get("close").unwrap(), &target);
        assert!((reward - expected).abs() < 1e-12);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_reward_penalised_by_pool_member() {
        let registry = registry();
        let (features, target) = data();
        let mdp = AlphaMiningMdp::new(&registry, RpnValidator::new(8), &features, &target);
        let mut pool = AlphaPool::new(PoolConfig {
            lambda: 0.5,
            ..PoolConfig::default()
        });

        let close = registry.parse_formula("close").unwrap();
        let signal = features.get("close").unwrap().clone();
        let ic = crate::stats::information_coefficient(&signal, &target);
        pool.add(AlphaEntry::with_signal(close, ic, signal));

        let mut state = mdp.initial_state();
        for name in ["close", "1", "add"] {
            state = mdp.step(&state, id(&registry, name)).unwrap();
        }
        // Same ranks as the member: mutual IC 1.
        let reward = mdp.terminal_reward(&state, &mut pool);
        assert!((reward - (ic - 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_incomplete_state_at_cap_scores_zero() {
        let registry = registry();
        let (features, target) = data();
        let mdp = AlphaMiningMdp::new(&registry, RpnValidator::new(2), &features, &target);
        let mut pool = AlphaPool::new(PoolConfig::default());

        // Built by hand: the validator would never allow two open operands at the cap.
        let mut state = PartialState::new();
        for name in ["close", "volume"] {
            let token = id(&registry, name);
            state.push(token, registry.get(token).unwrap());
        }
        assert!(mdp.is_done(&state));
        assert!(mdp.score(&state, &mut pool).unwrap().is_none());
        assert_eq!(mdp.terminal_reward(&state, &mut pool), 0.0);
    }

    #[test]
    fn test_unknown_feature_scores_zero() {
        let mut registry = registry();
        registry.register(Token::feature("vwap"));
        let (features, target) = data();
        let mdp = AlphaMiningMdp::new(&registry, RpnValidator::new(8), &features, &target);
        let mut pool = AlphaPool::new(PoolConfig::default());

        let state = mdp.step(&mdp.initial_state(), id(&registry, "vwap")).unwrap();
        assert_eq!(
            mdp.score(&state, &mut pool).unwrap_err(),
            FormulaError::UnknownFeature("vwap".to_string())
        );
        assert_eq!(mdp.terminal_reward(&state, &mut pool), 0.0);
    }
}

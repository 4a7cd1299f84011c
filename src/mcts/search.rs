//! MCTS formula construction with PUCT selection.
//!
//! Builds one formula token by token. For each token:
//! 1. SELECT: descend the tree by PUCT until reaching a leaf
//! 2. EXPAND: add a child per legal token, priors from one policy call
//! 3. EVALUATE: terminal reward from the MDP, otherwise the policy's value
//! 4. BACKPROP: add the value to every node on the path
//!
//! After `num_iterations` simulations the most visited root child is
//! committed and a fresh tree is grown from the new state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Gamma};

use super::node::{MctsArena, NodeRef};
use crate::config::MctsConfig;
use crate::data::Series;
use crate::error::SearchError;
use crate::formula::Formula;
use crate::mdp::AlphaMiningMdp;
use crate::policy::{check_prediction, Decision, PolicyValue};
use crate::pool::AlphaPool;
use crate::token::{PartialState, TokenId};

/// Result of building one formula.
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    /// The finished formula, if the episode produced a scorable one.
    pub formula: Option<Formula>,
    pub signal: Option<Series>,
    /// Adjusted score against the pool at the time of search; 0 without a formula.
    pub reward: f64,
    /// Every committed decision, End included.
    pub trajectory: Vec<Decision>,
    /// Simulations run across all committed steps.
    pub simulations: usize,
    /// Nodes created across all committed steps.
    pub tree_nodes: usize,
}

pub struct MctsSearcher {
    config: MctsConfig,
    rng: StdRng,
    cancel: Option<Arc<AtomicBool>>,
}

impl MctsSearcher {
    #[must_use]
    pub fn new(config: MctsConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            cancel: None,
        }
    }

    /// Poll `flag` between simulations; once set, the search stops with
    /// [`SearchError::Cancelled`].
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    #[must_use]
    pub fn config(&self) -> &MctsConfig {
        &self.config
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Build one formula from the empty state.
    pub fn search<P: PolicyValue>(
        &mut self,
        mdp: &AlphaMiningMdp<'_>,
        policy: &P,
        pool: &mut AlphaPool,
    ) -> Result<SearchOutcome, SearchError> {
        let mut state = mdp.initial_state();
        let mut trajectory = Vec::new();
        let mut rewards: HashMap<Vec<TokenId>, f64> = HashMap::new();
        let mut simulations = 0;
        let mut tree_nodes = 0;

        while !mdp.is_done(&state) {
            if self.is_cancelled() {
                return Err(SearchError::Cancelled);
            }
            let legal = mdp.legal_actions(&state);
            let action = match legal.as_slice() {
                [] => return Err(SearchError::DeadEnd(state.len())),
                [only] => *only,
                _ => {
                    let plan = self.plan(mdp, policy, pool, &state, &mut rewards)?;
                    simulations += plan.simulations;
                    tree_nodes += plan.tree_nodes;
                    plan.action
                }
            };
            trace!("Committing `{}` after {} tokens", mdp.registry().name(action), state.len());
            let next = mdp.step(&state, action)?;
            trajectory.push(Decision {
                state,
                legal,
                action,
            });
            state = next;
        }

        let (formula, signal, reward) = match mdp.score(&state, pool) {
            Ok(Some(outcome)) => (Some(outcome.formula), Some(outcome.signal), outcome.reward),
            Ok(None) => {
                debug!("Search ended without a formula after {} tokens", state.len());
                (None, None, 0.0)
            }
            Err(err) => {
                warn!("Searched formula failed to score: {}", err);
                (None, None, 0.0)
            }
        };

        Ok(SearchOutcome {
            formula,
            signal,
            reward,
            trajectory,
            simulations,
            tree_nodes,
        })
    }

    /// Run `num_iterations` simulations from `root_state` and pick a token.
    fn plan<P: PolicyValue>(
        &mut self,
        mdp: &AlphaMiningMdp<'_>,
        policy: &P,
        pool: &mut AlphaPool,
        root_state: &PartialState,
        rewards: &mut HashMap<Vec<TokenId>, f64>,
    ) -> Result<Plan, SearchError> {
        let mut arena = MctsArena::with_capacity(self.config.num_iterations * 4);
        let root = arena.root();
        expand(&mut arena, root, root_state, mdp, policy)?;
        if self.config.uses_root_noise() {
            self.add_root_noise(&mut arena, root);
        }

        let mut simulations = 0;
        for _ in 0..self.config.num_iterations {
            if self.is_cancelled() {
                return Err(SearchError::Cancelled);
            }
            let mut current = root;
            let mut state = root_state.clone();

            // SELECT
            while arena.get(current).is_expanded && !arena.get(current).is_terminal {
                let Some(child) = arena.select_child_puct(current, self.config.c_puct) else {
                    break;
                };
                current = child;
                if let Some(action) = arena.get(child).action {
                    state = mdp.step(&state, action)?;
                }
            }

            // EXPAND / EVALUATE
            let value = if mdp.is_done(&state) {
                arena.get_mut(current).is_terminal = true;
                match rewards.get(state.tokens()) {
                    Some(&reward) => reward,
                    None => {
                        let reward = mdp.terminal_reward(&state, pool);
                        rewards.insert(state.tokens().to_vec(), reward);
                        reward
                    }
                }
            } else if !arena.get(current).is_expanded {
                expand(&mut arena, current, &state, mdp, policy)?
            } else {
                0.0
            };

            // BACKPROP
            arena.backpropagate(current, value);
            simulations += 1;
        }

        let action = arena
            .best_child_by_visits(root)
            .and_then(|child| arena.get(child).action)
            .ok_or(SearchError::DeadEnd(root_state.len()))?;
        Ok(Plan {
            action,
            simulations,
            tree_nodes: arena.len(),
        })
    }

    /// Mix Dirichlet noise into the root priors.
    fn add_root_noise(&mut self, arena: &mut MctsArena, root: NodeRef) {
        let children = arena.get(root).children.clone();
        if children.len() < 2 {
            return;
        }
        let gamma = match Gamma::new(self.config.dirichlet_alpha, 1.0) {
            Ok(gamma) => gamma,
            Err(err) => {
                warn!("Skipping root noise: {}", err);
                return;
            }
        };
        let mut noise: Vec<f64> = children.iter().map(|_| gamma.sample(&mut self.rng)).collect();
        let total: f64 = noise.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return;
        }
        for n in &mut noise {
            *n /= total;
        }

        let weight = self.config.dirichlet_weight;
        for (child, n) in children.into_iter().zip(noise) {
            let node = arena.get_mut(child);
            node.prior = (1.0 - weight) * node.prior + weight * n;
        }
    }
}

struct Plan {
    action: TokenId,
    simulations: usize,
    tree_nodes: usize,
}

/// Create a child per legal token and return the policy's value estimate.
fn expand<P: PolicyValue>(
    arena: &mut MctsArena,
    node: NodeRef,
    state: &PartialState,
    mdp: &AlphaMiningMdp<'_>,
    policy: &P,
) -> Result<f64, SearchError> {
    let legal = mdp.legal_actions(state);
    if legal.is_empty() {
        return Err(SearchError::DeadEnd(state.len()));
    }
    let prediction = policy.predict(state, &legal)?;
    check_prediction(&prediction, &legal)?;

    for &id in &legal {
        let prior = prediction
            .priors
            .iter()
            .find(|(token, _)| *token == id)
            .map_or(0.0, |&(_, p)| p);
        arena.add_child(node, id, prior);
    }
    arena.get_mut(node).is_expanded = true;
    Ok(prediction.value)
}

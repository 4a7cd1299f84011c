//! Outer training loop.
//!
//! One cycle builds a formula with MCTS, commits it to the pool, refreshes
//! pool scores on the training data and feeds the search reward to the
//! risk-seeking optimizer. The run stops after `num_cycles` cycles or when
//! the cancellation flag is raised.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::data::{FeatureData, Series};
use crate::error::{FormulaError, MinerError, SearchError};
use crate::evaluator::FormulaEvaluator;
use crate::mcts::{MctsSearcher, SearchOutcome};
use crate::mdp::AlphaMiningMdp;
use crate::optimizer::RiskSeekingOptimizer;
use crate::policy::TrainablePolicy;
use crate::pool::{AddOutcome, AlphaEntry, AlphaPool, PoolSnapshot};
use crate::stats::information_coefficient;
use crate::token::{RpnValidator, TokenRegistry};

/// What happened in one cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub cycle: usize,
    /// RPN key of the searched formula, if the search produced one.
    pub formula: Option<String>,
    /// Raw IC of the formula on the training target.
    pub ic: f64,
    /// Search reward (adjusted score against the pool before insertion).
    pub reward: f64,
    pub inserted: bool,
    /// Members dropped by the add and the refresh.
    pub evicted: Vec<String>,
    /// Optimizer threshold after the update.
    pub threshold: f64,
    pub policy_updated: bool,
    pub pool_size: usize,
    pub simulations: usize,
}

/// Outcome of [`Trainer::run`].
#[derive(Clone, Debug)]
pub struct TrainingSummary {
    pub cycles: Vec<CycleReport>,
    /// Whether the run stopped on the cancellation flag.
    pub cancelled: bool,
    pub final_threshold: f64,
    /// Pool members, best first, as `(key, adjusted IC)`.
    pub pool: Vec<(String, f64)>,
}

impl TrainingSummary {
    #[must_use]
    pub fn cycles_run(&self) -> usize {
        self.cycles.len()
    }
}

/// On-disk training state.
#[derive(Debug, Serialize, Deserialize)]
struct Checkpoint<P> {
    cycles_done: usize,
    threshold: f64,
    pool: PoolSnapshot,
    policy: P,
}

pub struct Trainer<P> {
    config: Config,
    registry: TokenRegistry,
    pool: AlphaPool,
    policy: P,
    optimizer: RiskSeekingOptimizer,
    searcher: MctsSearcher,
    cancel: Arc<AtomicBool>,
    cycles_done: usize,
}

impl<P> Trainer<P>
where
    P: TrainablePolicy + Serialize + DeserializeOwned,
{
    #[must_use]
    pub fn new(config: Config, registry: TokenRegistry, policy: P) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let searcher = MctsSearcher::new(config.mcts.clone()).with_cancel_flag(Arc::clone(&cancel));
        Self {
            pool: AlphaPool::new(config.pool.clone()),
            optimizer: RiskSeekingOptimizer::new(config.optimizer.clone()),
            searcher,
            cancel,
            config,
            registry,
            policy,
            cycles_done: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    #[must_use]
    pub fn pool(&self) -> &AlphaPool {
        &self.pool
    }

    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    #[must_use]
    pub fn optimizer(&self) -> &RiskSeekingOptimizer {
        &self.optimizer
    }

    /// Cycles completed over the trainer's lifetime, including restored ones.
    #[must_use]
    pub fn cycles_done(&self) -> usize {
        self.cycles_done
    }

    /// Flag that stops the run between MCTS simulations once set.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Request a stop. The current simulation finishes first.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Run `num_cycles` cycles on `features` / `target`.
    ///
    /// A policy contract violation aborts the run. A cancelled run returns
    /// normally with `cancelled` set.
    pub fn run(&mut self, features: &FeatureData, target: &Series) -> Result<TrainingSummary, MinerError> {
        self.check_inputs(features, target)?;
        let num_cycles = self.config.trainer.num_cycles;
        info!(
            "Starting training: {} cycles, {} tokens, pool capacity {}",
            num_cycles,
            self.registry.len(),
            self.pool.capacity()
        );

        let mut cycles = Vec::with_capacity(num_cycles);
        let mut cancelled = false;
        for _ in 0..num_cycles {
            match self.run_cycle(features, target) {
                Ok(report) => {
                    cycles.push(report);
                    self.maybe_checkpoint(false);
                }
                Err(MinerError::Search(SearchError::Cancelled)) => {
                    info!("Training cancelled after {} cycles", cycles.len());
                    cancelled = true;
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        self.maybe_checkpoint(true);

        let summary = TrainingSummary {
            cycles,
            cancelled,
            final_threshold: self.optimizer.threshold(),
            pool: self
                .pool
                .top(self.pool.len())
                .into_iter()
                .map(|entry| (entry.key().to_string(), entry.adjusted_ic))
                .collect(),
        };
        info!(
            "Training finished: {} cycles, {} alphas, threshold {:.4}",
            summary.cycles_run(),
            summary.pool.len(),
            summary.final_threshold
        );
        Ok(summary)
    }

    /// One search → add → refresh → optimizer step.
    pub fn run_cycle(&mut self, features: &FeatureData, target: &Series) -> Result<CycleReport, MinerError> {
        let cycle = self.cycles_done;
        let validator = RpnValidator::new(self.config.grammar.max_len);
        let mdp = AlphaMiningMdp::new(&self.registry, validator, features, target);

        let outcome = match self.searcher.search(&mdp, &self.policy, &mut self.pool) {
            Ok(outcome) => outcome,
            Err(SearchError::Formula(err)) => {
                warn!("Cycle {} produced a malformed formula, reward 0: {}", cycle, err);
                SearchOutcome {
                    formula: None,
                    signal: None,
                    reward: 0.0,
                    trajectory: Vec::new(),
                    simulations: 0,
                    tree_nodes: 0,
                }
            }
            Err(err) => return Err(err.into()),
        };

        let mut report = CycleReport {
            cycle,
            formula: None,
            ic: 0.0,
            reward: outcome.reward,
            inserted: false,
            evicted: Vec::new(),
            threshold: self.optimizer.threshold(),
            policy_updated: false,
            pool_size: self.pool.len(),
            simulations: outcome.simulations,
        };

        if let (Some(formula), Some(signal)) = (&outcome.formula, &outcome.signal) {
            let ic = self
                .pool
                .cached_ic(formula)
                .unwrap_or_else(|| information_coefficient(signal, target));
            report.formula = Some(formula.key().to_string());
            report.ic = ic;
            match self
                .pool
                .add(AlphaEntry::with_signal(formula.clone(), ic, signal.clone()))
            {
                AddOutcome::Inserted => report.inserted = true,
                AddOutcome::Evicted(evicted) => {
                    report.inserted = evicted.formula != *formula;
                    report.evicted.push(evicted.key().to_string());
                }
                AddOutcome::Duplicate => {}
            }
        }

        let evaluator = FormulaEvaluator::new(&self.registry);
        let evicted = self
            .pool
            .refresh(features, target, |formula, data| evaluator.evaluate(formula, data));
        report
            .evicted
            .extend(evicted.iter().map(|entry| entry.key().to_string()));

        let step = self
            .optimizer
            .step(&mut self.policy, &outcome.trajectory, outcome.reward);
        report.threshold = step.threshold;
        report.policy_updated = step.updated;
        report.pool_size = self.pool.len();

        self.cycles_done += 1;
        debug!(
            "Cycle {}: {} reward {:.4} IC {:.4} τ {:.4} pool {}",
            cycle,
            report.formula.as_deref().unwrap_or("<none>"),
            report.reward,
            report.ic,
            report.threshold,
            report.pool_size
        );
        Ok(report)
    }

    fn check_inputs(&self, features: &FeatureData, target: &Series) -> Result<(), MinerError> {
        if features.is_empty() {
            return Err(MinerError::EmptyData("no feature rows".to_string()));
        }
        if target.is_empty() {
            return Err(MinerError::EmptyData("no target values".to_string()));
        }
        if let Some(missing) = self
            .registry
            .feature_names()
            .find(|name| features.get(name).is_none())
        {
            return Err(FormulaError::UnknownFeature(missing.to_string()).into());
        }
        Ok(())
    }

    fn maybe_checkpoint(&self, finished: bool) {
        let Some(path) = self.config.trainer.checkpoint_path.as_ref() else {
            return;
        };
        let every = self.config.trainer.checkpoint_every;
        let due = if finished {
            true
        } else {
            every > 0 && self.cycles_done % every == 0
        };
        if !due {
            return;
        }
        if let Err(err) = self.save_checkpoint(path) {
            warn!("{:#}", err);
        }
    }

    /// Write pool, policy and threshold as JSON.
    pub fn save_checkpoint(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let checkpoint = Checkpoint {
            cycles_done: self.cycles_done,
            threshold: self.optimizer.threshold(),
            pool: self.pool.snapshot(),
            policy: &self.policy,
        };
        let text = serde_json::to_string(&checkpoint).context("Failed to serialize checkpoint")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write checkpoint {}", path.display()))?;
        info!("Saved checkpoint after {} cycles to {}", self.cycles_done, path.display());
        Ok(())
    }

    /// Replace pool, policy and threshold with a saved checkpoint.
    ///
    /// Pool caches start empty and signals are recomputed on the next refresh.
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        let checkpoint: Checkpoint<P> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse checkpoint {}", path.display()))?;
        let pool = AlphaPool::restore(&checkpoint.pool, &self.registry)
            .with_context(|| format!("Checkpoint {} does not match the token registry", path.display()))?;

        self.pool = pool;
        self.policy = checkpoint.policy;
        self.optimizer.set_threshold(checkpoint.threshold);
        self.cycles_done = checkpoint.cycles_done;
        info!(
            "Restored checkpoint from {}: {} cycles, {} alphas, threshold {:.4}",
            path.display(),
            self.cycles_done,
            self.pool.len(),
            checkpoint.threshold
        );
        Ok(())
    }
}

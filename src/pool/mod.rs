//! # Alpha Pool
//!
//! Bounded collection of mined formulas, ranked by IC net of redundancy.
//!
//! ```text
//! adjusted_ic = ic - λ · mean(mutual_ic(entry, other) for other in pool)
//! ```
//!
//! The pool owns two caches (see [`cache`]): per-formula IC and symmetric
//! pairwise mutual IC. Both are keyed by formula key and outlive eviction;
//! [`AlphaPool::invalidate_caches`] is the only way to drop them.
//!
//! [`AlphaPool::refresh`] rebuilds the ranked sequence off to the side and
//! swaps it in whole, so `top` never sees a half-sorted pool.

pub mod cache;

#[cfg(test)]
mod tests;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{MutualIcDenominator, PoolConfig};
use crate::data::{FeatureData, Series};
use crate::error::FormulaError;
use crate::evaluator::FormulaEvaluator;
use crate::formula::Formula;
use crate::stats::{correlation, information_coefficient, CorrelationMethod};
use crate::token::TokenRegistry;

use cache::{IcCache, MutualIcCache};

/// One pool member.
#[derive(Clone, Debug)]
pub struct AlphaEntry {
    pub formula: Formula,
    /// Raw IC against the training target.
    pub score: f64,
    /// Score net of the redundancy penalty, as of the last ranking pass.
    pub adjusted_ic: f64,
    pub cached_signal: Option<Series>,
}

impl AlphaEntry {
    #[must_use]
    pub fn new(formula: Formula, score: f64) -> Self {
        Self {
            formula,
            score,
            adjusted_ic: score,
            cached_signal: None,
        }
    }

    #[must_use]
    pub fn with_signal(formula: Formula, score: f64, signal: Series) -> Self {
        Self {
            cached_signal: Some(signal),
            ..Self::new(formula, score)
        }
    }

    pub fn key(&self) -> &str {
        self.formula.key()
    }
}

/// Result of [`AlphaPool::add`].
#[derive(Clone, Debug)]
pub enum AddOutcome {
    Inserted,
    /// A formula with the same key is already a member; nothing changed.
    Duplicate,
    /// Capacity was exceeded and this entry was removed. It may be the one just added.
    Evicted(AlphaEntry),
}

/// Persisted pool member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub formula: String,
    pub score: f64,
    pub adjusted_ic: f64,
}

/// Serializable pool contents: formula keys and scores, no signals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub config: PoolConfig,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug)]
pub struct AlphaPool {
    config: PoolConfig,
    entries: Vec<AlphaEntry>,
    ic_cache: IcCache,
    mutual_ic_cache: MutualIcCache,
}

impl AlphaPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            ic_cache: IcCache::default(),
            mutual_ic_cache: MutualIcCache::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Members in current order (ranked after each eviction or refresh).
    #[must_use]
    pub fn entries(&self) -> &[AlphaEntry] {
        &self.entries
    }

    #[must_use]
    pub fn contains(&self, formula: &Formula) -> bool {
        self.entries.iter().any(|e| e.formula == *formula)
    }

    // --- Caches ---

    #[must_use]
    pub fn cached_ic(&self, formula: &Formula) -> Option<f64> {
        self.ic_cache.get(formula.key())
    }

    pub fn cache_ic(&mut self, formula: &Formula, ic: f64) {
        self.ic_cache.insert(formula.key(), ic);
    }

    #[must_use]
    pub fn cached_mutual_ic(&self, a: &Formula, b: &Formula) -> Option<f64> {
        self.mutual_ic_cache.get(a.key(), b.key())
    }

    pub fn cache_mutual_ic(&mut self, a: &Formula, b: &Formula, value: f64) {
        self.mutual_ic_cache.insert(a.key(), b.key(), value);
    }

    /// Drop both caches. Needed whenever the training data changes.
    pub fn invalidate_caches(&mut self) {
        debug!(
            "Invalidating {} IC and {} mutual IC cache entries",
            self.ic_cache.len(),
            self.mutual_ic_cache.len()
        );
        self.ic_cache.clear();
        self.mutual_ic_cache.clear();
        for entry in &mut self.entries {
            entry.cached_signal = None;
        }
    }

    /// Rank correlation between two signals, cached under the unordered pair.
    ///
    /// Fewer than two jointly valid points gives 0.
    pub fn mutual_ic(&mut self, a: &Formula, a_signal: &Series, b: &Formula, b_signal: &Series) -> f64 {
        mutual_ic_cached(&mut self.mutual_ic_cache, a, a_signal, b, b_signal)
    }

    // --- Updates ---

    /// Insert a candidate, evicting the lowest adjusted score if over capacity.
    ///
    /// Mutual IC between two members is computed from their cached signals
    /// when both carry one; otherwise only a cache hit counts for that pair.
    pub fn add(&mut self, entry: AlphaEntry) -> AddOutcome {
        if self.contains(&entry.formula) {
            debug!("Formula {} already in pool", entry.formula);
            return AddOutcome::Duplicate;
        }
        info!("Adding alpha {} (IC {:.4})", entry.formula, entry.score);
        self.entries.push(entry);
        if self.entries.len() <= self.config.capacity {
            return AddOutcome::Inserted;
        }

        let n = self.entries.len();
        let mut adjusted = Vec::with_capacity(n);
        for i in 0..n {
            let mut sum = 0.0;
            let mut count = 0;
            for j in 0..n {
                if i == j {
                    continue;
                }
                if let Some(value) =
                    member_mutual_ic(&mut self.mutual_ic_cache, &self.entries[i], &self.entries[j])
                {
                    sum += value;
                    count += 1;
                }
            }
            adjusted.push(self.adjust(self.entries[i].score, sum, count, n));
        }
        for (entry, value) in self.entries.iter_mut().zip(adjusted) {
            entry.adjusted_ic = value;
        }
        sort_ranked(&mut self.entries);

        match self.entries.pop() {
            Some(evicted) => {
                info!(
                    "Alpha removed from pool: {} (adjusted IC {:.4})",
                    evicted.formula, evicted.adjusted_ic
                );
                AddOutcome::Evicted(evicted)
            }
            None => AddOutcome::Inserted,
        }
    }

    /// Re-score every member against `target`, re-rank, and trim to capacity.
    ///
    /// Signals come from the entry's cache or `evaluate_fn`; a formula error
    /// leaves that member with an undefined signal (IC 0). Returns the
    /// evicted entries, worst last.
    pub fn refresh<F>(&mut self, features: &FeatureData, target: &Series, mut evaluate_fn: F) -> Vec<AlphaEntry>
    where
        F: FnMut(&Formula, &FeatureData) -> Result<Series, FormulaError>,
    {
        let mut ranked = self.entries.clone();

        for entry in &mut ranked {
            if entry.cached_signal.is_none() {
                let signal = evaluate_fn(&entry.formula, features).unwrap_or_else(|err| {
                    warn!("Pool member {} failed to evaluate: {}", entry.formula, err);
                    Series::undefined(features.index())
                });
                entry.cached_signal = Some(signal);
            }
            entry.score = match self.ic_cache.get(entry.key()) {
                Some(ic) => ic,
                None => {
                    let ic = entry
                        .cached_signal
                        .as_ref()
                        .map_or(0.0, |signal| information_coefficient(signal, target));
                    self.ic_cache.insert(entry.key(), ic);
                    ic
                }
            };
        }

        let n = ranked.len();
        let mut adjusted = Vec::with_capacity(n);
        for i in 0..n {
            let mut sum = 0.0;
            let mut count = 0;
            for j in 0..n {
                if i == j {
                    continue;
                }
                if let Some(value) = member_mutual_ic(&mut self.mutual_ic_cache, &ranked[i], &ranked[j]) {
                    sum += value;
                    count += 1;
                }
            }
            adjusted.push(self.adjust(ranked[i].score, sum, count, n));
        }
        for (entry, value) in ranked.iter_mut().zip(adjusted) {
            entry.adjusted_ic = value;
        }
        sort_ranked(&mut ranked);

        let evicted = if ranked.len() > self.config.capacity {
            ranked.split_off(self.config.capacity)
        } else {
            Vec::new()
        };
        for entry in &evicted {
            info!(
                "Alpha removed from pool: {} (adjusted IC {:.4})",
                entry.formula, entry.adjusted_ic
            );
        }

        self.entries = ranked;
        evicted
    }

    /// Adjusted score `formula` would have against the current members.
    ///
    /// This is the search reward. The candidate is not inserted, but its IC
    /// and its mutual IC against members are cached.
    pub fn score_candidate(&mut self, formula: &Formula, signal: &Series, target: &Series) -> f64 {
        let ic = match self.ic_cache.get(formula.key()) {
            Some(ic) => ic,
            None => {
                let ic = information_coefficient(signal, target);
                self.ic_cache.insert(formula.key(), ic);
                ic
            }
        };

        let mut sum = 0.0;
        let mut count = 0;
        for member in &self.entries {
            if member.formula == *formula {
                continue;
            }
            let value = match &member.cached_signal {
                Some(member_signal) => Some(mutual_ic_cached(
                    &mut self.mutual_ic_cache,
                    formula,
                    signal,
                    &member.formula,
                    member_signal,
                )),
                None => self.mutual_ic_cache.get(formula.key(), member.key()),
            };
            if let Some(value) = value {
                sum += value;
                count += 1;
            }
        }
        let pool_size = self.entries.len() + usize::from(!self.contains(formula));
        self.adjust(ic, sum, count, pool_size)
    }

    fn adjust(&self, score: f64, sum: f64, count: usize, pool_size: usize) -> f64 {
        let denominator = match self.config.denominator {
            MutualIcDenominator::Others => count,
            MutualIcDenominator::PoolSize => pool_size,
        };
        if count == 0 || denominator == 0 {
            return score;
        }
        score - self.config.lambda * (sum / denominator as f64)
    }

    // --- Queries ---

    /// The `n` best members by adjusted IC. Ties keep pool order.
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<&AlphaEntry> {
        let mut ranked: Vec<&AlphaEntry> = self.entries.iter().collect();
        ranked.sort_by(|a, b| b.adjusted_ic.total_cmp(&a.adjusted_ic));
        ranked.truncate(n);
        ranked
    }

    /// IC of each member on held-out data.
    ///
    /// Formulas that fail to evaluate score 0.
    #[must_use]
    pub fn out_of_sample_ic(
        &self,
        evaluator: &FormulaEvaluator<'_>,
        features: &FeatureData,
        target: &Series,
    ) -> Vec<(Formula, f64)> {
        self.entries
            .iter()
            .map(|entry| {
                let ic = match evaluator.evaluate(&entry.formula, features) {
                    Ok(signal) => {
                        let (x, _) = signal.jointly_valid(target);
                        if x.len() < 2 {
                            warn!("Insufficient held-out data for {}", entry.formula);
                        }
                        information_coefficient(&signal, target)
                    }
                    Err(err) => {
                        warn!("Held-out evaluation of {} failed: {}", entry.formula, err);
                        0.0
                    }
                };
                (entry.formula.clone(), ic)
            })
            .collect()
    }

    // --- Persistence ---

    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            config: self.config.clone(),
            entries: self
                .entries
                .iter()
                .map(|entry| SnapshotEntry {
                    formula: entry.key().to_string(),
                    score: entry.score,
                    adjusted_ic: entry.adjusted_ic,
                })
                .collect(),
        }
    }

    /// Rebuild a pool from a snapshot. Caches start empty.
    pub fn restore(snapshot: &PoolSnapshot, registry: &TokenRegistry) -> Result<Self, FormulaError> {
        let mut pool = Self::new(snapshot.config.clone());
        for saved in &snapshot.entries {
            let formula = registry.parse_formula(&saved.formula)?;
            let mut entry = AlphaEntry::new(formula, saved.score);
            entry.adjusted_ic = saved.adjusted_ic;
            pool.entries.push(entry);
        }
        Ok(pool)
    }
}

/// Stable descending sort by adjusted IC.
fn sort_ranked(entries: &mut [AlphaEntry]) {
    entries.sort_by(|a, b| b.adjusted_ic.total_cmp(&a.adjusted_ic));
}

fn mutual_ic_cached(
    cache: &mut MutualIcCache,
    a: &Formula,
    a_signal: &Series,
    b: &Formula,
    b_signal: &Series,
) -> f64 {
    if let Some(value) = cache.get(a.key(), b.key()) {
        return value;
    }
    let value = correlation(a_signal, b_signal, CorrelationMethod::Spearman);
    cache.insert(a.key(), b.key(), value);
    value
}

fn member_mutual_ic(cache: &mut MutualIcCache, a: &AlphaEntry, b: &AlphaEntry) -> Option<f64> {
    match (&a.cached_signal, &b.cached_signal) {
        (Some(sa), Some(sb)) => Some(mutual_ic_cached(cache, &a.formula, sa, &b.formula, sb)),
        _ => cache.get(a.key(), b.key()),
    }
}

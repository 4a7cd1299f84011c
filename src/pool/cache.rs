//! Score caches owned by the pool.
//!
//! Keyed by formula identity, not pool membership: entries survive eviction
//! and become unreachable until [`MutualIcCache::clear`] or pool rebuild.

use std::collections::HashMap;

/// Unordered pair of formula keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PairKey(String, String);

impl PairKey {
    /// Order-independent key for `(a, b)`.
    #[must_use]
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            PairKey(a.to_string(), b.to_string())
        } else {
            PairKey(b.to_string(), a.to_string())
        }
    }
}

/// Symmetric pair → mutual IC map.
#[derive(Clone, Debug, Default)]
pub struct MutualIcCache {
    values: HashMap<PairKey, f64>,
}

impl MutualIcCache {
    #[must_use]
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.values.get(&PairKey::new(a, b)).copied()
    }

    pub fn insert(&mut self, a: &str, b: &str, value: f64) {
        self.values.insert(PairKey::new(a, b), value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Formula → IC map.
#[derive(Clone, Debug, Default)]
pub struct IcCache {
    values: HashMap<String, f64>,
}

impl IcCache {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn insert(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

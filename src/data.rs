//! Time-indexed numeric data.
//!
//! Missing values are `NaN`. Two series are combined on the timestamps they
//! share (inner join); nothing is forward-filled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// A numeric series on a strictly increasing timestamp index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Series {
    index: Vec<i64>,
    values: Vec<f64>,
}

impl Series {
    pub fn new(index: Vec<i64>, values: Vec<f64>) -> Result<Self, DataError> {
        if index.len() != values.len() {
            return Err(DataError::LengthMismatch {
                index: index.len(),
                values: values.len(),
            });
        }
        if let Some(pos) = index.windows(2).position(|w| w[0] >= w[1]) {
            return Err(DataError::UnsortedIndex(pos + 1));
        }
        Ok(Self { index, values })
    }

    /// Series on the implicit index `0..values.len()`.
    #[must_use]
    pub fn from_values(values: Vec<f64>) -> Self {
        let index = (0..values.len() as i64).collect();
        Self { index, values }
    }

    /// All-undefined series on `index`.
    #[must_use]
    pub fn undefined(index: &[i64]) -> Self {
        Self {
            index: index.to_vec(),
            values: vec![f64::NAN; index.len()],
        }
    }

    /// Build from an index already known to be strictly increasing.
    pub(crate) fn from_sorted(index: Vec<i64>, values: Vec<f64>) -> Self {
        debug_assert_eq!(index.len(), values.len());
        Self { index, values }
    }

    /// Same index, values replaced. Lengths must match.
    pub(crate) fn with_values(&self, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.index.len());
        Self {
            index: self.index.clone(),
            values,
        }
    }

    #[must_use]
    pub fn index(&self) -> &[i64] {
        &self.index
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether at least one value is finite.
    #[must_use]
    pub fn has_finite(&self) -> bool {
        self.values.iter().any(|v| v.is_finite())
    }

    /// Number of finite values.
    #[must_use]
    pub fn finite_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_finite()).count()
    }

    /// Inner join on timestamps: `(shared index, self values, other values)`.
    #[must_use]
    pub fn align(&self, other: &Series) -> (Vec<i64>, Vec<f64>, Vec<f64>) {
        let capacity = self.len().min(other.len());
        let mut index = Vec::with_capacity(capacity);
        let mut left = Vec::with_capacity(capacity);
        let mut right = Vec::with_capacity(capacity);

        let (mut i, mut j) = (0, 0);
        while i < self.index.len() && j < other.index.len() {
            match self.index[i].cmp(&other.index[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    index.push(self.index[i]);
                    left.push(self.values[i]);
                    right.push(other.values[j]);
                    i += 1;
                    j += 1;
                }
            }
        }
        (index, left, right)
    }

    /// Values at shared timestamps where both sides are finite.
    #[must_use]
    pub fn jointly_valid(&self, other: &Series) -> (Vec<f64>, Vec<f64>) {
        let (_, left, right) = self.align(other);
        left.into_iter()
            .zip(right)
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .unzip()
    }
}

/// Feature columns keyed by operand name, sharing one primary time index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeatureData {
    index: Vec<i64>,
    columns: BTreeMap<String, Series>,
}

impl FeatureData {
    /// Empty data set on `index`.
    pub fn new(index: Vec<i64>) -> Result<Self, DataError> {
        // Reuse the index checks.
        Series::new(index.clone(), vec![f64::NAN; index.len()])?;
        Ok(Self {
            index,
            columns: BTreeMap::new(),
        })
    }

    /// Add a column laid out on the primary index.
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), DataError> {
        let series = Series::new(self.index.clone(), values)?;
        self.columns.insert(name.into(), series);
        Ok(())
    }

    /// Add a column with its own index (aligned by timestamp on use).
    pub fn insert_series(&mut self, name: impl Into<String>, series: Series) {
        self.columns.insert(name.into(), series);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Series> {
        self.columns.get(name)
    }

    /// Primary time index; undefined signals are laid out on it.
    #[must_use]
    pub fn index(&self) -> &[i64] {
        &self.index
    }

    /// Column names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    /// Rows `[start, end)` of every column, by primary-index position.
    ///
    /// Used to carve train / held-out windows out of one data set.
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.index.len());
        let start = start.min(end);
        let index = self.index[start..end].to_vec();
        let (lo, hi) = match (index.first(), index.last()) {
            (Some(&lo), Some(&hi)) => (lo, hi),
            _ => {
                return Self {
                    index,
                    columns: self
                        .columns
                        .keys()
                        .map(|name| (name.clone(), Series::undefined(&[])))
                        .collect(),
                }
            }
        };
        let columns = self
            .columns
            .iter()
            .map(|(name, series)| (name.clone(), series.window(lo, hi)))
            .collect();
        Self { index, columns }
    }
}

impl Series {
    /// Points with `lo <= timestamp <= hi`.
    #[must_use]
    pub fn window(&self, lo: i64, hi: i64) -> Self {
        let start = self.index.partition_point(|&t| t < lo);
        let end = self.index.partition_point(|&t| t <= hi);
        Self {
            index: self.index[start..end].to_vec(),
            values: self.values[start..end].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_rejects_bad_input() {
        assert_eq!(
            Series::new(vec![1, 2], vec![1.0]),
            Err(DataError::LengthMismatch { index: 2, values: 1 })
        );
        assert_eq!(
            Series::new(vec![1, 3, 3], vec![1.0, 2.0, 3.0]),
            Err(DataError::UnsortedIndex(2))
        );
    }

    #[test]
    fn test_align_inner_join() {
        let a = Series::new(vec![1, 2, 3, 5], vec![10.0, 20.0, 30.0, 50.0]).unwrap();
        let b = Series::new(vec![2, 3, 4, 5], vec![0.2, 0.3, 0.4, 0.5]).unwrap();
        let (index, left, right) = a.align(&b);
        assert_eq!(index, vec![2, 3, 5]);
        assert_eq!(left, vec![20.0, 30.0, 50.0]);
        assert_eq!(right, vec![0.2, 0.3, 0.5]);
    }

    #[test]
    fn test_jointly_valid_drops_nan() {
        let a = Series::from_values(vec![1.0, f64::NAN, 3.0, 4.0]);
        let b = Series::from_values(vec![1.0, 2.0, f64::INFINITY, 4.0]);
        let (x, y) = a.jointly_valid(&b);
        assert_eq!(x, vec![1.0, 4.0]);
        assert_eq!(y, vec![1.0, 4.0]);
    }

    #[test]
    fn test_feature_slice() {
        let mut data = FeatureData::new(vec![10, 20, 30, 40]).unwrap();
        data.insert_column("close", vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let head = data.slice(1, 3);
        assert_eq!(head.index(), &[20, 30]);
        assert_eq!(head.get("close").unwrap().values(), &[2.0, 3.0]);
        assert!(data.slice(4, 9).is_empty());
    }
}

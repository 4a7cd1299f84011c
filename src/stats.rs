//! Correlation statistics used for IC scoring.
//!
//! Every function here is total: degenerate input (fewer than two points,
//! zero variance, non-finite result) yields 0.0 rather than an error, so
//! search rewards are defined everywhere.

use crate::data::Series;

/// Fractional ranks (1-based), ties get the average of their positions.
#[must_use]
pub fn rank(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end (0-based) share rank mean(start+1..=end).
        let shared = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = shared;
        }
        start = end;
    }
    ranks
}

/// Pearson correlation of two equal-length samples.
#[must_use]
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x < 1e-18 || var_y < 1e-18 {
        return 0.0;
    }
    let corr = cov / (var_x.sqrt() * var_y.sqrt());
    if corr.is_finite() {
        corr.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Spearman rank correlation: Pearson on fractional ranks.
#[must_use]
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    pearson(&rank(&x[..n]), &rank(&y[..n]))
}

/// Correlation method for IC scoring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Spearman,
    Pearson,
}

/// Correlation between two series over shared, jointly finite timestamps.
///
/// Fewer than two such points gives exactly 0.
#[must_use]
pub fn correlation(a: &Series, b: &Series, method: CorrelationMethod) -> f64 {
    let (x, y) = a.jointly_valid(b);
    if x.len() < 2 {
        return 0.0;
    }
    match method {
        CorrelationMethod::Spearman => spearman(&x, &y),
        CorrelationMethod::Pearson => pearson(&x, &y),
    }
}

/// Rank IC between a signal and the prediction target.
#[must_use]
pub fn information_coefficient(signal: &Series, target: &Series) -> f64 {
    correlation(signal, target, CorrelationMethod::Spearman)
}

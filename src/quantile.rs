//! Quantile bucketing
//!
//! Values are cut at evenly spaced quantiles (linear interpolation between
//! order statistics). Buckets are right-closed and the lowest edge belongs to
//! the first bucket.
//!
//! When the data has too few distinct values, several edges coincide.
//! Duplicate edges are dropped and the remaining intervals define fewer
//! buckets, numbered from zero. A column with one distinct value collapses to
//! a single bucket. Callers learn the obtained count through
//! `QuantileBuckets::bucket_count`.

/// Bucket assignment for one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantileBuckets {
    /// Bucket index per input value, in input order
    pub indices: Vec<u8>,
    /// Number of distinct buckets the edges define
    pub bucket_count: usize,
}

impl QuantileBuckets {
    /// Whether fewer buckets than requested could be formed
    pub fn is_degraded(&self, requested: usize) -> bool {
        !self.indices.is_empty() && self.bucket_count < requested
    }
}

/// 1-based ranks with ties broken by first occurrence.
///
/// Every value gets a distinct rank, so equal inputs land in equal or
/// adjacent buckets deterministically.
pub fn rank_first(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    // sort_by is stable: equal values keep their input order
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        ranks[idx] = (rank + 1) as f64;
    }
    ranks
}

/// Linear-interpolated quantile of an ascending slice
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    let fraction = position - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * fraction
}

/// Quantile edges for `buckets` buckets, duplicates removed
pub fn quantile_edges(values: &[f64], buckets: usize) -> Vec<f64> {
    if values.is_empty() || buckets == 0 {
        return Vec::new();
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut edges: Vec<f64> = (0..=buckets)
        .map(|i| quantile(&sorted, i as f64 / buckets as f64))
        .collect();
    edges.dedup();
    edges
}

/// Cut values into at most `buckets` quantile buckets
pub fn qcut(values: &[f64], buckets: usize) -> QuantileBuckets {
    let edges = quantile_edges(values, buckets);
    if edges.is_empty() {
        return QuantileBuckets {
            indices: Vec::new(),
            bucket_count: 0,
        };
    }

    let bucket_count = (edges.len() - 1).max(1);
    let indices = values
        .iter()
        .map(|&value| {
            let edges_below = edges.iter().filter(|&&edge| edge < value).count();
            edges_below.saturating_sub(1).min(bucket_count - 1) as u8
        })
        .collect();

    QuantileBuckets {
        indices,
        bucket_count,
    }
}

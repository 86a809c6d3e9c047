//! RFM scoring
//!
//! Recency, frequency and monetary values per customer, each cut into
//! quintile buckets and summed into a combined score.

use crate::config::PipelineConfig;
use crate::error::FeatureError;
use crate::quantile::{qcut, rank_first, QuantileBuckets};
use crate::types::{CustomerTable, PipelineWarning, RfmScores, REQUIRED_COLUMNS};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Number of quantile buckets requested per metric
pub const SCORE_BUCKETS: usize = 5;

/// Highest bucket index a metric can receive
pub const MAX_BUCKET_SCORE: u8 = (SCORE_BUCKETS - 1) as u8;

/// Output of the RFM stage
#[derive(Debug, Clone, PartialEq)]
pub struct RfmOutcome {
    /// Maximum `last_order_date` across the table
    pub reference_date: Option<DateTime<Utc>>,
    /// One entry per customer, in table order
    pub scores: Vec<RfmScores>,
    pub warnings: Vec<PipelineWarning>,
}

/// RFM scorer for the merged customer table
pub struct RfmScorer;

impl RfmScorer {
    /// Score every customer in the table.
    ///
    /// Fails with `MissingColumn` when `last_order_date`, `total_orders` or
    /// `avg_order_value` is not part of the table's schema. Null cells are
    /// imputed: recency gets the configured sentinel, counts and amounts get 0.
    pub fn score(
        table: &CustomerTable,
        config: &PipelineConfig,
    ) -> Result<RfmOutcome, FeatureError> {
        table.require_columns(&REQUIRED_COLUMNS)?;

        let reference_date = reference_date(table);
        let rows = table.rows();

        let recency_days: Vec<i64> = rows
            .iter()
            .map(|r| recency_days(r.last_order_date, reference_date, config.missing_recency_days))
            .collect();
        let frequency: Vec<u64> = rows.iter().map(|r| r.total_orders.unwrap_or(0)).collect();
        let monetary: Vec<f64> = rows.iter().map(|r| r.avg_order_value.unwrap_or(0.0)).collect();

        let recency_input: Vec<f64> = recency_days.iter().map(|&d| d as f64).collect();
        let frequency_input: Vec<f64> = frequency.iter().map(|&f| f as f64).collect();

        // Recency is cut on raw days; frequency and monetary on first-seen ranks
        let recency_buckets = qcut(&recency_input, SCORE_BUCKETS);
        let frequency_buckets = qcut(&rank_first(&frequency_input), SCORE_BUCKETS);
        let monetary_buckets = qcut(&rank_first(&monetary), SCORE_BUCKETS);

        let mut warnings = Vec::new();
        for (column, buckets) in [
            ("recency_score", &recency_buckets),
            ("frequency_score", &frequency_buckets),
            ("monetary_score", &monetary_buckets),
        ] {
            if let Some(warning) = cardinality_warning(column, buckets) {
                warnings.push(warning);
            }
        }

        let mut scores = Vec::with_capacity(rows.len());
        for i in 0..rows.len() {
            let recency_score = checked_bucket("recency_score", recency_buckets.indices[i])?;
            let frequency_score = checked_bucket("frequency_score", frequency_buckets.indices[i])?;
            let monetary_score = checked_bucket("monetary_score", monetary_buckets.indices[i])?;

            scores.push(RfmScores {
                recency_days: recency_days[i],
                frequency: frequency[i],
                monetary_value: monetary[i],
                recency_score,
                frequency_score,
                monetary_score,
                rfm_score: recency_score + frequency_score + monetary_score,
            });
        }

        info!(
            customers = scores.len(),
            reference_date = ?reference_date,
            recency_buckets = recency_buckets.bucket_count,
            "RFM scores computed"
        );

        Ok(RfmOutcome {
            reference_date,
            scores,
            warnings,
        })
    }
}

/// Latest `last_order_date` in the table
pub fn reference_date(table: &CustomerTable) -> Option<DateTime<Utc>> {
    table.rows().iter().filter_map(|r| r.last_order_date).max()
}

/// Whole days between the last order and the reference date.
///
/// Customers without a last order date get `missing_days`.
pub fn recency_days(
    last_order_date: Option<DateTime<Utc>>,
    reference_date: Option<DateTime<Utc>>,
    missing_days: i64,
) -> i64 {
    match (last_order_date, reference_date) {
        (Some(last), Some(reference)) => (reference - last).num_days(),
        _ => missing_days,
    }
}

fn checked_bucket(field: &'static str, index: u8) -> Result<u8, FeatureError> {
    if index > MAX_BUCKET_SCORE {
        return Err(FeatureError::OutOfRangeScore {
            field,
            value: i64::from(index),
            min: 0,
            max: i64::from(MAX_BUCKET_SCORE),
        });
    }
    Ok(index)
}

fn cardinality_warning(column: &str, buckets: &QuantileBuckets) -> Option<PipelineWarning> {
    if !buckets.is_degraded(SCORE_BUCKETS) {
        return None;
    }
    warn!(
        column,
        requested = SCORE_BUCKETS,
        obtained = buckets.bucket_count,
        "insufficient cardinality for quantile bucketing"
    );
    Some(PipelineWarning::InsufficientCardinality {
        column: column.to_string(),
        requested: SCORE_BUCKETS,
        obtained: buckets.bucket_count,
    })
}

//! Trend indicators and loyalty segmentation

use crate::error::FeatureError;
use crate::types::{
    CustomerTable, LoyaltySegment, RfmScores, TrendFeatures, AVG_ORDER_VALUE, TOTAL_ORDERS,
};
use tracing::info;

/// Trend and segment deriver
pub struct TrendDeriver;

impl TrendDeriver {
    /// Derive trend indicators and loyalty segments.
    ///
    /// `scores` must be aligned with the table rows. A ratio is `None` only
    /// when its input column is missing from the schema; null cells count as 0.
    pub fn derive(
        table: &CustomerTable,
        scores: &[RfmScores],
    ) -> Result<Vec<TrendFeatures>, FeatureError> {
        let rows = table.rows();

        let order_growth = table.has_column(TOTAL_ORDERS).then(|| {
            let orders: Vec<u64> = rows.iter().map(|r| r.total_orders.unwrap_or(0)).collect();
            order_growth_estimates(&orders)
        });
        let spending = table.has_column(AVG_ORDER_VALUE).then(|| {
            let values: Vec<f64> = rows.iter().map(|r| r.avg_order_value.unwrap_or(0.0)).collect();
            spending_indices(&values)
        });

        let mut features = Vec::with_capacity(scores.len());
        for (i, s) in scores.iter().enumerate() {
            features.push(TrendFeatures {
                order_growth_est: order_growth.as_ref().map(|v| v[i]),
                spending_index: spending.as_ref().map(|v| v[i]),
                loyalty_segment: LoyaltySegment::from_rfm_score(i64::from(s.rfm_score))?,
            });
        }

        info!(customers = features.len(), "trend features derived");
        Ok(features)
    }
}

/// `ln(1 + orders) / max(orders)`, or 0 for everyone when nobody ordered
pub fn order_growth_estimates(orders: &[u64]) -> Vec<f64> {
    let max_orders = orders.iter().copied().max().unwrap_or(0);
    orders
        .iter()
        .map(|&n| {
            if max_orders == 0 {
                0.0
            } else {
                (n as f64).ln_1p() / max_orders as f64
            }
        })
        .collect()
}

/// Each value divided by the mean, or 0 for everyone when the mean is 0
pub fn spending_indices(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values
        .iter()
        .map(|&v| if mean > 0.0 { v / mean } else { 0.0 })
        .collect()
}

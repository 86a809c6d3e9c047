//! Pipeline orchestration
//!
//! This module provides the public API for retention-flux. It runs the three
//! derivation stages over one customer table snapshot and validates the
//! assembled feature table before handing it off.

use crate::config::PipelineConfig;
use crate::error::FeatureError;
use crate::features::engagement::engagement_score;
use crate::features::{EngagementDeriver, RfmScorer, TrendDeriver, MAX_BUCKET_SCORE};
use crate::schema::TableAdapter;
use crate::types::{
    CustomerTable, FeatureRecord, FeatureTable, LoyaltySegment, DERIVED_COLUMNS,
};
use std::collections::HashSet;
use tracing::{debug, info, info_span};

/// Convert a merged customer table (JSON array of rows) into a feature table
/// using the default configuration.
///
/// # Example
/// ```ignore
/// let table = customers_to_features(customers_json)?;
/// println!("{} customers scored", table.len());
/// ```
pub fn customers_to_features(customers_json: String) -> Result<FeatureTable, FeatureError> {
    let rows = TableAdapter::parse_array(&customers_json)?;
    let table = TableAdapter::to_customer_table(rows)?;
    FeaturePipeline::new().run(&table)
}

/// Feature table assembler.
///
/// Holds only the run configuration; every run-scoped value (reference date,
/// top channel) is recomputed on each call to [`FeaturePipeline::run`].
#[derive(Debug, Clone, Default)]
pub struct FeaturePipeline {
    config: PipelineConfig,
}

impl FeaturePipeline {
    /// Create a pipeline with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipeline with a validated configuration
    pub fn with_config(config: PipelineConfig) -> Result<Self, FeatureError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run RFM → Engagement → Trend/Segment and validate the result.
    ///
    /// Any stage or validation failure aborts the run; no partial table is
    /// returned.
    pub fn run(&self, table: &CustomerTable) -> Result<FeatureTable, FeatureError> {
        let span = info_span!("feature_pipeline", customers = table.len());
        let _guard = span.enter();

        // Stage 1: RFM scores
        let rfm = RfmScorer::score(table, &self.config)?;

        // Stage 2: Engagement
        let engagement = EngagementDeriver::derive(table, &rfm.scores, &self.config);

        // Stage 3: Trend and segment
        let trend = TrendDeriver::derive(table, &rfm.scores)?;

        let rows: Vec<FeatureRecord> = table
            .rows()
            .iter()
            .zip(rfm.scores)
            .zip(engagement.features)
            .zip(trend)
            .map(|(((customer, r), e), t)| FeatureRecord {
                customer_id: customer.customer_id.clone(),
                total_orders: customer.total_orders,
                avg_order_value: customer.avg_order_value,
                last_order_date: customer.last_order_date,
                channel: customer.channel.clone(),
                attributes: customer.attributes.clone(),
                recency_days: r.recency_days,
                frequency: r.frequency,
                monetary_value: r.monetary_value,
                recency_score: r.recency_score,
                frequency_score: r.frequency_score,
                monetary_score: r.monetary_score,
                rfm_score: r.rfm_score,
                top_channel: engagement.top_channel.clone(),
                is_active: e.is_active,
                is_inactive: e.is_inactive,
                engagement_score: e.engagement_score,
                order_growth_est: t.order_growth_est,
                spending_index: t.spending_index,
                loyalty_segment: t.loyalty_segment,
            })
            .collect();

        let feature_table = FeatureTable {
            reference_date: rfm.reference_date,
            top_channel: engagement.top_channel,
            columns: output_columns(table),
            rows,
            warnings: rfm.warnings,
        };

        validate_feature_table(table, &feature_table, &self.config)?;

        let summary = feature_table.summary();
        info!(
            customers = summary.customers,
            columns = summary.columns,
            churned = summary.segments.churned,
            neutral = summary.segments.neutral,
            loyal = summary.segments.loyal,
            vip = summary.segments.vip,
            warnings = summary.warnings,
            "feature table ready"
        );
        Ok(feature_table)
    }
}

/// Input columns followed by every derived column the input lacks
fn output_columns(table: &CustomerTable) -> Vec<String> {
    let mut columns = table.columns().to_vec();
    for derived in DERIVED_COLUMNS {
        if !columns.iter().any(|c| c == derived) {
            columns.push(derived.to_string());
        }
    }
    columns
}

/// Check every invariant of an assembled table against its input
pub fn validate_feature_table(
    input: &CustomerTable,
    table: &FeatureTable,
    config: &PipelineConfig,
) -> Result<(), FeatureError> {
    if table.rows.len() != input.len() {
        return Err(FeatureError::InvariantViolation(format!(
            "expected {} rows, found {}",
            input.len(),
            table.rows.len()
        )));
    }

    for column in DERIVED_COLUMNS {
        if !table.columns.iter().any(|c| c == column) {
            return Err(FeatureError::InvariantViolation(format!(
                "derived column {} missing",
                column
            )));
        }
    }

    let mut seen = HashSet::with_capacity(table.rows.len());
    for (row, source) in table.rows.iter().zip(input.rows()) {
        if row.customer_id != source.customer_id || !seen.insert(row.customer_id.as_str()) {
            return Err(FeatureError::InvariantViolation(format!(
                "customer {} out of place or duplicated",
                row.customer_id
            )));
        }
        validate_row(row, &table.top_channel, config)?;
    }

    debug!(rows = table.rows.len(), "feature table validated");
    Ok(())
}

fn validate_row(
    row: &FeatureRecord,
    top_channel: &str,
    config: &PipelineConfig,
) -> Result<(), FeatureError> {
    for (field, score) in [
        ("recency_score", row.recency_score),
        ("frequency_score", row.frequency_score),
        ("monetary_score", row.monetary_score),
    ] {
        if score > MAX_BUCKET_SCORE {
            return Err(FeatureError::OutOfRangeScore {
                field,
                value: i64::from(score),
                min: 0,
                max: i64::from(MAX_BUCKET_SCORE),
            });
        }
    }

    let violation = |what: &str| {
        FeatureError::InvariantViolation(format!("customer {}: {}", row.customer_id, what))
    };

    if row.rfm_score != row.recency_score + row.frequency_score + row.monetary_score {
        return Err(violation("rfm_score is not the sum of its buckets"));
    }
    if LoyaltySegment::from_rfm_score(i64::from(row.rfm_score))? != row.loyalty_segment {
        return Err(violation("loyalty_segment does not match rfm_score"));
    }
    if row.recency_days < 0 {
        return Err(violation("negative recency_days"));
    }
    if row.is_active != (row.recency_days <= config.active_window_days)
        || row.is_inactive != (row.recency_days > config.inactive_after_days)
    {
        return Err(violation("activity flags disagree with recency_days"));
    }
    if row.top_channel != top_channel {
        return Err(violation("top_channel differs from the run's top channel"));
    }
    if row.engagement_score != engagement_score_of(row) {
        return Err(violation("engagement_score does not match its buckets"));
    }
    Ok(())
}

fn engagement_score_of(row: &FeatureRecord) -> f64 {
    engagement_score(&crate::types::RfmScores {
        recency_days: row.recency_days,
        frequency: row.frequency,
        monetary_value: row.monetary_value,
        recency_score: row.recency_score,
        frequency_score: row.frequency_score,
        monetary_score: row.monetary_score,
        rfm_score: row.rfm_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CustomerRecord, PipelineWarning, SegmentCounts};
    use chrono::{Duration, TimeZone, Utc};

    fn sample_customers_json() -> &'static str {
        r#"[
            {"customer_id": "c1", "total_orders": 12, "avg_order_value": 80.0,
             "last_order_date": "2024-06-30T10:00:00Z", "channel": "app", "name": "Ana"},
            {"customer_id": "c2", "total_orders": 3, "avg_order_value": 25.0,
             "last_order_date": "2024-06-10T10:00:00Z", "channel": "store"},
            {"customer_id": "c3", "total_orders": 1, "avg_order_value": 15.0,
             "last_order_date": "2024-02-01T10:00:00Z", "channel": "app"},
            {"customer_id": "c4", "total_orders": 7, "avg_order_value": 60.0,
             "last_order_date": "2024-05-15T10:00:00Z", "channel": "web"},
            {"customer_id": "c5", "total_orders": null, "avg_order_value": null,
             "last_order_date": null, "channel": null}
        ]"#
    }

    #[test]
    fn test_summary_counts_segments() {
        let table = customers_to_features(sample_customers_json().to_string()).unwrap();
        let summary = table.summary();

        assert_eq!(summary.customers, 5);
        assert_eq!(summary.columns, 6 + DERIVED_COLUMNS.len());
        // rfm scores: c1 8, c2 5, c3 5, c4 8, c5 4
        assert_eq!(
            summary.segments,
            SegmentCounts {
                churned: 1,
                neutral: 2,
                loyal: 2,
                vip: 0,
            }
        );
        assert_eq!(summary.segments.total(), summary.customers);
        assert_eq!(summary.segments.get(LoyaltySegment::Loyal), 2);
        assert_eq!(summary.warnings, 0);
    }

    #[test]
    fn test_customers_to_features() {
        let table = customers_to_features(sample_customers_json().to_string()).unwrap();

        assert_eq!(table.len(), 5);
        assert_eq!(table.top_channel, "app");
        assert_eq!(
            table.reference_date,
            Some(Utc.with_ymd_and_hms(2024, 6, 30, 10, 0, 0).unwrap())
        );

        let c1 = table.get("c1").unwrap();
        assert_eq!(c1.recency_days, 0);
        assert!(c1.is_active);
        assert_eq!(c1.frequency_score, 4);
        assert_eq!(c1.attributes["name"], "Ana");

        let c5 = table.get("c5").unwrap();
        assert_eq!(c5.recency_days, 9999);
        assert!(!c5.is_active);
        assert!(c5.is_inactive);
        assert_eq!(c5.frequency, 0);
        assert_eq!(c5.top_channel, "app");
    }

    #[test]
    fn test_output_columns_are_append_only() {
        let table = customers_to_features(sample_customers_json().to_string()).unwrap();
        let input_columns = ["customer_id", "total_orders", "channel", "name"];
        for column in input_columns {
            assert!(table.columns.iter().any(|c| c == column));
        }
        let tail: Vec<&str> = table.columns[table.columns.len() - DERIVED_COLUMNS.len()..]
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(tail, DERIVED_COLUMNS.to_vec());
    }

    #[test]
    fn test_missing_column_aborts_run() {
        let result = customers_to_features(r#"[{"customer_id": "a", "total_orders": 1}]"#.into());
        assert!(matches!(result, Err(FeatureError::MissingColumn(_))));
    }

    #[test]
    fn test_custom_windows() {
        let config = PipelineConfig {
            active_window_days: 7,
            inactive_after_days: 14,
            ..PipelineConfig::default()
        };
        let pipeline = FeaturePipeline::with_config(config).unwrap();
        let anchor = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let table = CustomerTable::from_records(vec![
            CustomerRecord {
                total_orders: Some(1),
                avg_order_value: Some(10.0),
                last_order_date: Some(anchor),
                ..CustomerRecord::new("a")
            },
            CustomerRecord {
                total_orders: Some(1),
                avg_order_value: Some(10.0),
                last_order_date: Some(anchor - Duration::days(10)),
                ..CustomerRecord::new("b")
            },
        ])
        .unwrap();

        let features = pipeline.run(&table).unwrap();
        assert!(features.rows[0].is_active);
        assert!(!features.rows[1].is_active);
        assert!(!features.rows[1].is_inactive);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            missing_recency_days: 10,
            ..PipelineConfig::default()
        };
        assert!(FeaturePipeline::with_config(config).is_err());
    }

    #[test]
    fn test_validation_catches_tampering() {
        let rows = TableAdapter::parse_array(sample_customers_json()).unwrap();
        let input = TableAdapter::to_customer_table(rows).unwrap();
        let config = PipelineConfig::default();
        let mut table = FeaturePipeline::new().run(&input).unwrap();

        table.rows[0].loyalty_segment = LoyaltySegment::Churned;
        table.rows[0].rfm_score = 12;
        assert!(matches!(
            validate_feature_table(&input, &table, &config),
            Err(FeatureError::InvariantViolation(_))
        ));

        let mut table = FeaturePipeline::new().run(&input).unwrap();
        table.rows[1].monetary_score = 5;
        assert!(matches!(
            validate_feature_table(&input, &table, &config),
            Err(FeatureError::OutOfRangeScore { field: "monetary_score", .. })
        ));

        let mut table = FeaturePipeline::new().run(&input).unwrap();
        table.rows.pop();
        assert!(validate_feature_table(&input, &table, &config).is_err());
    }

    #[test]
    fn test_warnings_carried_on_table() {
        let table = customers_to_features(
            r#"[{"customer_id": "solo", "total_orders": 0, "avg_order_value": 0,
                 "last_order_date": null}]"#
                .into(),
        )
        .unwrap();
        assert_eq!(table.warnings.len(), 3);
        assert!(matches!(
            &table.warnings[0],
            PipelineWarning::InsufficientCardinality { obtained: 1, .. }
        ));
    }

    #[test]
    fn test_empty_table() {
        let table = FeaturePipeline::new()
            .run(&CustomerTable::from_records(Vec::new()).unwrap())
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.top_channel, "unknown");
        assert!(table.warnings.is_empty());
    }
}

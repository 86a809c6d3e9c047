//! Core data types
//!
//! This module defines the customer table that enters the pipeline, the
//! per-stage feature rows, and the assembled feature table handed to
//! downstream consumers.

use crate::error::FeatureError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// A raw table row as read from JSON, keyed by column name
pub type RawRow = serde_json::Map<String, Value>;

pub const CUSTOMER_ID: &str = "customer_id";
pub const TOTAL_ORDERS: &str = "total_orders";
pub const AVG_ORDER_VALUE: &str = "avg_order_value";
pub const LAST_ORDER_DATE: &str = "last_order_date";
pub const CHANNEL: &str = "channel";

/// Columns that must exist in the input schema for RFM scoring
pub const REQUIRED_COLUMNS: [&str; 3] = [LAST_ORDER_DATE, TOTAL_ORDERS, AVG_ORDER_VALUE];

/// Columns appended by the pipeline, in output order
pub const DERIVED_COLUMNS: [&str; 14] = [
    "recency_days",
    "frequency",
    "monetary_value",
    "recency_score",
    "frequency_score",
    "monetary_score",
    "rfm_score",
    "top_channel",
    "is_active",
    "is_inactive",
    "engagement_score",
    "order_growth_est",
    "spending_index",
    "loyalty_segment",
];

/// Returns true when `name` is one of the columns the pipeline derives
pub fn is_derived_column(name: &str) -> bool {
    DERIVED_COLUMNS.contains(&name)
}

/// One merged customer row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub total_orders: Option<u64>,
    pub avg_order_value: Option<f64>,
    pub last_order_date: Option<DateTime<Utc>>,
    pub channel: Option<String>,
    /// Every other input column (name, contact, supplemental attributes)
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl CustomerRecord {
    /// Create a record with only an id; every other field is missing
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            total_orders: None,
            avg_order_value: None,
            last_order_date: None,
            channel: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// Immutable snapshot of the merged customer table.
///
/// Besides the rows, the table remembers which columns the producer declared,
/// so a column that is entirely absent can be told apart from one that is
/// present but null in every row.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerTable {
    columns: Vec<String>,
    rows: Vec<CustomerRecord>,
}

impl CustomerTable {
    /// Build a table from declared columns and rows.
    ///
    /// Fails when a customer id is empty or appears more than once.
    pub fn new(columns: Vec<String>, rows: Vec<CustomerRecord>) -> Result<Self, FeatureError> {
        let mut seen = HashSet::with_capacity(rows.len());
        for row in &rows {
            if row.customer_id.trim().is_empty() {
                return Err(FeatureError::MissingField(CUSTOMER_ID.to_string()));
            }
            if !seen.insert(row.customer_id.as_str()) {
                return Err(FeatureError::DuplicateCustomer(row.customer_id.clone()));
            }
        }

        let mut declared: Vec<String> = Vec::with_capacity(columns.len() + 1);
        if !columns.iter().any(|c| c == CUSTOMER_ID) {
            declared.push(CUSTOMER_ID.to_string());
        }
        for column in columns {
            if !declared.contains(&column) {
                declared.push(column);
            }
        }

        Ok(Self {
            columns: declared,
            rows,
        })
    }

    /// Build a table declaring the standard merged columns.
    ///
    /// `channel` is declared only when at least one row carries a channel;
    /// attribute keys are declared in first-seen order.
    pub fn from_records(rows: Vec<CustomerRecord>) -> Result<Self, FeatureError> {
        let mut columns: Vec<String> = [CUSTOMER_ID, TOTAL_ORDERS, AVG_ORDER_VALUE, LAST_ORDER_DATE]
            .iter()
            .map(|c| c.to_string())
            .collect();
        if rows.iter().any(|r| r.channel.is_some()) {
            columns.push(CHANNEL.to_string());
        }
        for row in &rows {
            for key in row.attributes.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[CustomerRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether the column is part of the declared schema
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Fail with `MissingColumn` for the first required column not declared
    pub fn require_columns(&self, required: &[&str]) -> Result<(), FeatureError> {
        match required.iter().find(|c| !self.has_column(c)) {
            Some(missing) => Err(FeatureError::MissingColumn(missing.to_string())),
            None => Ok(()),
        }
    }
}

/// Loyalty segment assigned from the combined RFM score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoyaltySegment {
    Churned,
    Neutral,
    Loyal,
    Vip,
}

impl LoyaltySegment {
    pub const MIN_SCORE: i64 = 0;
    pub const MAX_SCORE: i64 = 12;

    /// Bin an RFM score: `<=4` churned, `5-7` neutral, `8-10` loyal, `11-12` vip.
    ///
    /// Scores outside `0..=12` are rejected, never clamped.
    pub fn from_rfm_score(score: i64) -> Result<Self, FeatureError> {
        match score {
            0..=4 => Ok(LoyaltySegment::Churned),
            5..=7 => Ok(LoyaltySegment::Neutral),
            8..=10 => Ok(LoyaltySegment::Loyal),
            11..=12 => Ok(LoyaltySegment::Vip),
            _ => Err(FeatureError::OutOfRangeScore {
                field: "rfm_score",
                value: score,
                min: Self::MIN_SCORE,
                max: Self::MAX_SCORE,
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoyaltySegment::Churned => "churned",
            LoyaltySegment::Neutral => "neutral",
            LoyaltySegment::Loyal => "loyal",
            LoyaltySegment::Vip => "vip",
        }
    }
}

/// Non-fatal conditions raised during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// Quantile bucketing produced fewer buckets than requested
    InsufficientCardinality {
        column: String,
        requested: usize,
        obtained: usize,
    },
}

/// RFM values for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct RfmScores {
    pub recency_days: i64,
    pub frequency: u64,
    pub monetary_value: f64,
    pub recency_score: u8,
    pub frequency_score: u8,
    pub monetary_score: u8,
    pub rfm_score: u8,
}

/// Engagement values for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementFeatures {
    pub is_active: bool,
    pub is_inactive: bool,
    pub engagement_score: f64,
}

/// Trend and segment values for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct TrendFeatures {
    pub order_growth_est: Option<f64>,
    pub spending_index: Option<f64>,
    pub loyalty_segment: LoyaltySegment,
}

/// A fully derived, model-ready customer row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub customer_id: String,
    pub total_orders: Option<u64>,
    pub avg_order_value: Option<f64>,
    pub last_order_date: Option<DateTime<Utc>>,
    pub channel: Option<String>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,

    pub recency_days: i64,
    pub frequency: u64,
    pub monetary_value: f64,
    pub recency_score: u8,
    pub frequency_score: u8,
    pub monetary_score: u8,
    pub rfm_score: u8,
    pub top_channel: String,
    pub is_active: bool,
    pub is_inactive: bool,
    pub engagement_score: f64,
    pub order_growth_est: Option<f64>,
    pub spending_index: Option<f64>,
    pub loyalty_segment: LoyaltySegment,
}

impl FeatureRecord {
    /// The input portion of this row, with every derived field dropped
    pub fn to_customer_record(&self) -> CustomerRecord {
        CustomerRecord {
            customer_id: self.customer_id.clone(),
            total_orders: self.total_orders,
            avg_order_value: self.avg_order_value,
            last_order_date: self.last_order_date,
            channel: self.channel.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

/// The assembled feature table for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    /// Maximum `last_order_date` of the run, absent when no customer ordered
    pub reference_date: Option<DateTime<Utc>>,
    /// Run-scoped dominant channel, copied onto every row
    pub top_channel: String,
    /// Input columns followed by the derived columns
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRecord>,
    #[serde(default)]
    pub warnings: Vec<PipelineWarning>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rebuild the input table this run was derived from
    pub fn to_customer_table(&self) -> Result<CustomerTable, FeatureError> {
        let columns = self
            .columns
            .iter()
            .filter(|c| !is_derived_column(c))
            .cloned()
            .collect();
        let rows = self.rows.iter().map(FeatureRecord::to_customer_record).collect();
        CustomerTable::new(columns, rows)
    }

    pub fn get(&self, customer_id: &str) -> Option<&FeatureRecord> {
        self.rows.iter().find(|r| r.customer_id == customer_id)
    }

    /// Row, column and per-segment counts for the run
    pub fn summary(&self) -> FeatureSummary {
        let mut segments = SegmentCounts::default();
        for row in &self.rows {
            segments.add(row.loyalty_segment);
        }
        FeatureSummary {
            customers: self.rows.len(),
            columns: self.columns.len(),
            segments,
            warnings: self.warnings.len(),
        }
    }
}

/// Customers per loyalty segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentCounts {
    pub churned: usize,
    pub neutral: usize,
    pub loyal: usize,
    pub vip: usize,
}

impl SegmentCounts {
    fn add(&mut self, segment: LoyaltySegment) {
        match segment {
            LoyaltySegment::Churned => self.churned += 1,
            LoyaltySegment::Neutral => self.neutral += 1,
            LoyaltySegment::Loyal => self.loyal += 1,
            LoyaltySegment::Vip => self.vip += 1,
        }
    }

    pub fn get(&self, segment: LoyaltySegment) -> usize {
        match segment {
            LoyaltySegment::Churned => self.churned,
            LoyaltySegment::Neutral => self.neutral,
            LoyaltySegment::Loyal => self.loyal,
            LoyaltySegment::Vip => self.vip,
        }
    }

    pub fn total(&self) -> usize {
        self.churned + self.neutral + self.loyal + self.vip
    }
}

/// Shape of a finished run, logged by the pipeline and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub customers: usize,
    pub columns: usize,
    pub segments: SegmentCounts,
    pub warnings: usize,
}

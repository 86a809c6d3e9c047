//! Adapter for turning raw JSON rows into a `CustomerTable`
//!
//! Column names are normalized before use, loosely typed cells are coerced,
//! and columns the pipeline derives itself are ignored so a previously
//! written snapshot can be fed back in.

use crate::error::FeatureError;
use crate::schema::values::{
    amount_from_value, count_from_value, id_from_value, label_from_value, normalize_column_name,
    timestamp_from_value, ValueError,
};
use crate::types::{
    is_derived_column, CustomerRecord, CustomerTable, RawRow, AVG_ORDER_VALUE, CHANNEL,
    CUSTOMER_ID, LAST_ORDER_DATE, REQUIRED_COLUMNS, TOTAL_ORDERS,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Adapter for converting raw rows to the merged customer table
pub struct TableAdapter;

impl TableAdapter {
    /// Parse a JSON string containing an array of row objects
    pub fn parse_array(json: &str) -> Result<Vec<RawRow>, FeatureError> {
        let values: Vec<Value> = serde_json::from_str(json)?;
        values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| match value {
                Value::Object(row) => Ok(row),
                other => Err(FeatureError::ParseError(format!(
                    "Row {} is not an object: {}",
                    idx, other
                ))),
            })
            .collect()
    }

    /// Parse NDJSON (newline-delimited JSON) containing row objects
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawRow>, FeatureError> {
        let mut rows = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawRow>(trimmed) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    return Err(FeatureError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(rows)
    }

    /// Normalize every key of a row. On a name collision the first key wins.
    pub fn normalize_row(row: RawRow) -> RawRow {
        let mut normalized = RawRow::new();
        for (key, value) in row {
            let name = normalize_column_name(&key);
            if !normalized.contains_key(&name) {
                normalized.insert(name, value);
            }
        }
        normalized
    }

    /// Ordered union of normalized column names, derived columns excluded
    pub fn columns_of(rows: &[RawRow]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for row in rows {
            for key in row.keys() {
                let name = normalize_column_name(key);
                if is_derived_column(&name) {
                    continue;
                }
                if seen.insert(name.clone()) {
                    columns.push(name);
                }
            }
        }
        columns
    }

    /// Convert raw rows into a customer table.
    ///
    /// The declared schema is the union of keys across rows. Any malformed
    /// cell or missing id aborts the conversion.
    pub fn to_customer_table(rows: Vec<RawRow>) -> Result<CustomerTable, FeatureError> {
        let columns = Self::columns_of(&rows);
        let mut records = Vec::with_capacity(rows.len());

        for (idx, row) in rows.into_iter().enumerate() {
            let record = Self::to_record(Self::normalize_row(row)).map_err(|e| match e {
                FeatureError::MissingField(field) => {
                    FeatureError::MissingField(format!("{} (row {})", field, idx))
                }
                other => other,
            })?;
            records.push(record);
        }

        debug!(
            rows = records.len(),
            columns = columns.len(),
            "customer table adapted"
        );
        CustomerTable::new(columns, records)
    }

    /// Convert one normalized row into a customer record
    pub fn to_record(mut row: RawRow) -> Result<CustomerRecord, FeatureError> {
        let customer_id = row
            .remove(CUSTOMER_ID)
            .as_ref()
            .and_then(id_from_value)
            .ok_or_else(|| FeatureError::MissingField(CUSTOMER_ID.to_string()))?;

        let cell_error = |e: ValueError| {
            FeatureError::ParseError(format!("customer {}: {}", customer_id, e))
        };

        let total_orders = match row.remove(TOTAL_ORDERS) {
            Some(v) => count_from_value(TOTAL_ORDERS, &v).map_err(cell_error)?,
            None => None,
        };
        let avg_order_value = match row.remove(AVG_ORDER_VALUE) {
            Some(v) => amount_from_value(AVG_ORDER_VALUE, &v).map_err(cell_error)?,
            None => None,
        };
        let last_order_date = match row.remove(LAST_ORDER_DATE) {
            Some(v) => timestamp_from_value(LAST_ORDER_DATE, &v).map_err(cell_error)?,
            None => None,
        };
        let channel = row.remove(CHANNEL).as_ref().and_then(label_from_value);

        let attributes: BTreeMap<String, Value> = row
            .into_iter()
            .filter(|(key, _)| !is_derived_column(key))
            .collect();

        Ok(CustomerRecord {
            customer_id,
            total_orders,
            avg_order_value,
            last_order_date,
            channel,
            attributes,
        })
    }

    /// Inspect rows without converting them, collecting every problem found
    pub fn inspect(rows: &[RawRow]) -> SchemaReport {
        let columns = Self::columns_of(rows);
        let missing_columns = REQUIRED_COLUMNS
            .iter()
            .filter(|c| !columns.iter().any(|col| col == *c))
            .map(|c| c.to_string())
            .collect();

        let mut null_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut issues = Vec::new();
        let mut seen_ids = HashSet::new();

        for (idx, raw) in rows.iter().enumerate() {
            let row = Self::normalize_row(raw.clone());
            for column in [TOTAL_ORDERS, AVG_ORDER_VALUE, LAST_ORDER_DATE, CHANNEL] {
                if columns.iter().any(|c| c == column)
                    && row.get(column).map_or(true, Value::is_null)
                {
                    *null_counts.entry(column.to_string()).or_insert(0) += 1;
                }
            }

            match Self::to_record(row) {
                Ok(record) => {
                    if !seen_ids.insert(record.customer_id.clone()) {
                        issues.push(RowIssue {
                            index: idx,
                            customer_id: Some(record.customer_id.clone()),
                            error: FeatureError::DuplicateCustomer(record.customer_id).to_string(),
                        });
                    }
                }
                Err(e) => issues.push(RowIssue {
                    index: idx,
                    customer_id: raw
                        .iter()
                        .find(|(k, _)| normalize_column_name(k) == CUSTOMER_ID)
                        .and_then(|(_, v)| id_from_value(v)),
                    error: e.to_string(),
                }),
            }
        }

        SchemaReport {
            total_rows: rows.len(),
            columns,
            missing_columns,
            null_counts,
            issues,
        }
    }
}

/// Problem found in a single row
#[derive(Debug, Clone, Serialize)]
pub struct RowIssue {
    pub index: usize,
    pub customer_id: Option<String>,
    pub error: String,
}

/// Result of inspecting an input table
#[derive(Debug, Clone, Serialize)]
pub struct SchemaReport {
    pub total_rows: usize,
    pub columns: Vec<String>,
    /// Required columns absent from the schema entirely
    pub missing_columns: Vec<String>,
    /// Per-column count of null cells that will be imputed
    pub null_counts: BTreeMap<String, usize>,
    pub issues: Vec<RowIssue>,
}

impl SchemaReport {
    pub fn is_valid(&self) -> bool {
        self.missing_columns.is_empty() && self.issues.is_empty()
    }
}

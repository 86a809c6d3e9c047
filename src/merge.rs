//! Record merging
//!
//! Builds the merged customer table from three raw sources: orders, the
//! customer register, and an optional supplemental sheet keyed by customer.
//! Order aggregates are left-joined onto customers, so every registered
//! customer survives, including those who never ordered.

use crate::config::PipelineConfig;
use crate::error::FeatureError;
use crate::schema::{
    id_from_value, label_from_value, normalize_column_name, number_from_value,
    timestamp_from_value, TableAdapter,
};
use crate::types::{
    is_derived_column, CustomerRecord, CustomerTable, RawRow, AVG_ORDER_VALUE, CHANNEL,
    CUSTOMER_ID, LAST_ORDER_DATE, TOTAL_ORDERS,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

pub const ORDER_DATE: &str = "order_date";
pub const ORDER_AMOUNT: &str = "order_amount";
pub const TOTAL_SPENT: &str = "total_spent";
pub const TARGET: &str = "target";

/// Source column names in the order export and their canonical names
const ORDER_RENAMES: [(&str, &str); 5] = [
    ("id", "order_id"),
    ("customer", CUSTOMER_ID),
    ("createdat", ORDER_DATE),
    ("saleschannel", CHANNEL),
    ("totalamount", ORDER_AMOUNT),
];

/// Columns produced by the merger itself; source rows cannot override them
const MERGED_COLUMNS: [&str; 7] = [
    CUSTOMER_ID,
    TOTAL_ORDERS,
    TOTAL_SPENT,
    AVG_ORDER_VALUE,
    LAST_ORDER_DATE,
    CHANNEL,
    TARGET,
];

/// One parsed order
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub customer_id: String,
    pub order_date: Option<DateTime<Utc>>,
    pub channel: Option<String>,
    pub amount: Option<f64>,
}

/// Running aggregate of a customer's orders
#[derive(Debug, Default)]
struct OrderAggregate {
    count: u64,
    amount_sum: f64,
    amount_count: u64,
    last_order_date: Option<DateTime<Utc>>,
    /// Channel counts in first-seen order
    channels: Vec<(String, u64)>,
}

impl OrderAggregate {
    fn add(&mut self, order: &Order) {
        self.count += 1;
        if let Some(amount) = order.amount {
            self.amount_sum += amount;
            self.amount_count += 1;
        }
        if let Some(date) = order.order_date {
            self.last_order_date = Some(self.last_order_date.map_or(date, |d| d.max(date)));
        }
        if let Some(channel) = &order.channel {
            match self.channels.iter_mut().find(|(c, _)| c == channel) {
                Some((_, n)) => *n += 1,
                None => self.channels.push((channel.clone(), 1)),
            }
        }
    }

    fn mean_amount(&self) -> Option<f64> {
        (self.amount_count > 0).then(|| self.amount_sum / self.amount_count as f64)
    }

    /// Most frequent channel, first seen on ties
    fn dominant_channel(&self) -> Option<String> {
        let mut best: Option<&(String, u64)> = None;
        for entry in &self.channels {
            if best.map_or(true, |b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        best.map(|(c, _)| c.clone())
    }
}

/// Merger for raw order, customer and supplemental rows
pub struct RecordMerger;

impl RecordMerger {
    /// Parse order rows. Rows without a customer id are dropped; dates and
    /// amounts that cannot be read become null, as do negative amounts
    /// (refunds), so `avg_order_value` stays non-negative.
    pub fn parse_orders(rows: &[RawRow]) -> Vec<Order> {
        let mut orders = Vec::with_capacity(rows.len());
        let mut dropped = 0usize;
        let mut refunds = 0usize;

        for raw in rows {
            let row = rename_columns(TableAdapter::normalize_row(raw.clone()), &ORDER_RENAMES);
            let Some(customer_id) = row.get(CUSTOMER_ID).and_then(id_from_value) else {
                dropped += 1;
                continue;
            };
            let amount = row
                .get(ORDER_AMOUNT)
                .and_then(|v| number_from_value(ORDER_AMOUNT, v).ok().flatten());
            if amount.is_some_and(|a| a < 0.0) {
                refunds += 1;
            }
            orders.push(Order {
                customer_id,
                order_date: row
                    .get(ORDER_DATE)
                    .and_then(|v| timestamp_from_value(ORDER_DATE, v).ok().flatten()),
                channel: row.get(CHANNEL).and_then(label_from_value),
                amount: amount.filter(|a| *a >= 0.0),
            });
        }

        if dropped > 0 {
            warn!(dropped, "orders without customer id dropped");
        }
        if refunds > 0 {
            warn!(refunds, "negative order amounts treated as missing");
        }
        orders
    }

    /// Merge the three sources into one row per registered customer
    pub fn merge(
        orders: &[RawRow],
        customers: &[RawRow],
        supplemental: &[RawRow],
        config: &PipelineConfig,
    ) -> Result<CustomerTable, FeatureError> {
        let orders = Self::parse_orders(orders);
        let target_cutoff = orders
            .iter()
            .filter_map(|o| o.order_date)
            .max()
            .map(|latest| latest - Duration::days(config.target_window_days));

        let mut aggregates: HashMap<&str, OrderAggregate> = HashMap::new();
        for order in &orders {
            aggregates
                .entry(order.customer_id.as_str())
                .or_default()
                .add(order);
        }

        let supplemental = index_by_customer(supplemental);

        let mut columns: Vec<String> = MERGED_COLUMNS[..6].iter().map(|c| c.to_string()).collect();
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(customers.len());

        for raw in customers {
            let row = rename_columns(TableAdapter::normalize_row(raw.clone()), &[("id", CUSTOMER_ID)]);
            let Some(customer_id) = row.get(CUSTOMER_ID).and_then(id_from_value) else {
                warn!("customer row without id skipped");
                continue;
            };
            if !seen.insert(customer_id.clone()) {
                warn!(customer_id = %customer_id, "duplicate customer row skipped");
                continue;
            }

            let extra = supplemental.get(&customer_id);
            let listed_channel = row
                .get(CHANNEL)
                .and_then(label_from_value)
                .or_else(|| extra.and_then(|e| e.get(CHANNEL)).and_then(label_from_value));

            let mut attributes: BTreeMap<String, Value> = BTreeMap::new();
            for (key, value) in row {
                if !is_reserved(&key) {
                    push_column(&mut columns, &key);
                    attributes.insert(key, value);
                }
            }
            if let Some(extra) = extra {
                for (key, value) in extra {
                    if !is_reserved(key) && !attributes.contains_key(key) {
                        push_column(&mut columns, key);
                        attributes.insert(key.clone(), value.clone());
                    }
                }
            }

            let aggregate = aggregates.get(customer_id.as_str());
            attributes.insert(
                TOTAL_SPENT.to_string(),
                aggregate
                    .filter(|a| a.amount_count > 0)
                    .and_then(|a| serde_json::Number::from_f64(a.amount_sum))
                    .map_or(Value::Null, Value::Number),
            );

            let last_order_date = aggregate.and_then(|a| a.last_order_date);
            let is_target = matches!(
                (last_order_date, target_cutoff),
                (Some(last), Some(cutoff)) if last >= cutoff
            );
            attributes.insert(TARGET.to_string(), Value::from(u8::from(is_target)));

            records.push(CustomerRecord {
                total_orders: aggregate.map(|a| a.count),
                avg_order_value: aggregate.and_then(OrderAggregate::mean_amount),
                last_order_date,
                channel: aggregate
                    .and_then(OrderAggregate::dominant_channel)
                    .or(listed_channel),
                attributes,
                ..CustomerRecord::new(customer_id)
            });
        }
        push_column(&mut columns, TARGET);

        info!(
            customers = records.len(),
            orders = orders.len(),
            with_orders = records.iter().filter(|r| r.total_orders.is_some()).count(),
            "sources merged"
        );
        CustomerTable::new(columns, records)
    }
}

fn is_reserved(column: &str) -> bool {
    MERGED_COLUMNS.contains(&column) || is_derived_column(column)
}

fn rename_columns(row: RawRow, renames: &[(&str, &str)]) -> RawRow {
    let mut renamed = RawRow::new();
    for (key, value) in row {
        let name = renames
            .iter()
            .find(|(from, _)| *from == key)
            .map_or(key, |(_, to)| to.to_string());
        if !renamed.contains_key(&name) {
            renamed.insert(name, value);
        }
    }
    renamed
}

fn index_by_customer(rows: &[RawRow]) -> HashMap<String, RawRow> {
    let mut index = HashMap::new();
    for raw in rows {
        let mut row = rename_columns(TableAdapter::normalize_row(raw.clone()), &[("id", CUSTOMER_ID)]);
        if let Some(customer_id) = row.remove(CUSTOMER_ID).as_ref().and_then(id_from_value) {
            index.entry(customer_id).or_insert(row);
        }
    }
    index
}

fn push_column(columns: &mut Vec<String>, name: &str) {
    let name = normalize_column_name(name);
    if !columns.contains(&name) {
        columns.push(name);
    }
}

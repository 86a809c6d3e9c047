//! Training set extraction and the predictor seam
//!
//! The feature table is turned into a numeric matrix with a fixed, reported
//! column order. Models live outside this crate: a [`Classifier`] fits on a
//! [`TrainingSet`] and hands back a [`Predictor`] that remembers the feature
//! names it was trained on, so inference can re-apply the same order.

use crate::error::FeatureError;
use crate::types::{
    is_derived_column, FeatureRecord, FeatureTable, AVG_ORDER_VALUE, CHANNEL, CUSTOMER_ID,
    LAST_ORDER_DATE, TOTAL_ORDERS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Identifier and label columns never used as model inputs
pub const EXCLUDED_COLUMNS: [&str; 5] = [
    CUSTOMER_ID,
    "loyalty_segment",
    "is_active",
    "is_inactive",
    "top_channel",
];

/// Numeric derived columns, in output order
pub const DERIVED_FEATURES: [&str; 10] = [
    "recency_days",
    "frequency",
    "monetary_value",
    "recency_score",
    "frequency_score",
    "monetary_score",
    "rfm_score",
    "engagement_score",
    "order_growth_est",
    "spending_index",
];

/// Model-ready matrix built from a feature table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    pub feature_names: Vec<String>,
    pub customer_ids: Vec<String>,
    /// One row per customer, aligned with `feature_names`
    pub features: Vec<Vec<f64>>,
    /// `is_active` as 0/1
    pub labels: Vec<u8>,
}

impl TrainingSet {
    /// Build the matrix. Null cells become 0.
    pub fn from_table(table: &FeatureTable) -> Result<Self, FeatureError> {
        let feature_names = feature_columns(table);
        let features = extract_matrix(table, &feature_names)?;
        let labels = table.rows.iter().map(|r| u8::from(r.is_active)).collect();

        info!(
            rows = table.len(),
            features = feature_names.len(),
            "training set extracted"
        );
        Ok(Self {
            feature_names,
            customer_ids: table.rows.iter().map(|r| r.customer_id.clone()).collect(),
            features,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Share of positive labels, 0 for an empty set
    pub fn positive_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().map(|&l| f64::from(l)).sum::<f64>() / self.labels.len() as f64
    }
}

/// A fitted model
pub trait Predictor {
    /// Feature names in the order `predict_proba` expects them
    fn feature_names(&self) -> &[String];

    /// Probability of the positive class for one feature row
    fn predict_proba(&self, features: &[f64]) -> f64;
}

/// A training algorithm
pub trait Classifier {
    fn fit(&self, training: &TrainingSet) -> Result<Box<dyn Predictor>, FeatureError>;
}

/// Positive-class probability for one customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub customer_id: String,
    pub probability: f64,
}

/// Logistic model with fixed weights, loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticPredictor {
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
}

impl LogisticPredictor {
    pub fn new(
        feature_names: Vec<String>,
        weights: Vec<f64>,
        intercept: f64,
    ) -> Result<Self, FeatureError> {
        let predictor = Self {
            feature_names,
            weights,
            intercept,
        };
        predictor.validate()?;
        Ok(predictor)
    }

    pub fn from_json(json: &str) -> Result<Self, FeatureError> {
        let predictor: Self = serde_json::from_str(json)?;
        predictor.validate()?;
        Ok(predictor)
    }

    fn validate(&self) -> Result<(), FeatureError> {
        if self.feature_names.len() != self.weights.len() {
            return Err(FeatureError::FeatureMismatch(format!(
                "{} feature names but {} weights",
                self.feature_names.len(),
                self.weights.len()
            )));
        }
        Ok(())
    }
}

impl Predictor for LogisticPredictor {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, features: &[f64]) -> f64 {
        let z = self.intercept
            + self
                .weights
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }
}

/// Score every row of a feature table, in row order.
///
/// Features are looked up by the predictor's own names, so column order in
/// the table does not matter; a trained feature missing from the table fails
/// the whole call.
pub fn predict_table(
    predictor: &dyn Predictor,
    table: &FeatureTable,
) -> Result<Vec<Prediction>, FeatureError> {
    let matrix = extract_matrix(table, predictor.feature_names())?;
    Ok(table
        .rows
        .iter()
        .zip(matrix)
        .map(|(row, features)| Prediction {
            customer_id: row.customer_id.clone(),
            probability: predictor.predict_proba(&features),
        })
        .collect())
}

/// Feature columns of a table: the order inputs, numeric attributes by name,
/// then the derived numeric columns
pub fn feature_columns(table: &FeatureTable) -> Vec<String> {
    let mut names = vec![TOTAL_ORDERS.to_string(), AVG_ORDER_VALUE.to_string()];

    let mut attributes: Vec<&String> = table
        .columns
        .iter()
        .filter(|c| !is_builtin(c) && !EXCLUDED_COLUMNS.contains(&c.as_str()))
        .filter(|c| is_numeric_attribute(table, c))
        .collect();
    attributes.sort();
    names.extend(attributes.into_iter().cloned());

    names.extend(DERIVED_FEATURES.iter().map(|c| c.to_string()));
    names
}

fn is_builtin(column: &str) -> bool {
    matches!(column, TOTAL_ORDERS | AVG_ORDER_VALUE | LAST_ORDER_DATE | CHANNEL)
        || is_derived_column(column)
}

/// True when at least one row holds a number or boolean and none holds
/// anything else besides null
fn is_numeric_attribute(table: &FeatureTable, column: &str) -> bool {
    let mut seen_value = false;
    for row in &table.rows {
        match row.attributes.get(column) {
            None | Some(Value::Null) => {}
            Some(Value::Number(_)) | Some(Value::Bool(_)) => seen_value = true,
            Some(_) => return false,
        }
    }
    seen_value
}

fn extract_matrix(table: &FeatureTable, names: &[String]) -> Result<Vec<Vec<f64>>, FeatureError> {
    for name in names {
        let known = matches!(name.as_str(), TOTAL_ORDERS | AVG_ORDER_VALUE)
            || DERIVED_FEATURES.contains(&name.as_str())
            || table.columns.contains(name);
        if !known {
            return Err(FeatureError::FeatureMismatch(format!(
                "trained feature '{}' is not in the table",
                name
            )));
        }
    }

    Ok(table
        .rows
        .iter()
        .map(|row| names.iter().map(|name| feature_value(row, name)).collect())
        .collect())
}

fn feature_value(row: &FeatureRecord, name: &str) -> f64 {
    match name {
        TOTAL_ORDERS => row.total_orders.unwrap_or(0) as f64,
        AVG_ORDER_VALUE => row.avg_order_value.unwrap_or(0.0),
        "recency_days" => row.recency_days as f64,
        "frequency" => row.frequency as f64,
        "monetary_value" => row.monetary_value,
        "recency_score" => f64::from(row.recency_score),
        "frequency_score" => f64::from(row.frequency_score),
        "monetary_score" => f64::from(row.monetary_score),
        "rfm_score" => f64::from(row.rfm_score),
        "engagement_score" => row.engagement_score,
        "order_growth_est" => row.order_growth_est.unwrap_or(0.0),
        "spending_index" => row.spending_index.unwrap_or(0.0),
        _ => match row.attributes.get(name) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::Bool(b)) => f64::from(u8::from(*b)),
            _ => 0.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::customers_to_features;
    use pretty_assertions::assert_eq;

    fn sample_table() -> FeatureTable {
        customers_to_features(
            r#"[
                {"customer_id": "a", "total_orders": 5, "avg_order_value": 40.0,
                 "last_order_date": "2024-03-10T00:00:00Z", "age": 31, "name": "Ana", "target": 1},
                {"customer_id": "b", "total_orders": null, "avg_order_value": 12.5,
                 "last_order_date": "2023-11-02T00:00:00Z", "age": null, "name": "Bia", "target": 0},
                {"customer_id": "c", "total_orders": 2, "avg_order_value": null,
                 "last_order_date": null, "vip_card": true, "name": "Caio", "target": 0}
            ]"#
            .to_string(),
        )
        .unwrap()
    }

    /// Always predicts the first feature scaled into [0, 1]
    struct FirstFeature {
        names: Vec<String>,
    }

    impl Predictor for FirstFeature {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict_proba(&self, features: &[f64]) -> f64 {
            features[0] / 10.0
        }
    }

    struct FirstFeatureClassifier;

    impl Classifier for FirstFeatureClassifier {
        fn fit(&self, training: &TrainingSet) -> Result<Box<dyn Predictor>, FeatureError> {
            Ok(Box::new(FirstFeature {
                names: training.feature_names.clone(),
            }))
        }
    }

    #[test]
    fn test_feature_order() {
        let training = TrainingSet::from_table(&sample_table()).unwrap();
        let expected: Vec<String> = [
            "total_orders",
            "avg_order_value",
            "age",
            "target",
            "vip_card",
            "recency_days",
            "frequency",
            "monetary_value",
            "recency_score",
            "frequency_score",
            "monetary_score",
            "rfm_score",
            "engagement_score",
            "order_growth_est",
            "spending_index",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(training.feature_names, expected);
    }

    #[test]
    fn test_nulls_become_zero() {
        let training = TrainingSet::from_table(&sample_table()).unwrap();
        assert_eq!(training.len(), 3);
        assert_eq!(training.features[1][0], 0.0);
        assert_eq!(training.features[1][2], 0.0);
        assert_eq!(training.features[2][1], 0.0);
        assert_eq!(training.features[2][4], 1.0);
        assert_eq!(training.features[0][2], 31.0);
        assert_eq!(training.features[0][3], 1.0);
        assert_eq!(training.features[1][3], 0.0);
        assert!(training.features.iter().all(|row| row.len() == 15));
    }

    #[test]
    fn test_labels_follow_is_active() {
        let table = sample_table();
        let training = TrainingSet::from_table(&table).unwrap();
        let expected: Vec<u8> = table.rows.iter().map(|r| u8::from(r.is_active)).collect();
        assert_eq!(training.labels, expected);
        assert_eq!(training.labels[0], 1);
        assert_eq!(training.labels[2], 0);
    }

    #[test]
    fn test_predict_table_uses_trained_order() {
        let table = sample_table();
        let training = TrainingSet::from_table(&table).unwrap();
        let predictor = FirstFeatureClassifier.fit(&training).unwrap();

        let predictions = predict_table(predictor.as_ref(), &table).unwrap();
        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].customer_id, "a");
        assert!((predictions[0].probability - 0.5).abs() < 1e-12);
        assert_eq!(predictions[1].probability, 0.0);
    }

    #[test]
    fn test_missing_feature_rejected() {
        let predictor = LogisticPredictor::new(vec!["loyalty_points".to_string()], vec![1.0], 0.0)
            .unwrap();
        let err = predict_table(&predictor, &sample_table()).unwrap_err();
        assert!(matches!(err, FeatureError::FeatureMismatch(_)));
    }

    #[test]
    fn test_logistic_predictor() {
        let predictor = LogisticPredictor::from_json(
            r#"{"feature_names": ["rfm_score"], "weights": [0.0], "intercept": 0.0}"#,
        )
        .unwrap();
        assert_eq!(predictor.predict_proba(&[7.0]), 0.5);

        let err = LogisticPredictor::from_json(r#"{"feature_names": ["a", "b"], "weights": [1.0]}"#)
            .unwrap_err();
        assert!(matches!(err, FeatureError::FeatureMismatch(_)));
    }
}

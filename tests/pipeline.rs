//! Integration tests for Retention Flux

use pretty_assertions::assert_eq;
use retention_flux::encoder::decode_rows_ndjson;
use retention_flux::schema::TableAdapter;
use retention_flux::training::LogisticPredictor;
use retention_flux::types::DERIVED_COLUMNS;
use retention_flux::{
    customers_to_features, decode_snapshot, predict_table, rank_predictions, FeatureError,
    FeaturePipeline, FeatureTable, LoyaltySegment, PipelineConfig, RecordMerger,
    SnapshotEncoder, TrainingSet,
};
use std::io::Write;
use tempfile::NamedTempFile;

/// Ten customers: eight ordered within the last 30 days, two never did
fn ten_customers_json() -> String {
    let mut rows = Vec::new();
    for i in 0..8 {
        rows.push(serde_json::json!({
            "Customer_ID": format!("c{}", i + 1),
            "Total_Orders": i + 1,
            "Avg_Order_Value": 10.0 * (i + 1) as f64,
            "Last_Order_Date": format!("2024-06-{:02}", 30 - 3 * i),
            "Channel": if i % 3 == 0 { "app" } else { "store" },
            "Name": format!("Customer {}", i + 1),
        }));
    }
    for i in 8..10 {
        rows.push(serde_json::json!({
            "Customer_ID": format!("c{}", i + 1),
            "Total_Orders": 0,
            "Avg_Order_Value": null,
            "Last_Order_Date": null,
            "Channel": null,
        }));
    }
    serde_json::Value::Array(rows).to_string()
}

fn ten_customer_features() -> FeatureTable {
    customers_to_features(ten_customers_json()).unwrap()
}

#[test]
fn test_ten_customer_scenario() {
    let table = ten_customer_features();

    assert_eq!(table.len(), 10);
    assert_eq!(table.rows.iter().filter(|r| r.is_active).count(), 8);

    for id in ["c9", "c10"] {
        let row = table.get(id).unwrap();
        assert_eq!(row.recency_days, 9999);
        assert!(row.is_inactive);
        assert!(!row.is_active);
        assert_eq!(row.frequency, 0);
        assert_eq!(row.monetary_value, 0.0);
    }

    let newest = table.get("c1").unwrap();
    assert_eq!(newest.recency_days, 0);
    assert!(newest.is_active);
    assert!(!newest.is_inactive);

    // "store" is used by more customers than "app"
    assert_eq!(table.top_channel, "store");
    assert!(table.rows.iter().all(|r| r.top_channel == "store"));
}

#[test]
fn test_every_row_is_complete() {
    let table = ten_customer_features();
    let ids: Vec<&str> = table.rows.iter().map(|r| r.customer_id.as_str()).collect();
    let expected: Vec<String> = (1..=10).map(|i| format!("c{}", i)).collect();
    assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());

    for column in DERIVED_COLUMNS {
        assert!(table.columns.iter().any(|c| c == column), "missing {}", column);
    }
    // Input columns come first, normalized, followed by the derived ones
    assert_eq!(table.columns.len(), 6 + DERIVED_COLUMNS.len());
    assert!(table.columns[..6].iter().all(|c| !DERIVED_COLUMNS.contains(&c.as_str())));
    assert!(table.columns[..6].iter().any(|c| c == "name"));

    for row in &table.rows {
        for score in [row.recency_score, row.frequency_score, row.monetary_score] {
            assert!(score <= 4);
        }
        assert_eq!(
            row.rfm_score,
            row.recency_score + row.frequency_score + row.monetary_score
        );
        assert_eq!(
            row.loyalty_segment,
            LoyaltySegment::from_rfm_score(i64::from(row.rfm_score)).unwrap()
        );
        assert!(row.order_growth_est.is_some());
        assert!(row.spending_index.is_some());
    }
}

#[test]
fn test_single_zero_order_customer() {
    let table = customers_to_features(
        r#"[{"customer_id": "solo", "total_orders": 0, "avg_order_value": 0,
             "last_order_date": null}]"#
            .to_string(),
    )
    .unwrap();

    let row = &table.rows[0];
    assert_eq!(row.frequency, 0);
    assert_eq!(row.frequency_score, 0);
    assert_eq!(row.order_growth_est, Some(0.0));
    assert_eq!(row.spending_index, Some(0.0));
    assert_eq!(row.recency_days, 9999);
    assert_eq!(table.reference_date, None);
    assert_eq!(table.top_channel, "unknown");
    assert!(!table.warnings.is_empty());
}

#[test]
fn test_segment_totality() {
    for score in 0..=12 {
        assert!(LoyaltySegment::from_rfm_score(score).is_ok(), "score {}", score);
    }
    assert_eq!(LoyaltySegment::from_rfm_score(12).unwrap(), LoyaltySegment::Vip);
    assert_eq!(LoyaltySegment::from_rfm_score(0).unwrap(), LoyaltySegment::Churned);
    assert!(matches!(
        LoyaltySegment::from_rfm_score(13),
        Err(FeatureError::OutOfRangeScore { .. })
    ));
}

#[test]
fn test_missing_required_column() {
    let err = customers_to_features(
        r#"[{"customer_id": "a", "total_orders": 2, "last_order_date": "2024-01-01"}]"#
            .to_string(),
    )
    .unwrap_err();
    assert!(matches!(err, FeatureError::MissingColumn(ref c) if c == "avg_order_value"));
}

#[test]
fn test_runs_are_deterministic() {
    let input = TableAdapter::to_customer_table(
        TableAdapter::parse_array(&ten_customers_json()).unwrap(),
    )
    .unwrap();
    let pipeline = FeaturePipeline::new();

    let first = pipeline.run(&input).unwrap();
    let second = pipeline.run(&input).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_rescoring_own_output_is_stable() {
    let table = ten_customer_features();
    let rescored = FeaturePipeline::new()
        .run(&table.to_customer_table().unwrap())
        .unwrap();
    assert_eq!(rescored, table);
}

#[test]
fn test_rescoring_ndjson_rows() {
    let table = ten_customer_features();
    let ndjson = retention_flux::encoder::encode_rows_ndjson(&table).unwrap();

    // Derived columns in the rows are ignored on the way back in
    let rows = TableAdapter::parse_ndjson(&ndjson).unwrap();
    let rescored = FeaturePipeline::new()
        .run(&TableAdapter::to_customer_table(rows).unwrap())
        .unwrap();
    assert_eq!(rescored.rows, decode_rows_ndjson(&ndjson).unwrap());
}

#[test]
fn test_snapshot_file_round_trip() {
    let table = ten_customer_features();
    let encoder = SnapshotEncoder::with_run_id("nightly-1".to_string());

    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", encoder.encode_to_json_pretty(&table).unwrap()).unwrap();

    let contents = std::fs::read_to_string(file.path()).unwrap();
    let snapshot = decode_snapshot(&contents).unwrap();
    assert_eq!(snapshot.producer.run_id, "nightly-1");
    assert_eq!(snapshot.row_count, 10);
    assert_eq!(snapshot.table, table);
}

#[test]
fn test_custom_windows() {
    let config = PipelineConfig {
        active_window_days: 5,
        inactive_after_days: 10,
        ..PipelineConfig::default()
    };
    let input = TableAdapter::to_customer_table(
        TableAdapter::parse_array(&ten_customers_json()).unwrap(),
    )
    .unwrap();
    let table = FeaturePipeline::with_config(config).unwrap().run(&input).unwrap();

    // Recencies are 0, 3, 6, ... 21 days for the eight ordering customers
    assert_eq!(table.rows.iter().filter(|r| r.is_active).count(), 2);
    assert_eq!(table.rows.iter().filter(|r| r.is_inactive).count(), 6);
}

#[test]
fn test_merge_to_ranking() {
    let orders = TableAdapter::parse_array(
        r#"[
            {"Id": 1, "Customer": 1, "CreatedAt": "01/06/2024 10:00", "SalesChannel": "app", "TotalAmount": 80},
            {"Id": 2, "Customer": 1, "CreatedAt": "28/06/2024 10:00", "SalesChannel": "app", "TotalAmount": 40},
            {"Id": 3, "Customer": 2, "CreatedAt": "15/01/2024 10:00", "SalesChannel": "store", "TotalAmount": 25},
            {"Id": 4, "Customer": 3, "CreatedAt": "30/06/2024 10:00", "SalesChannel": "app", "TotalAmount": 60}
        ]"#,
    )
    .unwrap();
    let customers = TableAdapter::parse_array(
        r#"[
            {"Id": 1, "Name": "Ana", "Phone": "+55 (11) 98888-7777"},
            {"Id": 2, "Name": "Bruno"},
            {"Id": 3, "Name": "Carla"},
            {"Id": 4, "Name": "Davi"}
        ]"#,
    )
    .unwrap();

    let merged = RecordMerger::merge(&orders, &customers, &[], &PipelineConfig::default()).unwrap();
    let table = FeaturePipeline::new().run(&merged).unwrap();
    assert_eq!(table.len(), 4);
    assert_eq!(table.top_channel, "app");
    assert_eq!(table.get("4").unwrap().recency_days, 9999);

    let training = TrainingSet::from_table(&table).unwrap();
    assert_eq!(training.labels, vec![1, 0, 1, 0]);
    assert!(training.feature_names.iter().any(|f| f == "total_spent"));
    // The merger's target flag is an ordinary numeric input
    let target = training.feature_names.iter().position(|f| f == "target").unwrap();
    let targets: Vec<f64> = training.features.iter().map(|row| row[target]).collect();
    assert_eq!(targets, vec![1.0, 0.0, 1.0, 0.0]);

    // More orders means a higher probability
    let predictor = LogisticPredictor::new(vec!["total_orders".to_string()], vec![1.0], -1.0)
        .unwrap();
    let predictions = predict_table(&predictor, &table).unwrap();
    let ranked = rank_predictions(&predictions, &table, 2);

    assert_eq!(ranked[0].customer_id, "1");
    assert_eq!(ranked[0].name.as_deref(), Some("Ana"));
    assert_eq!(ranked[0].phone.as_deref(), Some("+55 (11) 98888-7777"));
    assert_eq!(ranked[1].customer_id, "2");
}

#[test]
fn test_refund_rows_survive_merge_round_trip() {
    let orders = TableAdapter::parse_array(
        r#"[
            {"Id": 1, "Customer": 1, "CreatedAt": "10/06/2024 10:00", "SalesChannel": "app", "TotalAmount": -30},
            {"Id": 2, "Customer": 2, "CreatedAt": "20/06/2024 10:00", "SalesChannel": "app", "TotalAmount": 10}
        ]"#,
    )
    .unwrap();
    let customers =
        TableAdapter::parse_array(r#"[{"Id": 1, "Name": "Ana"}, {"Id": 2, "Name": "Bruno"}]"#)
            .unwrap();

    let merged = RecordMerger::merge(&orders, &customers, &[], &PipelineConfig::default()).unwrap();
    assert!(merged
        .rows()
        .iter()
        .all(|r| r.avg_order_value.map_or(true, |v| v >= 0.0)));
    let in_process = FeaturePipeline::new().run(&merged).unwrap();

    // Merged rows as written by `rflux merge`, read back by `rflux features`
    let written = serde_json::to_string(merged.rows()).unwrap();
    let reread =
        TableAdapter::to_customer_table(TableAdapter::parse_array(&written).unwrap()).unwrap();
    let table = FeaturePipeline::new().run(&reread).unwrap();
    assert_eq!(table.rows, in_process.rows);

    let refunded = table.get("1").unwrap();
    assert_eq!(refunded.total_orders, Some(1));
    assert_eq!(refunded.avg_order_value, None);
    assert_eq!(refunded.spending_index, Some(0.0));

    let paying = table.get("2").unwrap();
    assert_eq!(paying.avg_order_value, Some(10.0));
    assert_eq!(paying.spending_index, Some(2.0));
}

#[test]
fn test_register_channel_reaches_top_channel() {
    let orders = TableAdapter::parse_array(
        r#"[{"Id": 1, "Customer": 3, "CreatedAt": "20/06/2024 10:00", "TotalAmount": 10}]"#,
    )
    .unwrap();
    let customers = TableAdapter::parse_array(
        r#"[
            {"Id": 1, "channel": "store"},
            {"Id": 2, "channel": "web"},
            {"Id": 3, "channel": "store"}
        ]"#,
    )
    .unwrap();

    let merged = RecordMerger::merge(&orders, &customers, &[], &PipelineConfig::default()).unwrap();
    let table = FeaturePipeline::new().run(&merged).unwrap();
    assert_eq!(table.top_channel, "store");
    assert_eq!(table.get("2").unwrap().channel.as_deref(), Some("web"));
}

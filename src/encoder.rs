//! Snapshot encoding
//!
//! This module wraps an assembled feature table in a versioned snapshot
//! envelope for downstream consumers, and reads such snapshots back.

use crate::error::FeatureError;
use crate::types::{FeatureRecord, FeatureTable};
use crate::{FLUX_VERSION, PRODUCER_NAME};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current snapshot schema version
pub const SNAPSHOT_VERSION: &str = "retention.features.v1";

/// Who produced a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotProducer {
    pub name: String,
    pub version: String,
    /// Identifier of the run that wrote this snapshot
    pub run_id: String,
}

/// A feature table plus run metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub snapshot_version: String,
    pub producer: SnapshotProducer,
    pub computed_at_utc: String,
    pub row_count: usize,
    #[serde(flatten)]
    pub table: FeatureTable,
}

/// Snapshot encoder for producing versioned feature snapshots
pub struct SnapshotEncoder {
    run_id: String,
}

impl Default for SnapshotEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotEncoder {
    /// Create a new encoder with a unique run ID
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific run ID
    pub fn with_run_id(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Wrap a feature table in a snapshot envelope
    pub fn encode(&self, table: &FeatureTable) -> FeatureSnapshot {
        FeatureSnapshot {
            snapshot_version: SNAPSHOT_VERSION.to_string(),
            producer: SnapshotProducer {
                name: PRODUCER_NAME.to_string(),
                version: FLUX_VERSION.to_string(),
                run_id: self.run_id.clone(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            row_count: table.len(),
            table: table.clone(),
        }
    }

    /// Encode a feature table to a compact JSON snapshot
    pub fn encode_to_json(&self, table: &FeatureTable) -> Result<String, FeatureError> {
        Ok(serde_json::to_string(&self.encode(table))?)
    }

    /// Encode a feature table to a pretty-printed JSON snapshot
    pub fn encode_to_json_pretty(&self, table: &FeatureTable) -> Result<String, FeatureError> {
        Ok(serde_json::to_string_pretty(&self.encode(table))?)
    }
}

/// Encode rows only, one JSON object per line
pub fn encode_rows_ndjson(table: &FeatureTable) -> Result<String, FeatureError> {
    let mut lines = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        lines.push(serde_json::to_string(row)?);
    }
    Ok(lines.join("\n") + "\n")
}

/// Decode a JSON snapshot, checking its version and row count
pub fn decode_snapshot(json: &str) -> Result<FeatureSnapshot, FeatureError> {
    let snapshot: FeatureSnapshot = serde_json::from_str(json)?;
    if snapshot.snapshot_version != SNAPSHOT_VERSION {
        return Err(FeatureError::ParseError(format!(
            "Unsupported snapshot version: expected {}, got {}",
            SNAPSHOT_VERSION, snapshot.snapshot_version
        )));
    }
    if snapshot.row_count != snapshot.table.rows.len() {
        return Err(FeatureError::ParseError(format!(
            "Snapshot declares {} rows but holds {}",
            snapshot.row_count,
            snapshot.table.rows.len()
        )));
    }
    Ok(snapshot)
}

/// Decode NDJSON feature rows
pub fn decode_rows_ndjson(ndjson: &str) -> Result<Vec<FeatureRecord>, FeatureError> {
    let mut rows = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row = serde_json::from_str::<FeatureRecord>(trimmed).map_err(|e| {
            FeatureError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

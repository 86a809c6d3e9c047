//! Retention Flux - customer feature derivation for repurchase propensity
//!
//! Flux turns a merged customer table into a model-ready feature table
//! through a deterministic pipeline: record merge → RFM scoring → engagement
//! → trend and segment → validated feature snapshot.
//!
//! ## Modules
//!
//! - **Feature Pipeline**: RFM quintile scores, activity flags, engagement,
//!   trend indicators and loyalty segments for every customer
//! - **Record Merger**: Aggregate raw orders onto the customer register
//! - **Training / Ranking**: Numeric training matrix, predictor seam and a
//!   contact ranking built from predictions

pub mod config;
pub mod encoder;
pub mod error;
pub mod features;
pub mod merge;
pub mod pipeline;
pub mod quantile;
pub mod ranking;
pub mod schema;
pub mod training;
pub mod types;

pub use config::PipelineConfig;
pub use encoder::{decode_snapshot, FeatureSnapshot, SnapshotEncoder, SNAPSHOT_VERSION};
pub use error::FeatureError;
pub use merge::RecordMerger;
pub use pipeline::{customers_to_features, validate_feature_table, FeaturePipeline};
pub use ranking::{
    evaluate, format_phone, rank_predictions, top_fraction_rate, Evaluation, RankedCustomer,
};
pub use training::{predict_table, Classifier, Prediction, Predictor, TrainingSet};

// Schema exports
pub use schema::{SchemaReport, TableAdapter};

// Table exports
pub use types::{
    CustomerRecord, CustomerTable, FeatureRecord, FeatureSummary, FeatureTable, LoyaltySegment,
    SegmentCounts,
};

/// Flux version embedded in every feature snapshot
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for feature snapshots
pub const PRODUCER_NAME: &str = "retention-flux";

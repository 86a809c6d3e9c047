//! Run configuration
//!
//! Every value here is scoped to a single pipeline run and passed explicitly
//! to the stages that need it. Nothing is cached process-wide.

use crate::error::FeatureError;
use serde::{Deserialize, Serialize};

/// Days since last order at or below which a customer counts as active
pub const DEFAULT_ACTIVE_WINDOW_DAYS: i64 = 30;

/// Days since last order above which a customer counts as inactive
pub const DEFAULT_INACTIVE_AFTER_DAYS: i64 = 90;

/// Recency assigned to customers that never ordered
pub const DEFAULT_MISSING_RECENCY_DAYS: i64 = 9999;

/// Channel label used when no channel information exists
pub const DEFAULT_UNKNOWN_CHANNEL: &str = "unknown";

/// Configuration for a feature pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// `is_active` is true when `recency_days <= active_window_days`
    pub active_window_days: i64,
    /// `is_inactive` is true when `recency_days > inactive_after_days`
    pub inactive_after_days: i64,
    /// Sentinel recency for customers without a last order date
    pub missing_recency_days: i64,
    /// Label used for `top_channel` when the channel column is absent or empty
    pub unknown_channel: String,
    /// Window (days before the latest order) used by the merger's `target` column
    pub target_window_days: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            active_window_days: DEFAULT_ACTIVE_WINDOW_DAYS,
            inactive_after_days: DEFAULT_INACTIVE_AFTER_DAYS,
            missing_recency_days: DEFAULT_MISSING_RECENCY_DAYS,
            unknown_channel: DEFAULT_UNKNOWN_CHANNEL.to_string(),
            target_window_days: DEFAULT_ACTIVE_WINDOW_DAYS,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, FeatureError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the windows are consistent with each other
    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.active_window_days < 0 || self.inactive_after_days < 0 {
            return Err(FeatureError::InvalidConfig(
                "activity windows must be non-negative".to_string(),
            ));
        }
        if self.active_window_days > self.inactive_after_days {
            return Err(FeatureError::InvalidConfig(format!(
                "active_window_days ({}) exceeds inactive_after_days ({})",
                self.active_window_days, self.inactive_after_days
            )));
        }
        if self.missing_recency_days <= self.inactive_after_days {
            return Err(FeatureError::InvalidConfig(format!(
                "missing_recency_days ({}) must exceed inactive_after_days ({})",
                self.missing_recency_days, self.inactive_after_days
            )));
        }
        if self.target_window_days < 0 {
            return Err(FeatureError::InvalidConfig(
                "target_window_days must be non-negative".to_string(),
            ));
        }
        if self.unknown_channel.trim().is_empty() {
            return Err(FeatureError::InvalidConfig(
                "unknown_channel must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

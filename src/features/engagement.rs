//! Engagement features
//!
//! Activity-window flags, the run's dominant channel, and a composite
//! engagement score built from the RFM buckets.

use crate::config::PipelineConfig;
use crate::features::rfm::MAX_BUCKET_SCORE;
use crate::types::{CustomerTable, EngagementFeatures, RfmScores, CHANNEL};
use std::collections::HashMap;
use tracing::info;

/// Output of the engagement stage
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementOutcome {
    /// Channel with the most customers in this run
    pub top_channel: String,
    /// One entry per customer, in table order
    pub features: Vec<EngagementFeatures>,
}

/// Engagement deriver
pub struct EngagementDeriver;

impl EngagementDeriver {
    /// Derive engagement features from RFM scores.
    ///
    /// `scores` must be aligned with the table rows.
    pub fn derive(
        table: &CustomerTable,
        scores: &[RfmScores],
        config: &PipelineConfig,
    ) -> EngagementOutcome {
        let top_channel =
            top_channel(table).unwrap_or_else(|| config.unknown_channel.clone());

        let features: Vec<EngagementFeatures> = scores
            .iter()
            .map(|s| EngagementFeatures {
                is_active: s.recency_days <= config.active_window_days,
                is_inactive: s.recency_days > config.inactive_after_days,
                engagement_score: engagement_score(s),
            })
            .collect();

        info!(
            top_channel = %top_channel,
            active = features.iter().filter(|f| f.is_active).count(),
            inactive = features.iter().filter(|f| f.is_inactive).count(),
            "engagement features derived"
        );

        EngagementOutcome {
            top_channel,
            features,
        }
    }
}

/// Most common channel across the table.
///
/// Ties go to the channel encountered first in row order. Returns `None` when
/// the channel column is absent or holds no values.
pub fn top_channel(table: &CustomerTable) -> Option<String> {
    if !table.has_column(CHANNEL) {
        return None;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();
    for channel in table.rows().iter().filter_map(|r| r.channel.as_deref()) {
        let count = counts.entry(channel).or_insert(0);
        if *count == 0 {
            first_seen.push(channel);
        }
        *count += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for channel in first_seen {
        let count = counts[channel];
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((channel, count));
        }
    }
    best.map(|(channel, _)| channel.to_string())
}

/// Inverted recency bucket plus frequency and monetary buckets.
///
/// A lower recency bucket means more recent activity, so it is flipped
/// before summing. A recency bucket above the highest index inverts to 0.
pub fn engagement_score(scores: &RfmScores) -> f64 {
    f64::from(MAX_BUCKET_SCORE.saturating_sub(scores.recency_score))
        + f64::from(scores.frequency_score)
        + f64::from(scores.monetary_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CustomerRecord;

    fn with_channel(id: &str, channel: Option<&str>) -> CustomerRecord {
        CustomerRecord {
            channel: channel.map(str::to_string),
            ..CustomerRecord::new(id)
        }
    }

    fn scores(recency_days: i64, r: u8, f: u8, m: u8) -> RfmScores {
        RfmScores {
            recency_days,
            frequency: 1,
            monetary_value: 1.0,
            recency_score: r,
            frequency_score: f,
            monetary_score: m,
            rfm_score: r + f + m,
        }
    }

    #[test]
    fn test_top_channel_mode() {
        let table = CustomerTable::from_records(vec![
            with_channel("a", Some("store")),
            with_channel("b", Some("app")),
            with_channel("c", Some("app")),
            with_channel("d", None),
        ])
        .unwrap();
        assert_eq!(top_channel(&table).as_deref(), Some("app"));
    }

    #[test]
    fn test_top_channel_tie_goes_to_first_seen() {
        let table = CustomerTable::from_records(vec![
            with_channel("a", Some("web")),
            with_channel("b", Some("app")),
            with_channel("c", Some("app")),
            with_channel("d", Some("web")),
        ])
        .unwrap();
        assert_eq!(top_channel(&table).as_deref(), Some("web"));
    }

    #[test]
    fn test_absent_channel_column_is_unknown() {
        let table = CustomerTable::from_records(vec![CustomerRecord::new("a")]).unwrap();
        let outcome =
            EngagementDeriver::derive(&table, &[scores(0, 0, 0, 0)], &PipelineConfig::default());
        assert_eq!(outcome.top_channel, "unknown");
    }

    #[test]
    fn test_all_null_channels_is_unknown() {
        let table = CustomerTable::new(
            vec!["customer_id".into(), "channel".into()],
            vec![with_channel("a", None)],
        )
        .unwrap();
        assert_eq!(top_channel(&table), None);
    }

    #[test]
    fn test_activity_flags() {
        let table = CustomerTable::from_records(vec![
            CustomerRecord::new("a"),
            CustomerRecord::new("b"),
            CustomerRecord::new("c"),
            CustomerRecord::new("d"),
        ])
        .unwrap();
        let rfm = [
            scores(30, 0, 0, 0),
            scores(31, 0, 0, 0),
            scores(90, 0, 0, 0),
            scores(91, 0, 0, 0),
        ];
        let outcome = EngagementDeriver::derive(&table, &rfm, &PipelineConfig::default());
        let flags: Vec<(bool, bool)> = outcome
            .features
            .iter()
            .map(|f| (f.is_active, f.is_inactive))
            .collect();
        assert_eq!(
            flags,
            vec![(true, false), (false, false), (false, false), (false, true)]
        );
    }

    #[test]
    fn test_engagement_score_inverts_recency() {
        assert_eq!(engagement_score(&scores(0, 0, 4, 4)), 12.0);
        assert_eq!(engagement_score(&scores(0, 4, 0, 0)), 0.0);
        assert_eq!(engagement_score(&scores(0, 2, 1, 3)), 6.0);
    }

    #[test]
    fn test_engagement_score_out_of_range_recency() {
        let mut rfm = scores(0, 0, 2, 3);
        rfm.recency_score = 7;
        assert_eq!(engagement_score(&rfm), 5.0);
    }
}

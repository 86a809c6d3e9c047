//! Feature derivation
//!
//! The three derivation stages, run in this order by the assembler:
//! - RFM scoring (recency, frequency, monetary buckets)
//! - Engagement (activity flags, top channel, engagement score)
//! - Trend and segment (growth and spending ratios, loyalty segment)
//!
//! Each stage borrows the same immutable customer table and returns its own
//! per-row values aligned with the table rows.

pub mod engagement;
pub mod rfm;
pub mod trend;

pub use engagement::{EngagementDeriver, EngagementOutcome};
pub use rfm::{RfmOutcome, RfmScorer, MAX_BUCKET_SCORE, SCORE_BUCKETS};
pub use trend::TrendDeriver;

//! Propensity ranking and evaluation
//!
//! Joins predictions back onto the customer fields a contact list needs, and
//! scores predictions against known labels. No feature logic lives here.

use crate::schema::{id_from_value, label_from_value};
use crate::training::Prediction;
use crate::types::{FeatureRecord, FeatureTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One entry of the contact ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCustomer {
    /// 1-based position
    pub rank: usize,
    pub customer_id: String,
    pub probability: f64,
    pub total_orders: Option<u64>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Sort predictions by probability (highest first, input order on ties) and
/// keep the first `top_n`
pub fn rank_predictions(
    predictions: &[Prediction],
    table: &FeatureTable,
    top_n: usize,
) -> Vec<RankedCustomer> {
    let rows: HashMap<&str, &FeatureRecord> = table
        .rows
        .iter()
        .map(|r| (r.customer_id.as_str(), r))
        .collect();

    let mut sorted: Vec<&Prediction> = predictions.iter().collect();
    sorted.sort_by(|a, b| b.probability.total_cmp(&a.probability));

    sorted
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(idx, prediction)| {
            let row = rows.get(prediction.customer_id.as_str());
            let field = |name: &str| {
                row.and_then(|r| r.attributes.get(name))
                    .and_then(label_from_value)
            };
            RankedCustomer {
                rank: idx + 1,
                customer_id: prediction.customer_id.clone(),
                probability: prediction.probability,
                total_orders: row.and_then(|r| r.total_orders),
                name: field("name"),
                phone: row
                    .and_then(|r| r.attributes.get("phone"))
                    .and_then(id_from_value)
                    .map(|p| format_phone(&p)),
                email: field("email"),
            }
        })
        .collect()
}

/// Render a Brazilian phone number for display.
///
/// Non-digits are stripped and a leading `55` country code is removed while
/// more than 11 digits remain. Numbers of unexpected length come back as
/// bare digits.
pub fn format_phone(raw: &str) -> String {
    let mut digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    while digits.starts_with("55") && digits.len() > 11 {
        digits.replace_range(..2, "");
    }
    if digits.len() > 11 {
        let excess = digits.len() - 11;
        digits.replace_range(..excess, "");
    }

    let d = digits.as_str();
    match d.len() {
        11 => format!("+55 ({}) {}-{}", &d[..2], &d[2..7], &d[7..]),
        10 => format!("+55 ({}) {}-{}", &d[..2], &d[2..6], &d[6..]),
        9 => format!("+55 {}-{}", &d[..5], &d[5..]),
        8 => format!("+55 {}-{}", &d[..4], &d[4..]),
        _ => digits,
    }
}

/// Positive rate among the highest-probability `fraction` of `scored`
/// (probability, label) pairs. `None` when that slice is empty.
pub fn top_fraction_rate(scored: &[(f64, u8)], fraction: f64) -> Option<f64> {
    let count = (scored.len() as f64 * fraction).floor() as usize;
    if count == 0 {
        return None;
    }

    let mut sorted = scored.to_vec();
    sorted.sort_by(|a, b| b.0.total_cmp(&a.0));
    let positives: u64 = sorted.iter().take(count).map(|&(_, label)| u64::from(label)).sum();
    Some(positives as f64 / count as f64)
}

/// Classification metrics for labelled predictions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Area under the ROC curve; `None` when only one class is present
    pub auc: Option<f64>,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Score (probability, label) pairs. A probability at or above `threshold`
/// counts as a positive prediction; ratios with a zero denominator are 0.
/// `None` for an empty slice.
pub fn evaluate(scored: &[(f64, u8)], threshold: f64) -> Option<Evaluation> {
    if scored.is_empty() {
        return None;
    }

    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for &(probability, label) in scored {
        match (probability >= threshold, label > 0) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, false) => tn += 1,
            (false, true) => fn_ += 1,
        }
    }

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Some(Evaluation {
        auc: roc_auc(scored),
        accuracy: ratio(tp + tn, scored.len()),
        precision,
        recall,
        f1,
    })
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Rank-sum AUC with tied probabilities sharing their average rank
fn roc_auc(scored: &[(f64, u8)]) -> Option<f64> {
    let positives = scored.iter().filter(|&&(_, label)| label > 0).count();
    let negatives = scored.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scored.len()).collect();
    order.sort_by(|&a, &b| scored[a].0.total_cmp(&scored[b].0));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scored[order[end]].0 == scored[order[start]].0 {
            end += 1;
        }
        // Ranks start..end (0-based) share the 1-based mean rank
        let mean_rank = (start + end + 1) as f64 / 2.0;
        let tied_positives = order[start..end]
            .iter()
            .filter(|&&i| scored[i].1 > 0)
            .count();
        positive_rank_sum += mean_rank * tied_positives as f64;
        start = end;
    }

    let p = positives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

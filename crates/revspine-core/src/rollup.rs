//! Account rollups: segment -> subscription -> account aggregation

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::identity::{IdentityLink, MatchType};
use crate::models::SegmentStatus;
use crate::reconcile::SegmentVariance;
use crate::utils::round2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineageStatus {
    Complete,
    Incomplete,
    Unknown,
}

impl LineageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "Complete",
            Self::Incomplete => "Incomplete",
            Self::Unknown => "Unknown",
        }
    }
}

/// Per-account reconciliation ledger line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub rsx_id: String,
    pub account_id: String,
    pub account_name: String,
    pub customer_id: Option<String>,
    pub match_type: MatchType,
    pub confidence: f64,
    pub subscriptions: usize,
    pub periods: usize,
    pub expected_total: f64,
    pub invoiced_total: f64,
    pub credit_notes_total: f64,
    pub collected_total: f64,
    pub total_variance: f64,
    pub primary_variance_type: SegmentStatus,
    pub lineage_status: LineageStatus,
    pub currency: String,
}

/// Pick the account's primary variance type: the non-CLEAN status carrying
/// the largest absolute aggregate variance, ties broken by status priority.
fn primary_variance(by_status: &BTreeMap<SegmentStatus, f64>) -> SegmentStatus {
    let mut best: Option<(SegmentStatus, f64)> = None;
    for (&status, &sum) in by_status {
        if status == SegmentStatus::Clean {
            continue;
        }
        let abs = sum.abs();
        best = match best {
            None => Some((status, abs)),
            Some((bs, babs)) => {
                if abs > babs + 0.005
                    || ((abs - babs).abs() <= 0.005 && status.priority() > bs.priority())
                {
                    Some((status, abs))
                } else {
                    Some((bs, babs))
                }
            }
        };
    }
    best.map(|(s, _)| s).unwrap_or(SegmentStatus::Clean)
}

/// Aggregate segment variances up to one ledger line per spine entry,
/// sorted by descending absolute total variance.
pub fn summarize_accounts(
    spine: &[IdentityLink],
    variances: &[SegmentVariance],
    currency: &str,
) -> Vec<AccountSummary> {
    let mut by_rsx: BTreeMap<&str, Vec<&SegmentVariance>> = BTreeMap::new();
    for v in variances {
        by_rsx.entry(v.rsx_id.as_str()).or_default().push(v);
    }

    let mut summaries: Vec<AccountSummary> = spine
        .iter()
        .map(|link| {
            let segs = by_rsx.get(link.rsx_id.as_str()).cloned().unwrap_or_default();

            let mut expected_total = 0.0;
            let mut invoiced_total = 0.0;
            let mut credit_notes_total = 0.0;
            let mut collected_total = 0.0;
            let mut total_variance = 0.0;
            let mut by_status: BTreeMap<SegmentStatus, f64> = BTreeMap::new();
            let mut periods: BTreeSet<&str> = BTreeSet::new();
            let mut subs: BTreeSet<&str> = BTreeSet::new();
            let mut incomplete = false;

            for v in &segs {
                expected_total = round2(expected_total + v.expected);
                invoiced_total = round2(invoiced_total + v.invoiced);
                credit_notes_total = round2(credit_notes_total + v.credit_notes);
                collected_total = round2(collected_total + v.collected);
                total_variance = round2(total_variance + v.variance);
                *by_status.entry(v.status).or_default() += v.variance;
                periods.insert(v.period.as_str());
                subs.insert(v.subscription_id.as_str());
                if v.status == SegmentStatus::MissingInvoice {
                    incomplete = true;
                }
            }

            let unmatched = link.match_type == MatchType::Unmatched;
            let primary_variance_type = if unmatched {
                SegmentStatus::Unknown
            } else {
                primary_variance(&by_status)
            };
            let lineage_status = if unmatched {
                LineageStatus::Unknown
            } else if incomplete {
                LineageStatus::Incomplete
            } else {
                LineageStatus::Complete
            };

            AccountSummary {
                rsx_id: link.rsx_id.clone(),
                account_id: link.account_id.clone(),
                account_name: link.account_name.clone(),
                customer_id: link.customer_id.clone(),
                match_type: link.match_type,
                confidence: link.confidence,
                subscriptions: subs.len(),
                periods: periods.len(),
                expected_total,
                invoiced_total,
                credit_notes_total,
                collected_total,
                total_variance,
                primary_variance_type,
                lineage_status,
                currency: currency.to_string(),
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.total_variance
            .abs()
            .partial_cmp(&a.total_variance.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.rsx_id.cmp(&b.rsx_id))
    });
    summaries
}

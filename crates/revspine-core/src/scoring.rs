//! Structural integrity scoring
//!
//! Four weighted components summarize how trustworthy the reconciled
//! revenue picture is, with a coverage panel, revenue-at-risk totals and
//! the top findings for the dashboard.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::identity::IdentityLink;
use crate::models::SegmentStatus;
use crate::reconcile::SegmentVariance;
use crate::rollup::AccountSummary;
use crate::utils::round2;

const WEIGHT_ENTITY_MATCH: f64 = 0.25;
const WEIGHT_BILLING_COVERAGE: f64 = 0.35;
const WEIGHT_VARIANCE: f64 = 0.25;
const WEIGHT_LINEAGE: f64 = 0.15;

/// Default number of quick findings on the dashboard
pub const DEFAULT_FINDINGS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub value: f64,
    /// Weight as a percentage of the composite
    pub weight: u32,
    pub label: String,
}

impl ScoreComponent {
    fn new(value: f64, weight: u32, label: &str) -> Self {
        Self {
            value: round2(value),
            weight,
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub entity_match_rate: ScoreComponent,
    pub billing_coverage_rate: ScoreComponent,
    pub variance_cleanliness: ScoreComponent,
    pub lineage_completeness: ScoreComponent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coverage {
    pub subscription_count: usize,
    pub total_subscriptions: usize,
    pub subscription_pct: f64,
    pub arr_covered: f64,
    pub total_arr: f64,
    pub arr_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskBucket {
    pub amount: f64,
    pub accounts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueAtRisk {
    pub total: f64,
    pub missing_invoice: RiskBucket,
    pub under_billed: RiskBucket,
    pub over_billed: RiskBucket,
    pub unpaid_ar: RiskBucket,
    pub unknown: RiskBucket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreReport {
    pub score: i64,
    pub band: String,
    pub color: String,
    pub interpretation: String,
    pub components: ScoreComponents,
    pub coverage: Coverage,
    pub revenue_at_risk: RevenueAtRisk,
}

fn band(score: i64) -> (&'static str, &'static str, &'static str) {
    if score >= 90 {
        (
            "Coherent",
            "green",
            "Structure is coherent. Spot-check recommended.",
        )
    } else if score >= 75 {
        (
            "Drifting",
            "amber",
            "Moderate drift detected. Review flagged accounts.",
        )
    } else if score >= 60 {
        (
            "At Risk",
            "orange",
            "Significant gaps. Investigate before month-end close.",
        )
    } else {
        (
            "Breakdown",
            "red",
            "Structural breakdown. Do not rely on current revenue reporting.",
        )
    }
}

fn risk_bucket(summaries: &[AccountSummary], status: SegmentStatus) -> RiskBucket {
    let matching: Vec<&AccountSummary> = summaries
        .iter()
        .filter(|s| s.primary_variance_type == status)
        .collect();
    RiskBucket {
        amount: round2(matching.iter().map(|s| s.total_variance.abs()).sum()),
        accounts: matching.len(),
    }
}

/// Compute the full score report.
///
/// `total_subscriptions` is the input table count, including subscriptions
/// that were excluded or produced no segments in the period.
pub fn calculate_score(
    spine: &[IdentityLink],
    variances: &[SegmentVariance],
    summaries: &[AccountSummary],
    total_subscriptions: usize,
) -> ScoreReport {
    let total_accounts = spine.len().max(1);
    let linked_rsx: BTreeSet<&str> = spine
        .iter()
        .filter(|l| l.match_type.is_linked())
        .map(|l| l.rsx_id.as_str())
        .collect();

    let emr = linked_rsx.len() as f64 / total_accounts as f64 * 100.0;

    let total_segments = variances.len().max(1);
    let expected_all: f64 = variances.iter().map(|v| v.expected).sum();
    let invoiced_matched: f64 = variances
        .iter()
        .filter(|v| linked_rsx.contains(v.rsx_id.as_str()))
        .map(|v| v.invoiced)
        .sum();
    let bcr = if expected_all > 0.0 {
        (invoiced_matched / expected_all * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let clean = variances
        .iter()
        .filter(|v| v.status == SegmentStatus::Clean)
        .count();
    let cleanliness = clean as f64 / total_segments as f64 * 100.0;

    let with_lineage = variances.iter().filter(|v| !v.invoices.is_empty()).count();
    let lineage = with_lineage as f64 / total_segments as f64 * 100.0;

    let score = (WEIGHT_ENTITY_MATCH * emr
        + WEIGHT_BILLING_COVERAGE * bcr
        + WEIGHT_VARIANCE * cleanliness
        + WEIGHT_LINEAGE * lineage)
        .round() as i64;
    let (band, color, interpretation) = band(score);

    // Coverage: subscriptions that produced linked segments in the period
    let matched_subs: BTreeSet<&str> = variances
        .iter()
        .filter(|v| linked_rsx.contains(v.rsx_id.as_str()))
        .map(|v| v.subscription_id.as_str())
        .collect();
    let expected_matched: f64 = variances
        .iter()
        .filter(|v| linked_rsx.contains(v.rsx_id.as_str()))
        .map(|v| v.expected)
        .sum();
    let coverage = Coverage {
        subscription_count: matched_subs.len(),
        total_subscriptions,
        subscription_pct: round2(
            matched_subs.len() as f64 / total_subscriptions.max(1) as f64 * 100.0,
        ),
        arr_covered: round2(expected_matched),
        total_arr: round2(expected_all),
        arr_pct: if expected_all > 0.0 {
            round2(expected_matched / expected_all * 100.0)
        } else {
            0.0
        },
    };

    let missing_invoice = risk_bucket(summaries, SegmentStatus::MissingInvoice);
    let under_billed = risk_bucket(summaries, SegmentStatus::UnderBilled);
    let over_billed = risk_bucket(summaries, SegmentStatus::OverBilled);
    let unpaid_ar = risk_bucket(summaries, SegmentStatus::UnpaidAr);
    let unknown = risk_bucket(summaries, SegmentStatus::Unknown);
    let revenue_at_risk = RevenueAtRisk {
        total: round2(
            missing_invoice.amount
                + under_billed.amount
                + over_billed.amount
                + unpaid_ar.amount
                + unknown.amount,
        ),
        missing_invoice,
        under_billed,
        over_billed,
        unpaid_ar,
        unknown,
    };

    ScoreReport {
        score,
        band: band.to_string(),
        color: color.to_string(),
        interpretation: interpretation.to_string(),
        components: ScoreComponents {
            entity_match_rate: ScoreComponent::new(emr, 25, "Entity Match Rate"),
            billing_coverage_rate: ScoreComponent::new(bcr, 35, "Billing Coverage Rate"),
            variance_cleanliness: ScoreComponent::new(cleanliness, 25, "Variance Cleanliness"),
            lineage_completeness: ScoreComponent::new(lineage, 15, "Lineage Completeness"),
        },
        coverage,
        revenue_at_risk,
    }
}

/// Top accounts by absolute variance among those with a non-CLEAN verdict.
/// `summaries` is already sorted by descending |total_variance|.
pub fn quick_findings(summaries: &[AccountSummary], n: usize) -> Vec<AccountSummary> {
    summaries
        .iter()
        .filter(|s| s.primary_variance_type != SegmentStatus::Clean)
        .take(n)
        .cloned()
        .collect()
}

//! Lifecycle builder: subscriptions -> calendar-aligned revenue segments
//!
//! Every subscription whose interval intersects the reporting period is
//! sliced into one segment per calendar month, day-count prorated. Ramp
//! schedules change the effective MRR at their step dates; a step landing
//! inside a month splits that month's segment into sub-segments sharing
//! the month label.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityLink;
use crate::models::{Exclusion, RampStep, ReasonCode, SubscriptionRow};
use crate::utils::{
    days_in_month, inclusive_days, last_day_of_month, month_span, period_label, round2,
};

/// One month-sliced revenue interval of a single subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueSegment {
    pub segment_id: String,
    pub rsx_id: String,
    pub subscription_id: String,
    /// Month label, `YYYY-MM`. Sub-segments of a ramp split share it.
    pub period: String,
    pub segment_start: NaiveDate,
    pub segment_end: NaiveDate,
    pub days_active: u32,
    pub total_days: u32,
    pub mrr_effective: f64,
    pub expected_amount: f64,
    pub is_prorated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleOutput {
    pub segments: Vec<RevenueSegment>,
    pub exclusions: Vec<Exclusion>,
}

/// Effective MRR on `date`: the latest ramp step at or before it, falling
/// back to the subscription's base MRR.
fn mrr_at(sub: &SubscriptionRow, steps: &[&RampStep], date: NaiveDate) -> f64 {
    steps
        .iter()
        .filter(|s| s.effective_date <= date)
        .last()
        .map(|s| s.mrr)
        .unwrap_or(sub.mrr)
}

/// Expand subscriptions into revenue segments over the reporting period.
///
/// Segments tile the intersection of each subscription's interval with
/// `[period_start, period_end]` exactly: no gaps, no overlaps. Subscriptions
/// the engine cannot expand are excluded with `UNSUPPORTED_STRUCTURE` and
/// never silently dropped.
pub fn build_segments(
    subscriptions: &[SubscriptionRow],
    spine: &[IdentityLink],
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> LifecycleOutput {
    let rsx_by_account: std::collections::BTreeMap<&str, &str> = spine
        .iter()
        .map(|l| (l.account_id.as_str(), l.rsx_id.as_str()))
        .collect();

    let mut subs: Vec<&SubscriptionRow> = subscriptions.iter().collect();
    subs.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));

    let mut out = LifecycleOutput::default();
    let mut next_id = 0usize;

    for sub in subs {
        if sub.mrr < 0.0 {
            out.exclusions.push(Exclusion::new(
                "subscription",
                &sub.subscription_id,
                ReasonCode::UnsupportedStructure,
                format!("Negative MRR ({:.2})", sub.mrr),
            ));
            continue;
        }
        if let Some(end) = sub.end_date {
            if sub.start_date > end {
                out.exclusions.push(Exclusion::new(
                    "subscription",
                    &sub.subscription_id,
                    ReasonCode::UnsupportedStructure,
                    "start_date after end_date".to_string(),
                ));
                continue;
            }
        }
        let Some(rsx_id) = rsx_by_account.get(sub.account_id.as_str()) else {
            out.exclusions.push(Exclusion::new(
                "subscription",
                &sub.subscription_id,
                ReasonCode::UnsupportedStructure,
                format!("Unknown account {}", sub.account_id),
            ));
            continue;
        };

        // Clamp to the reporting period; an empty intersection is not an
        // error, the subscription simply has no revenue in this period.
        let clamp_start = sub.start_date.max(period_start);
        let clamp_end = sub.end_date.unwrap_or(period_end).min(period_end);
        if clamp_start > clamp_end {
            continue;
        }

        let mut steps: Vec<&RampStep> = sub.ramp_schedule.iter().collect();
        steps.sort_by_key(|s| s.effective_date);

        let months = month_span(
            (clamp_start.year(), clamp_start.month()),
            (clamp_end.year(), clamp_end.month()),
        );

        for (year, month) in months {
            let month_first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
            let month_last = last_day_of_month(year, month);
            let slice_start = clamp_start.max(month_first);
            let slice_end = clamp_end.min(month_last);
            if slice_start > slice_end {
                continue;
            }

            // Ramp steps strictly inside the slice split it into
            // sub-segments with disjoint day ranges.
            let mut boundaries = vec![slice_start];
            for step in &steps {
                if step.effective_date > slice_start && step.effective_date <= slice_end {
                    boundaries.push(step.effective_date);
                }
            }

            let total_days = days_in_month(year, month);
            for (i, &sub_start) in boundaries.iter().enumerate() {
                let sub_end = boundaries
                    .get(i + 1)
                    .map(|next| next.pred_opt().unwrap())
                    .unwrap_or(slice_end);
                let days_active = inclusive_days(sub_start, sub_end);
                let mrr_effective = mrr_at(sub, &steps, sub_start);
                let expected_amount = round2(mrr_effective * days_active as f64 / total_days as f64);

                next_id += 1;
                out.segments.push(RevenueSegment {
                    segment_id: format!("SEG-{:04}", next_id),
                    rsx_id: rsx_id.to_string(),
                    subscription_id: sub.subscription_id.clone(),
                    period: period_label(year, month),
                    segment_start: sub_start,
                    segment_end: sub_end,
                    days_active,
                    total_days,
                    mrr_effective,
                    expected_amount,
                    is_prorated: days_active < total_days,
                });
            }
        }
    }

    out
}

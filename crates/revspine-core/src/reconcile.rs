//! Reconciliation: allocate billing documents onto segments and classify
//! the per-segment variance
//!
//! Three phases per account:
//! - A: invoices land on segments by billing-period overlap, proportionally
//!   when they span several segments (the last leg absorbs the rounding
//!   residue so every allocation conserves the invoice amount)
//! - B: credit notes mirror their linked invoice's split, or stand alone on
//!   the unique segment of their issue month
//! - C: per-segment variance = effective invoiced - expected, classified
//!   against the tolerance τ
//!
//! Anything that cannot be allocated is written to the exclusion log with a
//! reason code. The engine never drops a record silently.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::identity::IdentityLink;
use crate::lifecycle::RevenueSegment;
use crate::models::{
    AllocationMethod, CreditNoteRow, Exclusion, InvoiceRow, InvoiceStatus, PaymentRow, ReasonCode,
    SegmentStatus,
};
use crate::utils::{inclusive_days, month_end, month_start, round2};

/// An invoice leg landed on a segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentInvoiceDetail {
    pub invoice_id: String,
    pub allocated_amount: f64,
    pub invoice_amount: f64,
    pub invoice_date: NaiveDate,
    pub invoice_status: InvoiceStatus,
    pub overlap_days: u32,
    pub method: AllocationMethod,
}

/// A credit-note leg landed on a segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentCreditDetail {
    pub credit_note_id: String,
    pub amount: f64,
    pub reason: String,
    pub credit_date: NaiveDate,
    pub linked_invoice: Option<String>,
    pub method: AllocationMethod,
}

/// Reconciled state of one revenue segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentVariance {
    pub segment_id: String,
    pub rsx_id: String,
    pub subscription_id: String,
    pub period: String,
    pub expected: f64,
    pub invoiced: f64,
    pub credit_notes: f64,
    pub effective_invoiced: f64,
    pub collected: f64,
    pub variance: f64,
    pub status: SegmentStatus,
    pub is_prorated: bool,
    pub invoices: Vec<SegmentInvoiceDetail>,
    pub credits: Vec<SegmentCreditDetail>,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutput {
    pub variances: Vec<SegmentVariance>,
    pub exclusions: Vec<Exclusion>,
}

/// The classification decision table, evaluated top to bottom.
fn classify(
    has_customer: bool,
    expected: f64,
    effective_invoiced: f64,
    variance: f64,
    collected: f64,
    tolerance: f64,
) -> SegmentStatus {
    if !has_customer {
        SegmentStatus::Unknown
    } else if effective_invoiced.abs() < 0.005 && expected > tolerance {
        SegmentStatus::MissingInvoice
    } else if variance.abs() <= tolerance {
        if collected >= effective_invoiced - tolerance {
            SegmentStatus::Clean
        } else {
            SegmentStatus::UnpaidAr
        }
    } else if variance < -tolerance {
        SegmentStatus::UnderBilled
    } else {
        SegmentStatus::OverBilled
    }
}

/// Segments whose day range overlaps the invoice's billing period, with
/// the inclusive overlap day count.
fn overlapping<'s>(
    segs: &[&'s RevenueSegment],
    inv: &InvoiceRow,
) -> Vec<(&'s RevenueSegment, u32)> {
    segs.iter()
        .filter_map(|seg| {
            let start = seg.segment_start.max(inv.period_start);
            let end = seg.segment_end.min(inv.period_end);
            let days = inclusive_days(start, end);
            (days > 0).then_some((*seg, days))
        })
        .collect()
}

/// Split `amount` across `weights` proportionally, rounding each leg to
/// cents; the final leg absorbs the residue so the legs sum to `amount`
/// exactly.
fn split_proportionally(amount: f64, weights: &[u32]) -> Vec<f64> {
    let total: u32 = weights.iter().sum();
    let mut legs = Vec::with_capacity(weights.len());
    let mut allocated = 0.0;
    for (i, w) in weights.iter().enumerate() {
        let leg = if i + 1 == weights.len() {
            round2(amount - allocated)
        } else {
            round2(amount * *w as f64 / total as f64)
        };
        allocated = round2(allocated + leg);
        legs.push(leg);
    }
    legs
}

pub fn reconcile(
    segments: &[RevenueSegment],
    invoices: &[InvoiceRow],
    payments: &[PaymentRow],
    credit_notes: &[CreditNoteRow],
    spine: &[IdentityLink],
    tolerance: f64,
) -> ReconcileOutput {
    let mut out = ReconcileOutput::default();

    let rsx_by_customer: BTreeMap<&str, &str> = spine
        .iter()
        .filter_map(|l| l.customer_id.as_deref().map(|c| (c, l.rsx_id.as_str())))
        .collect();
    let linked_rsx: BTreeSet<&str> = spine
        .iter()
        .filter(|l| l.customer_id.is_some())
        .map(|l| l.rsx_id.as_str())
        .collect();

    let mut segments_by_rsx: BTreeMap<&str, Vec<&RevenueSegment>> = BTreeMap::new();
    for seg in segments {
        segments_by_rsx.entry(seg.rsx_id.as_str()).or_default().push(seg);
    }
    for segs in segments_by_rsx.values_mut() {
        segs.sort_by(|a, b| {
            a.period
                .cmp(&b.period)
                .then_with(|| a.segment_start.cmp(&b.segment_start))
                .then_with(|| a.segment_id.cmp(&b.segment_id))
        });
    }

    // Phase A: invoice allocation
    let mut invoice_rows: Vec<&InvoiceRow> = invoices.iter().collect();
    invoice_rows.sort_by(|a, b| a.invoice_id.cmp(&b.invoice_id));

    let mut details_by_segment: BTreeMap<&str, Vec<SegmentInvoiceDetail>> = BTreeMap::new();
    // invoice_id -> (row, legs as (segment_id, allocated, overlap_days, method))
    let mut allocated_invoices: BTreeMap<&str, (&InvoiceRow, Vec<(&str, f64)>)> = BTreeMap::new();
    let mut void_invoices: BTreeSet<&str> = BTreeSet::new();
    let mut known_invoices: BTreeSet<&str> = BTreeSet::new();

    for inv in invoice_rows.iter().copied() {
        known_invoices.insert(inv.invoice_id.as_str());

        if inv.status == InvoiceStatus::Void {
            void_invoices.insert(inv.invoice_id.as_str());
            out.exclusions.push(Exclusion::new(
                "invoice",
                &inv.invoice_id,
                ReasonCode::UnsupportedStructure,
                "Void invoice excluded from allocation".to_string(),
            ));
            continue;
        }

        let Some(rsx_id) = rsx_by_customer.get(inv.customer_id.as_str()) else {
            out.exclusions.push(Exclusion::new(
                "invoice",
                &inv.invoice_id,
                ReasonCode::AllocationAmbiguous,
                format!("No identity link for customer {}", inv.customer_id),
            ));
            continue;
        };

        let all_segs: &[&RevenueSegment] = segments_by_rsx
            .get(rsx_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);

        // A subscription hint narrows the candidates, but a stale hint
        // with no overlap falls back to the whole account.
        let mut overlaps = match &inv.subscription_id {
            Some(hint) => {
                let hinted: Vec<&RevenueSegment> = all_segs
                    .iter()
                    .copied()
                    .filter(|s| &s.subscription_id == hint)
                    .collect();
                let hinted_overlaps = overlapping(&hinted, inv);
                if hinted_overlaps.is_empty() {
                    overlapping(all_segs, inv)
                } else {
                    hinted_overlaps
                }
            }
            None => overlapping(all_segs, inv),
        };

        if overlaps.is_empty() {
            out.exclusions.push(Exclusion::new(
                "invoice",
                &inv.invoice_id,
                ReasonCode::AllocationAmbiguous,
                "no matching segment".to_string(),
            ));
            continue;
        }

        let method = if overlaps.len() == 1 {
            AllocationMethod::Exact
        } else {
            AllocationMethod::Proportional
        };
        let weights: Vec<u32> = overlaps.iter().map(|(_, d)| *d).collect();
        let legs = if overlaps.len() == 1 {
            vec![inv.amount]
        } else {
            split_proportionally(inv.amount, &weights)
        };

        let mut invoice_legs = Vec::with_capacity(overlaps.len());
        for ((seg, days), leg) in overlaps.drain(..).zip(legs) {
            details_by_segment
                .entry(seg.segment_id.as_str())
                .or_default()
                .push(SegmentInvoiceDetail {
                    invoice_id: inv.invoice_id.clone(),
                    allocated_amount: leg,
                    invoice_amount: inv.amount,
                    invoice_date: inv.invoice_date,
                    invoice_status: inv.status,
                    overlap_days: days,
                    method,
                });
            invoice_legs.push((seg.segment_id.as_str(), leg));
        }
        allocated_invoices.insert(inv.invoice_id.as_str(), (inv, invoice_legs));
    }

    // Phase B: credit-note allocation
    let mut credit_rows: Vec<&CreditNoteRow> = credit_notes.iter().collect();
    credit_rows.sort_by(|a, b| a.credit_note_id.cmp(&b.credit_note_id));

    let mut credits_by_segment: BTreeMap<&str, Vec<SegmentCreditDetail>> = BTreeMap::new();

    for cn in credit_rows.iter().copied() {
        let linked = cn
            .invoice_id
            .as_deref()
            .and_then(|id| allocated_invoices.get(id));

        if let Some((inv, legs)) = linked {
            // Mirror the invoice's split; last leg absorbs the residue.
            let mut distributed = 0.0;
            for (i, (segment_id, alloc)) in legs.iter().enumerate() {
                let share = if i + 1 == legs.len() {
                    round2(cn.amount - distributed)
                } else {
                    round2(cn.amount * alloc / inv.amount)
                };
                distributed = round2(distributed + share);
                credits_by_segment
                    .entry(*segment_id)
                    .or_default()
                    .push(SegmentCreditDetail {
                        credit_note_id: cn.credit_note_id.clone(),
                        amount: share,
                        reason: cn.reason.clone(),
                        credit_date: cn.credit_date,
                        linked_invoice: Some(inv.invoice_id.clone()),
                        method: if legs.len() == 1 {
                            AllocationMethod::Exact
                        } else {
                            AllocationMethod::Proportional
                        },
                    });
            }
            continue;
        }

        // Standalone (no linkage, or the linked invoice was excluded):
        // place by the month containing the credit date.
        let Some(rsx_id) = rsx_by_customer.get(cn.customer_id.as_str()) else {
            out.exclusions.push(Exclusion::new(
                "credit_note",
                &cn.credit_note_id,
                ReasonCode::CreditNoteUnallocated,
                format!("No identity link for customer {}", cn.customer_id),
            ));
            continue;
        };

        let m_start = month_start(cn.credit_date);
        let m_end = month_end(cn.credit_date);
        let candidates: Vec<&RevenueSegment> = segments_by_rsx
            .get(rsx_id)
            .map(|segs| {
                segs.iter()
                    .copied()
                    .filter(|s| s.segment_start <= m_end && s.segment_end >= m_start)
                    .collect()
            })
            .unwrap_or_default();

        match candidates.as_slice() {
            [seg] => {
                credits_by_segment
                    .entry(seg.segment_id.as_str())
                    .or_default()
                    .push(SegmentCreditDetail {
                        credit_note_id: cn.credit_note_id.clone(),
                        amount: cn.amount,
                        reason: cn.reason.clone(),
                        credit_date: cn.credit_date,
                        linked_invoice: None,
                        method: AllocationMethod::Standalone,
                    });
            }
            [] => out.exclusions.push(Exclusion::new(
                "credit_note",
                &cn.credit_note_id,
                ReasonCode::CreditNoteUnallocated,
                format!("No segment covers {}", cn.credit_date.format("%Y-%m")),
            )),
            _ => out.exclusions.push(Exclusion::new(
                "credit_note",
                &cn.credit_note_id,
                ReasonCode::CreditNoteUnallocated,
                format!(
                    "Multiple segments cover {}",
                    cn.credit_date.format("%Y-%m")
                ),
            )),
        }
    }

    // Phase C: payments, variance, classification
    let mut payment_rows: Vec<&PaymentRow> = payments.iter().collect();
    payment_rows.sort_by(|a, b| a.payment_id.cmp(&b.payment_id));

    let mut paid_by_invoice: BTreeMap<&str, f64> = BTreeMap::new();
    for p in payment_rows.iter().copied() {
        if !known_invoices.contains(p.invoice_id.as_str()) {
            out.exclusions.push(Exclusion::new(
                "payment",
                &p.payment_id,
                ReasonCode::UnsupportedStructure,
                format!("References unknown invoice {}", p.invoice_id),
            ));
        } else if void_invoices.contains(p.invoice_id.as_str()) {
            out.exclusions.push(Exclusion::new(
                "payment",
                &p.payment_id,
                ReasonCode::UnsupportedStructure,
                format!("Attached to void invoice {}", p.invoice_id),
            ));
        } else if !allocated_invoices.contains_key(p.invoice_id.as_str()) {
            out.exclusions.push(Exclusion::new(
                "payment",
                &p.payment_id,
                ReasonCode::UnsupportedStructure,
                format!("Attached to unallocated invoice {}", p.invoice_id),
            ));
        } else {
            *paid_by_invoice.entry(p.invoice_id.as_str()).or_default() += p.amount;
        }
    }

    for seg in segments {
        let invoice_details = details_by_segment
            .remove(seg.segment_id.as_str())
            .unwrap_or_default();
        let credit_details = credits_by_segment
            .remove(seg.segment_id.as_str())
            .unwrap_or_default();

        let invoiced = round2(invoice_details.iter().map(|d| d.allocated_amount).sum());
        let credit_total = round2(credit_details.iter().map(|d| d.amount).sum());
        let effective_invoiced = round2(invoiced - credit_total);

        // Payments follow the invoice's allocation fractions, so a
        // partially-allocated invoice contributes a partial payment here.
        let collected = round2(
            invoice_details
                .iter()
                .map(|d| {
                    let paid = paid_by_invoice
                        .get(d.invoice_id.as_str())
                        .copied()
                        .unwrap_or(0.0);
                    paid * d.allocated_amount / d.invoice_amount
                })
                .sum(),
        );

        let variance = round2(effective_invoiced - seg.expected_amount);
        let has_customer = linked_rsx.contains(seg.rsx_id.as_str());
        let status = classify(
            has_customer,
            seg.expected_amount,
            effective_invoiced,
            variance,
            collected,
            tolerance,
        );

        out.variances.push(SegmentVariance {
            segment_id: seg.segment_id.clone(),
            rsx_id: seg.rsx_id.clone(),
            subscription_id: seg.subscription_id.clone(),
            period: seg.period.clone(),
            expected: seg.expected_amount,
            invoiced,
            credit_notes: credit_total,
            effective_invoiced,
            collected,
            variance,
            status,
            is_prorated: seg.is_prorated,
            invoices: invoice_details,
            credits: credit_details,
        });
    }

    out
}

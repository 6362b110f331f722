//! CSV export of reconciliation artifacts
//!
//! Three exports back the audit trail: the account ledger, a per-account
//! lineage drill-down, and the exclusion log.

use std::io::Write;

use csv::Writer;

use crate::error::Result;
use crate::models::Exclusion;
use crate::rollup::AccountSummary;
use crate::session::Lineage;

fn money(v: f64) -> String {
    format!("{:.2}", v)
}

/// Write the account ledger
pub fn export_accounts<W: Write>(summaries: &[AccountSummary], writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record([
        "rsx_id",
        "account_id",
        "account_name",
        "customer_id",
        "match_type",
        "confidence",
        "subscriptions",
        "periods",
        "expected_total",
        "invoiced_total",
        "credit_notes_total",
        "collected_total",
        "total_variance",
        "primary_variance_type",
        "lineage_status",
        "currency",
    ])?;

    for s in summaries {
        let record = vec![
            s.rsx_id.clone(),
            s.account_id.clone(),
            s.account_name.clone(),
            s.customer_id.clone().unwrap_or_default(),
            s.match_type.as_str().to_string(),
            format!("{:.2}", s.confidence),
            s.subscriptions.to_string(),
            s.periods.to_string(),
            money(s.expected_total),
            money(s.invoiced_total),
            money(s.credit_notes_total),
            money(s.collected_total),
            money(s.total_variance),
            s.primary_variance_type.as_str().to_string(),
            s.lineage_status.as_str().to_string(),
            s.currency.clone(),
        ];
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write one account's segment-level lineage
pub fn export_lineage<W: Write>(lineage: &Lineage, writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record([
        "period",
        "subscription_id",
        "segment_id",
        "expected",
        "invoiced",
        "credit_notes",
        "collected",
        "variance",
        "status",
        "prorated",
    ])?;

    for sub in &lineage.subscriptions {
        for v in &sub.segments {
            let record = vec![
                v.period.clone(),
                v.subscription_id.clone(),
                v.segment_id.clone(),
                money(v.expected),
                money(v.invoiced),
                money(v.credit_notes),
                money(v.collected),
                money(v.variance),
                v.status.as_str().to_string(),
                if v.is_prorated { "yes" } else { "no" }.to_string(),
            ];
            wtr.write_record(&record)?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Write the exclusion log
pub fn export_exclusions<W: Write>(
    exclusions: &[Exclusion],
    session_id: &str,
    writer: W,
) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record([
        "record_type",
        "record_id",
        "reason_code",
        "description",
        "excluded_at",
        "session_id",
    ])?;

    for e in exclusions {
        let record = vec![
            e.record_type.clone(),
            e.record_id.clone(),
            e.reason_code.as_str().to_string(),
            e.description.clone(),
            e.excluded_at.to_rfc3339(),
            session_id.to_string(),
        ];
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MatchType;
    use crate::models::ReasonCode;
    use crate::rollup::LineageStatus;
    use crate::models::SegmentStatus;

    #[test]
    fn accounts_csv_has_header_and_rows() {
        let summaries = vec![AccountSummary {
            rsx_id: "RSX-0001".to_string(),
            account_id: "ACC-001".to_string(),
            account_name: "Acme Corporation".to_string(),
            customer_id: Some("CUST-001".to_string()),
            match_type: MatchType::Exact,
            confidence: 1.0,
            subscriptions: 1,
            periods: 12,
            expected_total: 12_000.0,
            invoiced_total: 12_000.0,
            credit_notes_total: 0.0,
            collected_total: 12_000.0,
            total_variance: 0.0,
            primary_variance_type: SegmentStatus::Clean,
            lineage_status: LineageStatus::Complete,
            currency: "USD".to_string(),
        }];

        let mut buf = Vec::new();
        export_accounts(&summaries, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("rsx_id,account_id"));
        let row = lines.next().unwrap();
        assert!(row.contains("RSX-0001"));
        assert!(row.contains("12000.00"));
        assert!(row.contains("CLEAN"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn exclusions_csv_round_trips_reason_codes() {
        let exclusions = vec![Exclusion::new(
            "invoice",
            "INV-001",
            ReasonCode::AllocationAmbiguous,
            "no matching segment".to_string(),
        )];

        let mut buf = Vec::new();
        export_exclusions(&exclusions, "rs-test", &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("ALLOCATION_AMBIGUOUS"));
        assert!(text.contains("no matching segment"));
        assert!(text.contains("rs-test"));
    }
}

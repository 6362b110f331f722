//! Reporting commands: status, dashboard, accounts, lineage, exclusions

use anyhow::Result;
use revspine_core::{
    AccountFilter, MatchType, ReasonCode, SegmentStatus, SessionService,
};

use super::{money, truncate};

pub fn cmd_status(svc: &SessionService, session_id: &str) -> Result<()> {
    let status = svc.status(session_id)?;

    println!();
    println!("Session {}: {}", session_id, status.status.as_str());
    if let Some(step) = &status.processing.current_step {
        println!("   Current step: {}", step);
    }
    for (step, record) in &status.processing.steps {
        println!(
            "   {:<16} {:<9} {}",
            step,
            match record.status {
                revspine_core::models::StepState::Running => "running",
                revspine_core::models::StepState::Complete => "complete",
            },
            record.timestamp.format("%H:%M:%S")
        );
    }
    if let Some(error) = &status.processing.error {
        println!("   Error: {}", error);
    }
    if !status.processing.log.is_empty() {
        println!();
        println!("   Log:");
        for entry in &status.processing.log {
            println!("     [{}] {}", entry.step, entry.message);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_dashboard(svc: &SessionService, session_id: &str) -> Result<()> {
    let dashboard = svc.dashboard(session_id)?;
    let score = &dashboard.score;

    println!();
    println!(
        "Structural Integrity: {} - {} ({})",
        score.score, score.band, score.color
    );
    println!("   {}", score.interpretation);
    println!();

    println!("   Components:");
    for c in [
        &score.components.entity_match_rate,
        &score.components.billing_coverage_rate,
        &score.components.variance_cleanliness,
        &score.components.lineage_completeness,
    ] {
        println!("     {:<24} {:>7.2}%  (weight {}%)", c.label, c.value, c.weight);
    }

    let cov = &score.coverage;
    println!();
    println!(
        "   Coverage: {}/{} subscriptions ({:.1}%), {} of {} expected ({:.1}%)",
        cov.subscription_count,
        cov.total_subscriptions,
        cov.subscription_pct,
        money(cov.arr_covered),
        money(cov.total_arr),
        cov.arr_pct
    );

    let rar = &score.revenue_at_risk;
    println!();
    println!("   Revenue at risk: {}", money(rar.total));
    for (label, bucket) in [
        ("Missing invoice", &rar.missing_invoice),
        ("Under-billed", &rar.under_billed),
        ("Over-billed", &rar.over_billed),
        ("Unpaid AR", &rar.unpaid_ar),
        ("Unknown exposure", &rar.unknown),
    ] {
        if bucket.accounts > 0 {
            println!(
                "     {:<18} {:>14}  ({} account{})",
                label,
                money(bucket.amount),
                bucket.accounts,
                if bucket.accounts == 1 { "" } else { "s" }
            );
        }
    }

    if !dashboard.top_findings.is_empty() {
        println!();
        println!("   Top findings:");
        for f in &dashboard.top_findings {
            println!(
                "     {}  {:<28} {:>14}  {}",
                f.rsx_id,
                truncate(&f.account_name, 28),
                money(f.total_variance),
                f.primary_variance_type
            );
        }
    }

    println!();
    println!(
        "   Exclusions: {} ({} ambiguous allocations)",
        dashboard.total_exclusions, dashboard.ambiguous_allocations
    );
    println!();
    Ok(())
}

pub fn cmd_accounts(
    svc: &SessionService,
    session_id: &str,
    variance_type: Option<&str>,
    match_type: Option<&str>,
    search: Option<&str>,
) -> Result<()> {
    let mut filter = AccountFilter {
        search: search.map(|s| s.to_string()),
        ..AccountFilter::default()
    };
    if let Some(kinds) = variance_type {
        for kind in kinds.split(',') {
            let status: SegmentStatus = kind
                .trim()
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            filter.variance_types.push(status);
        }
    }
    if let Some(kind) = match_type {
        let parsed: MatchType = kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        filter.match_type = Some(parsed);
    }

    let accounts = svc.accounts(session_id, &filter)?;
    if accounts.is_empty() {
        println!("No accounts match the filter.");
        return Ok(());
    }

    println!();
    println!(
        "   {:<9} {:<28} {:<16} {:>12} {:>12} {:>12}  {}",
        "rsx", "account", "match", "expected", "invoiced", "variance", "status"
    );
    println!("   {}", "-".repeat(110));
    for a in &accounts {
        println!(
            "   {:<9} {:<28} {:<16} {:>12} {:>12} {:>12}  {}",
            a.rsx_id,
            truncate(&a.account_name, 28),
            a.match_type.as_str(),
            money(a.expected_total),
            money(a.invoiced_total),
            money(a.total_variance),
            a.primary_variance_type
        );
    }
    println!();
    println!("   {} account(s)", accounts.len());
    println!();
    Ok(())
}

pub fn cmd_lineage(svc: &SessionService, session_id: &str, rsx_id: &str) -> Result<()> {
    let lineage = svc.lineage(session_id, rsx_id)?;
    let entity = &lineage.entity;

    println!();
    println!(
        "{}  {} ({}, confidence {:.2})",
        entity.rsx_id, entity.account_name, entity.match_type, entity.confidence
    );
    match &entity.customer_name {
        Some(name) => println!("   Billing side: {} ({})", name, entity.customer_id.as_deref().unwrap_or("-")),
        None => println!("   Billing side: (unmatched)"),
    }
    if !entity.evidence.is_empty() {
        println!("   Evidence: {}", entity.evidence);
    }

    for sub in &lineage.subscriptions {
        println!();
        println!(
            "   {}  expected {} / invoiced {} / variance {}",
            sub.subscription_id,
            money(sub.total_expected),
            money(sub.total_invoiced),
            money(sub.total_variance)
        );
        println!(
            "     {:<9} {:>10} {:>10} {:>9} {:>10} {:>10}  {:<16} {}",
            "period", "expected", "invoiced", "credits", "collected", "variance", "status", "prorated"
        );
        for seg in &sub.segments {
            println!(
                "     {:<9} {:>10} {:>10} {:>9} {:>10} {:>10}  {:<16} {}",
                seg.period,
                money(seg.expected),
                money(seg.invoiced),
                money(seg.credit_notes),
                money(seg.collected),
                money(seg.variance),
                seg.status.as_str(),
                if seg.is_prorated { "yes" } else { "no" }
            );
        }
    }

    println!();
    println!(
        "   Total: expected {} / invoiced {} / variance {}",
        money(lineage.total_expected),
        money(lineage.total_invoiced),
        money(lineage.total_variance)
    );
    println!();
    Ok(())
}

pub fn cmd_exclusions(
    svc: &SessionService,
    session_id: &str,
    reason: Option<&str>,
) -> Result<()> {
    let reason = match reason {
        Some(code) => Some(
            code.parse::<ReasonCode>()
                .map_err(|e: String| anyhow::anyhow!(e))?,
        ),
        None => None,
    };
    let view = svc.exclusions(session_id, reason)?;

    println!();
    if view.summary.is_empty() {
        println!("No exclusions. Every record was allocated or segmented.");
        println!();
        return Ok(());
    }

    println!("Exclusions by reason:");
    for (code, count) in &view.summary {
        println!("   {:<26} {}", code, count);
    }

    if !view.exclusions.is_empty() {
        println!();
        println!(
            "   {:<13} {:<14} {:<26} description",
            "type", "record", "reason"
        );
        println!("   {}", "-".repeat(90));
        for e in &view.exclusions {
            println!(
                "   {:<13} {:<14} {:<26} {}",
                e.record_type,
                e.record_id,
                e.reason_code.as_str(),
                e.description
            );
        }
    }
    println!();
    Ok(())
}

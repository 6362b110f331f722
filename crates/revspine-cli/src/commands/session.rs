//! Session management commands (init, new, list, show, settings)

use std::path::Path;

use anyhow::Result;
use revspine_core::{Session, SessionService, Settings};

use super::open_service;

pub fn cmd_init(db_path: &Path) -> Result<()> {
    println!("Initializing database at {}...", db_path.display());
    open_service(db_path)?;
    println!("Database ready.");
    println!();
    println!("Next steps:");
    println!("  1. Create a session:  revspine session new --period-start 2024-01 --period-end 2024-12");
    println!("  2. Load the tables:   revspine load accounts.csv customers.csv subscriptions.csv invoices.csv");
    println!("  3. Validate & review: revspine validate && revspine identity");
    println!("  4. Analyze:           revspine analyze");
    Ok(())
}

pub fn cmd_session_new(
    svc: &SessionService,
    period_start: &str,
    period_end: &str,
    currency: &str,
) -> Result<()> {
    let settings = Settings {
        currency: currency.to_string(),
        period_start: period_start.to_string(),
        period_end: period_end.to_string(),
        ..Settings::default()
    };
    let session = svc.create_session(settings)?;
    println!("Created session {}", session.id);
    println!(
        "   Reporting period: {} .. {} ({})",
        session.settings.period_start, session.settings.period_end, session.settings.currency
    );
    Ok(())
}

pub fn cmd_session_list(svc: &SessionService) -> Result<()> {
    let sessions = svc.list_sessions()?;
    if sessions.is_empty() {
        println!("No sessions. Create one with: revspine session new");
        return Ok(());
    }

    println!();
    println!(
        "   {:<22} {:<16} {:<18} uploads",
        "session", "status", "period"
    );
    println!("   {}", "-".repeat(70));
    for s in sessions {
        println!(
            "   {:<22} {:<16} {:<18} {}",
            s.id,
            s.status.as_str(),
            format!("{}..{}", s.settings.period_start, s.settings.period_end),
            s.uploads.len()
        );
    }
    println!();
    Ok(())
}

fn print_session(session: &Session) {
    println!();
    println!("Session {}", session.id);
    println!("   Status:   {}", session.status.as_str());
    println!(
        "   Period:   {} .. {}",
        session.settings.period_start, session.settings.period_end
    );
    println!("   Currency: {}", session.settings.currency);
    println!("   Tolerance: {:.2}", session.settings.tolerance);
    println!("   Created:  {}", session.created_at.format("%Y-%m-%d %H:%M"));
    if let Some(done) = session.completed_at {
        println!("   Completed: {}", done.format("%Y-%m-%d %H:%M"));
    }

    if session.uploads.is_empty() {
        println!("   Uploads:  (none)");
    } else {
        println!("   Uploads:");
        for (table, upload) in &session.uploads {
            println!(
                "     {:<14} {:>6} rows  ({})",
                table, upload.rows, upload.filename
            );
        }
    }
    if !session.decisions.is_empty() {
        println!("   Identity decisions: {}", session.decisions.len());
    }
    println!();
}

pub fn cmd_session_show(svc: &SessionService, session_id: &str) -> Result<()> {
    let session = svc.get_session(session_id)?;
    print_session(&session);
    Ok(())
}

pub fn cmd_settings(
    svc: &SessionService,
    session_id: &str,
    period_start: Option<&str>,
    period_end: Option<&str>,
    currency: Option<&str>,
    tolerance: Option<f64>,
) -> Result<()> {
    let session = svc.get_session(session_id)?;
    let mut settings = session.settings;

    if let Some(v) = period_start {
        settings.period_start = v.to_string();
    }
    if let Some(v) = period_end {
        settings.period_end = v.to_string();
    }
    if let Some(v) = currency {
        settings.currency = v.to_string();
    }
    if let Some(v) = tolerance {
        settings.tolerance = v;
    }

    svc.update_settings(session_id, settings)?;
    println!("Settings updated for session {}", session_id);
    cmd_session_show(svc, session_id)
}

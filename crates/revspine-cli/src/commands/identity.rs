//! Identity review and arbitration commands

use anyhow::Result;
use revspine_core::{ReviewDecision, SessionService};

use super::truncate;

pub fn cmd_identity_list(svc: &SessionService, session_id: &str) -> Result<()> {
    let view = svc.identity(session_id)?;

    println!();
    println!("Identity spine for session {}", session_id);
    println!("   Auto-matched: {}", view.auto_matched.len());
    for link in view.auto_matched.iter().take(10) {
        println!(
            "     {}  {:<28} = {:<28} {} ({:.2})",
            link.rsx_id,
            truncate(&link.account_name, 28),
            truncate(link.customer_name.as_deref().unwrap_or("-"), 28),
            link.match_type,
            link.confidence
        );
    }
    if view.auto_matched.len() > 10 {
        println!("     ... and {} more", view.auto_matched.len() - 10);
    }

    if view.pending_review.is_empty() {
        println!("   Review queue: empty");
    } else {
        println!("   Review queue ({} pending):", view.pending_review.len());
        for cand in &view.pending_review {
            println!(
                "     {}  {:<28} ~ {:<28} confidence {:.2}",
                cand.match_id,
                truncate(&cand.account_name, 28),
                truncate(&cand.customer_name, 28),
                cand.confidence
            );
        }
        println!();
        println!("   Decide with: revspine identity decide <match-id> confirmed|rejected");
    }

    if !view.unmatched_accounts.is_empty() {
        println!("   Unmatched accounts: {}", view.unmatched_accounts.len());
        for e in view.unmatched_accounts.iter().take(5) {
            println!("     {}  {}", e.id, truncate(&e.name, 40));
        }
    }
    if !view.unmatched_customers.is_empty() {
        println!("   Unmatched customers: {}", view.unmatched_customers.len());
        for e in view.unmatched_customers.iter().take(5) {
            println!("     {}  {}", e.id, truncate(&e.name, 40));
        }
    }
    println!();
    Ok(())
}

pub fn cmd_identity_decide(
    svc: &SessionService,
    session_id: &str,
    match_id: &str,
    decision: &str,
) -> Result<()> {
    let decision: ReviewDecision = decision.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    svc.decide(session_id, match_id, decision)?;

    let remaining = svc.identity(session_id)?.pending_review.len();
    println!("Recorded {} for {}", decision.as_str(), match_id);
    if remaining == 0 {
        println!("Review queue empty. Run 'revspine analyze' to reconcile.");
    } else {
        println!("{} match(es) still pending.", remaining);
    }
    Ok(())
}

pub fn cmd_identity_undo(svc: &SessionService, session_id: &str) -> Result<()> {
    match svc.undo(session_id)? {
        Some(decision) => println!(
            "Undid {} on {}",
            decision.decision.as_str(),
            decision.match_id
        ),
        None => println!("No decisions to undo."),
    }
    Ok(())
}

pub fn cmd_identity_reset(svc: &SessionService, session_id: &str) -> Result<()> {
    let cleared = svc.reset(session_id)?;
    println!("Cleared {} decision(s); review queue restored.", cleared);
    Ok(())
}

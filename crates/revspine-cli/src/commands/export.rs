//! CSV export commands

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use revspine_core::{export, AccountFilter, SessionService};

pub fn cmd_export_accounts(svc: &SessionService, session_id: &str, output: &Path) -> Result<()> {
    let summaries = svc.accounts(session_id, &AccountFilter::default())?;
    let file = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    export::export_accounts(&summaries, file)?;
    println!("Wrote {} account(s) to {}", summaries.len(), output.display());
    Ok(())
}

pub fn cmd_export_lineage(
    svc: &SessionService,
    session_id: &str,
    rsx_id: &str,
    output: &Path,
) -> Result<()> {
    let lineage = svc.lineage(session_id, rsx_id)?;
    let file = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    export::export_lineage(&lineage, file)?;
    let segments: usize = lineage.subscriptions.iter().map(|s| s.segments.len()).sum();
    println!(
        "Wrote {} segment(s) for {} to {}",
        segments,
        rsx_id,
        output.display()
    );
    Ok(())
}

pub fn cmd_export_exclusions(svc: &SessionService, session_id: &str, output: &Path) -> Result<()> {
    let view = svc.exclusions(session_id, None)?;
    let file = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    export::export_exclusions(&view.exclusions, session_id, file)?;
    println!(
        "Wrote {} exclusion(s) to {}",
        view.exclusions.len(),
        output.display()
    );
    Ok(())
}

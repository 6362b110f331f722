//! CSV loading and validation commands

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use revspine_core::{SessionService, TableKind};

/// Infer the table kind from the file stem (e.g. `invoices.csv`,
/// `invoices_q3.csv` or `2024_invoices.csv` all load as invoices).
pub(crate) fn infer_table(path: &Path) -> Result<TableKind> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_lowercase();

    if let Ok(kind) = stem.parse::<TableKind>() {
        return Ok(kind);
    }
    for kind in TableKind::ALL {
        if stem.contains(kind.as_str()) {
            return Ok(kind);
        }
    }
    bail!(
        "Cannot infer table kind from '{}'. Name the file after its table or pass --table",
        path.display()
    )
}

pub fn cmd_load(
    svc: &SessionService,
    session_id: &str,
    files: &[std::path::PathBuf],
    table: Option<&str>,
) -> Result<()> {
    if table.is_some() && files.len() > 1 {
        bail!("--table applies to a single file");
    }

    for path in files {
        let kind = match table {
            Some(name) => name
                .parse::<TableKind>()
                .map_err(|e| anyhow::anyhow!(e))?,
            None => infer_table(path)?,
        };

        let file = File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("upload.csv");

        let rows = svc.load_table(session_id, kind, file, filename)?;
        println!("   {:<14} {:>6} rows  ({})", kind.as_str(), rows, filename);
    }

    println!();
    println!("Loaded. Run 'revspine validate' next.");
    Ok(())
}

pub fn cmd_validate(svc: &SessionService, session_id: &str) -> Result<()> {
    let output = svc.validate(session_id)?;

    if !output.report.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for w in &output.report.warnings {
            println!("   {}: {}", w.file, w.message);
        }
    }

    if !output.report.valid {
        println!();
        println!("Validation failed with {} error(s):", output.report.errors.len());
        for e in output.report.errors.iter().take(25) {
            if e.row == 0 {
                println!("   {}: {}", e.file, e.message);
            } else {
                println!("   {} row {} [{}]: {}", e.file, e.row, e.field, e.message);
            }
        }
        if output.report.errors.len() > 25 {
            println!("   ... and {} more", output.report.errors.len() - 25);
        }
        bail!("fix the input files and re-run validate");
    }

    println!();
    println!("All tables valid.");
    if let Some(summary) = output.identity_summary {
        println!();
        println!("Identity picture:");
        println!("   Auto-matched:        {}", summary.auto_matched);
        println!("   Needs review:        {}", summary.needs_review);
        println!("   Pending review:      {}", summary.pending_review);
        println!("   Unmatched accounts:  {}", summary.unmatched_accounts);
        println!("   Unmatched customers: {}", summary.unmatched_customers);
        if summary.pending_review > 0 {
            println!();
            println!("Review pending matches with 'revspine identity' before analyzing.");
        } else {
            println!();
            println!("Run 'revspine analyze' to reconcile.");
        }
    }
    Ok(())
}

//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `session` - init and session management (new, list, show, settings)
//! - `load` - CSV loading and validation
//! - `identity` - identity review and arbitration
//! - `analyze` - analysis run with progress following
//! - `report` - status, dashboard, accounts, lineage, exclusions
//! - `export` - CSV exports

pub mod analyze;
pub mod export;
pub mod identity;
pub mod load;
pub mod report;
pub mod session;

// Re-export command functions for main.rs
pub use analyze::*;
pub use export::*;
pub use identity::*;
pub use load::*;
pub use report::*;
pub use session::*;

use std::path::Path;

use anyhow::{bail, Context, Result};
use revspine_core::{Database, SessionService};

/// Open the database and wrap it in the session service
pub fn open_service(db_path: &Path) -> Result<SessionService> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let db = Database::new(path_str).context("Failed to open database")?;
    Ok(SessionService::new(db))
}

/// Resolve the session to operate on: an explicit --session id, or the
/// most recently created one.
pub fn resolve_session(svc: &SessionService, explicit: Option<&str>) -> Result<String> {
    if let Some(id) = explicit {
        return Ok(svc.get_session(id)?.id);
    }
    let sessions = svc.list_sessions()?;
    match sessions.first() {
        Some(session) => Ok(session.id.clone()),
        None => bail!("No sessions yet. Create one with: revspine session new"),
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Format a monetary amount for terminal output
pub fn money(v: f64) -> String {
    if v < 0.0 {
        format!("-${:.2}", v.abs())
    } else {
        format!("${:.2}", v)
    }
}

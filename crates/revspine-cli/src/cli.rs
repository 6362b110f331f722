//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI
//! arguments. The actual command implementations are in the `commands`
//! module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// RevSpine - reconcile CRM revenue against billing reality
#[derive(Parser)]
#[command(name = "revspine")]
#[command(about = "Deterministic revenue reconciliation engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "revspine.db", global = true)]
    pub db: PathBuf,

    /// Session id (defaults to the most recently created session)
    #[arg(short, long, global = true)]
    pub session: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Manage analysis sessions
    Session {
        #[command(subcommand)]
        action: Option<SessionAction>,
    },

    /// Update the active session's settings
    Settings {
        /// First month of the reporting period (YYYY-MM)
        #[arg(long)]
        period_start: Option<String>,

        /// Last month of the reporting period (YYYY-MM)
        #[arg(long)]
        period_end: Option<String>,

        /// Display currency symbol (does not alter arithmetic)
        #[arg(long)]
        currency: Option<String>,

        /// Absolute-dollar variance tolerance
        #[arg(long)]
        tolerance: Option<f64>,
    },

    /// Load CSV tables into the active session
    ///
    /// Table kind is inferred from the file name (accounts.csv,
    /// customers.csv, subscriptions.csv, invoices.csv, payments.csv,
    /// credit_notes.csv) unless --table is given.
    Load {
        /// CSV files to load
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Table kind override (single file only)
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Validate the uploaded tables and build the initial identity picture
    Validate,

    /// Review and arbitrate identity matches
    Identity {
        #[command(subcommand)]
        action: Option<IdentityAction>,
    },

    /// Run the reconciliation analysis
    Analyze {
        /// Proceed even when fuzzy matches await review
        #[arg(long)]
        bypass_review: bool,

        /// Return immediately instead of following progress
        #[arg(long)]
        no_wait: bool,
    },

    /// Show session status and pipeline progress
    Status,

    /// Show the structural integrity dashboard
    Dashboard,

    /// List the per-account reconciliation ledger
    Accounts {
        /// Filter by primary variance type (comma-separated, e.g.
        /// MISSING_INVOICE,UNDER_BILLED)
        #[arg(long)]
        variance_type: Option<String>,

        /// Filter by match type (exact, fuzzy_confirmed, email_signal,
        /// unmatched)
        #[arg(long)]
        match_type: Option<String>,

        /// Case-insensitive search over account name and rsx id
        #[arg(long)]
        search: Option<String>,
    },

    /// Show one account's segment-level lineage
    Lineage {
        /// The account's rsx id (see `revspine accounts`)
        rsx_id: String,
    },

    /// Show the exclusion log
    Exclusions {
        /// Filter by reason code
        #[arg(long)]
        reason: Option<String>,
    },

    /// Export artifacts as CSV
    Export {
        #[command(subcommand)]
        export_type: ExportType,
    },
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Create a new session
    New {
        /// First month of the reporting period (YYYY-MM)
        #[arg(long, default_value = "2024-01")]
        period_start: String,

        /// Last month of the reporting period (YYYY-MM)
        #[arg(long, default_value = "2024-12")]
        period_end: String,

        /// Display currency symbol
        #[arg(long, default_value = "USD")]
        currency: String,
    },

    /// List sessions
    List,

    /// Show the active session
    Show,
}

#[derive(Subcommand)]
pub enum IdentityAction {
    /// Show match buckets and the pending review queue
    List,

    /// Record a decision on a pending match
    Decide {
        /// Match id from the review queue (e.g. FM-0001)
        match_id: String,

        /// confirmed or rejected
        decision: String,
    },

    /// Undo the most recent decision
    Undo,

    /// Clear the decision log, restoring the initial queue
    Reset,
}

#[derive(Subcommand)]
pub enum ExportType {
    /// Export the account ledger
    Accounts {
        /// Output file
        #[arg(short, long, default_value = "revspine_accounts.csv")]
        output: PathBuf,
    },

    /// Export one account's lineage
    Lineage {
        /// The account's rsx id
        rsx_id: String,

        /// Output file
        #[arg(short, long, default_value = "revspine_lineage.csv")]
        output: PathBuf,
    },

    /// Export the exclusion log
    Exclusions {
        /// Output file
        #[arg(short, long, default_value = "revspine_exclusions.csv")]
        output: PathBuf,
    },
}

//! RevSpine CLI - deterministic revenue reconciliation
//!
//! Usage:
//!   revspine init                       Initialize the database
//!   revspine session new                Create an analysis session
//!   revspine load *.csv                 Load the six input tables
//!   revspine validate                   Validate and build the identity picture
//!   revspine identity decide FM-0001 confirmed
//!   revspine analyze                    Run the reconciliation pipeline
//!   revspine dashboard                  Show the structural integrity score

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (warn)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    if let Commands::Init = cli.command {
        return commands::cmd_init(&cli.db);
    }

    let svc = commands::open_service(&cli.db)?;

    // `session new` and `session list` work without an existing session
    match &cli.command {
        Commands::Session {
            action: Some(SessionAction::New {
                period_start,
                period_end,
                currency,
            }),
        } => return commands::cmd_session_new(&svc, period_start, period_end, currency),
        Commands::Session {
            action: Some(SessionAction::List),
        } => return commands::cmd_session_list(&svc),
        _ => {}
    }

    let session_id = commands::resolve_session(&svc, cli.session.as_deref())?;

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Session { action } => match action {
            None | Some(SessionAction::Show) => commands::cmd_session_show(&svc, &session_id),
            Some(SessionAction::New { .. }) | Some(SessionAction::List) => {
                unreachable!("handled above")
            }
        },
        Commands::Settings {
            period_start,
            period_end,
            currency,
            tolerance,
        } => commands::cmd_settings(
            &svc,
            &session_id,
            period_start.as_deref(),
            period_end.as_deref(),
            currency.as_deref(),
            tolerance,
        ),
        Commands::Load { files, table } => {
            commands::cmd_load(&svc, &session_id, &files, table.as_deref())
        }
        Commands::Validate => commands::cmd_validate(&svc, &session_id),
        Commands::Identity { action } => match action {
            None | Some(IdentityAction::List) => {
                commands::cmd_identity_list(&svc, &session_id)
            }
            Some(IdentityAction::Decide { match_id, decision }) => {
                commands::cmd_identity_decide(&svc, &session_id, &match_id, &decision)
            }
            Some(IdentityAction::Undo) => commands::cmd_identity_undo(&svc, &session_id),
            Some(IdentityAction::Reset) => commands::cmd_identity_reset(&svc, &session_id),
        },
        Commands::Analyze {
            bypass_review,
            no_wait,
        } => commands::cmd_analyze(&svc, &session_id, bypass_review, no_wait),
        Commands::Status => commands::cmd_status(&svc, &session_id),
        Commands::Dashboard => commands::cmd_dashboard(&svc, &session_id),
        Commands::Accounts {
            variance_type,
            match_type,
            search,
        } => commands::cmd_accounts(
            &svc,
            &session_id,
            variance_type.as_deref(),
            match_type.as_deref(),
            search.as_deref(),
        ),
        Commands::Lineage { rsx_id } => commands::cmd_lineage(&svc, &session_id, &rsx_id),
        Commands::Exclusions { reason } => {
            commands::cmd_exclusions(&svc, &session_id, reason.as_deref())
        }
        Commands::Export { export_type } => match export_type {
            ExportType::Accounts { output } => {
                commands::cmd_export_accounts(&svc, &session_id, &output)
            }
            ExportType::Lineage { rsx_id, output } => {
                commands::cmd_export_lineage(&svc, &session_id, &rsx_id, &output)
            }
            ExportType::Exclusions { output } => {
                commands::cmd_export_exclusions(&svc, &session_id, &output)
            }
        },
    }
}

//! CLI tests: argument parsing and the full command workflow against a
//! throwaway database.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands;

fn write_fixture(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn parse_basic_commands() {
    let cli = Cli::parse_from(["revspine", "analyze", "--bypass-review"]);
    match cli.command {
        Commands::Analyze {
            bypass_review,
            no_wait,
        } => {
            assert!(bypass_review);
            assert!(!no_wait);
        }
        _ => panic!("expected analyze"),
    }

    let cli = Cli::parse_from(["revspine", "--session", "rs-abc", "lineage", "RSX-0001"]);
    assert_eq!(cli.session.as_deref(), Some("rs-abc"));
    match cli.command {
        Commands::Lineage { rsx_id } => assert_eq!(rsx_id, "RSX-0001"),
        _ => panic!("expected lineage"),
    }

    assert!(Cli::try_parse_from(["revspine"]).is_err());
    assert!(Cli::try_parse_from(["revspine", "load"]).is_err());
}

#[test]
fn infer_table_from_file_names() {
    use revspine_core::TableKind;

    let cases = [
        ("accounts.csv", TableKind::Accounts),
        ("credit_notes.csv", TableKind::CreditNotes),
        ("2024_invoices.csv", TableKind::Invoices),
        ("payments_export.csv", TableKind::Payments),
    ];
    for (name, expected) in cases {
        assert_eq!(
            commands::infer_table(Path::new(name)).unwrap(),
            expected,
            "{}",
            name
        );
    }
    assert!(commands::infer_table(Path::new("statement.csv")).is_err());
}

#[test]
fn resolve_session_requires_one() {
    let dir = tempfile::tempdir().unwrap();
    let svc = commands::open_service(&dir.path().join("revspine.db")).unwrap();
    assert!(commands::resolve_session(&svc, None).is_err());
}

#[test]
fn full_workflow_through_commands() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("revspine.db");

    let accounts = write_fixture(
        dir.path(),
        "accounts.csv",
        "account_id,account_name\nACC-001,Acme Corporation\n",
    );
    let customers = write_fixture(
        dir.path(),
        "customers.csv",
        "customer_id,customer_name\nCUST-001,Acme Corporation Inc\n",
    );
    let subscriptions = write_fixture(
        dir.path(),
        "subscriptions.csv",
        "subscription_id,account_id,start_date,end_date,mrr\nSUB-001,ACC-001,2024-01-01,2024-12-31,1000\n",
    );
    let mut invoice_rows =
        String::from("invoice_id,customer_id,invoice_date,period_start,period_end,amount,status\n");
    let mut payment_rows = String::from("payment_id,invoice_id,payment_date,amount\n");
    for m in 1..=12u32 {
        let last = revspine_core::utils::last_day_of_month(2024, m);
        invoice_rows.push_str(&format!(
            "INV-{m:02},CUST-001,2024-{m:02}-01,2024-{m:02}-01,{last},1000,paid\n"
        ));
        payment_rows.push_str(&format!("PAY-{m:02},INV-{m:02},2024-{m:02}-10,1000\n"));
    }
    let invoices = write_fixture(dir.path(), "invoices.csv", &invoice_rows);
    let payments = write_fixture(dir.path(), "payments.csv", &payment_rows);

    let svc = commands::open_service(&db_path).unwrap();
    commands::cmd_session_new(&svc, "2024-01", "2024-12", "USD").unwrap();
    let session_id = commands::resolve_session(&svc, None).unwrap();

    commands::cmd_load(
        &svc,
        &session_id,
        &[accounts, customers, subscriptions, invoices, payments],
        None,
    )
    .unwrap();
    commands::cmd_validate(&svc, &session_id).unwrap();

    // "Acme Corporation" and "Acme Corporation Inc" normalize identically,
    // so the queue is empty and analysis can start right away.
    commands::cmd_analyze(&svc, &session_id, false, false).unwrap();
    commands::cmd_status(&svc, &session_id).unwrap();
    commands::cmd_dashboard(&svc, &session_id).unwrap();
    commands::cmd_accounts(&svc, &session_id, None, None, None).unwrap();
    commands::cmd_lineage(&svc, &session_id, "RSX-0001").unwrap();
    commands::cmd_exclusions(&svc, &session_id, None).unwrap();

    let export_path = dir.path().join("accounts_export.csv");
    commands::cmd_export_accounts(&svc, &session_id, &export_path).unwrap();
    let exported = fs::read_to_string(&export_path).unwrap();
    assert!(exported.contains("RSX-0001"));
    assert!(exported.contains("CLEAN"));
}

#[test]
fn validate_surfaces_errors_through_cli() {
    let dir = tempfile::tempdir().unwrap();
    let svc = commands::open_service(&dir.path().join("revspine.db")).unwrap();
    commands::cmd_session_new(&svc, "2024-01", "2024-12", "USD").unwrap();
    let session_id = commands::resolve_session(&svc, None).unwrap();

    let bad = write_fixture(
        dir.path(),
        "accounts.csv",
        "account_id,account_name\nACC-001,Acme\nACC-001,Duplicate\n",
    );
    commands::cmd_load(&svc, &session_id, &[bad], None).unwrap();
    assert!(commands::cmd_validate(&svc, &session_id).is_err());
}

#[test]
fn filter_arguments_reject_unknown_values() {
    let dir = tempfile::tempdir().unwrap();
    let svc = commands::open_service(&dir.path().join("revspine.db")).unwrap();
    commands::cmd_session_new(&svc, "2024-01", "2024-12", "USD").unwrap();
    let session_id = commands::resolve_session(&svc, None).unwrap();

    assert!(
        commands::cmd_accounts(&svc, &session_id, Some("NOT_A_STATUS"), None, None).is_err()
    );
    assert!(commands::cmd_exclusions(&svc, &session_id, Some("NOT_A_REASON")).is_err());
}

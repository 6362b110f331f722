//! Integration tests for revspine-core
//!
//! These exercise the full load -> validate -> review -> analyze -> report
//! workflow through the session service, including the seed scenarios the
//! engine is contractually expected to nail.

use revspine_core::{
    db::{ArtifactKind, Database},
    models::{ReviewDecision, SegmentStatus, Settings, TableKind},
    pipeline::{self, CancelFlag},
    AccountFilter, Error, ReasonCode, SessionService, SessionStatus,
};

const ACCOUNTS: &str = "account_id,account_name,email_domain\nACC-001,Acme Corporation,acme.com\n";
const CUSTOMERS: &str =
    "customer_id,customer_name,email_domain\nCUST-001,Acme Corporation,acme.com\n";

fn service() -> SessionService {
    SessionService::new(Database::in_memory().unwrap())
}

fn settings_2024() -> Settings {
    Settings {
        period_start: "2024-01".to_string(),
        period_end: "2024-12".to_string(),
        ..Settings::default()
    }
}

/// Load tables, validate, and return the ready session id
fn prepare(svc: &SessionService, tables: &[(TableKind, &str)]) -> String {
    let session = svc.create_session(settings_2024()).unwrap();
    for (kind, csv) in tables {
        svc.load_table(&session.id, *kind, csv.as_bytes(), &format!("{}.csv", kind))
            .unwrap();
    }
    let output = svc.validate(&session.id).unwrap();
    assert!(
        output.report.valid,
        "validation failed: {:?}",
        output.report.errors
    );
    session.id
}

fn monthly_invoices_2024(amount: &str) -> String {
    let mut csv =
        String::from("invoice_id,customer_id,invoice_date,period_start,period_end,amount,status\n");
    for m in 1..=12u32 {
        let last = revspine_core::utils::last_day_of_month(2024, m);
        csv.push_str(&format!(
            "INV-{m:02},CUST-001,2024-{m:02}-01,2024-{m:02}-01,{last},{amount},paid\n",
        ));
    }
    csv
}

fn monthly_payments_2024(amount: &str) -> String {
    let mut csv = String::from("payment_id,invoice_id,payment_date,amount\n");
    for m in 1..=12u32 {
        csv.push_str(&format!("PAY-{m:02},INV-{m:02},2024-{m:02}-15,{amount}\n"));
    }
    csv
}

// =============================================================================
// Seed scenarios
// =============================================================================

#[test]
fn s1_clean_year_scores_high() {
    let svc = service();
    let invoices = monthly_invoices_2024("1000");
    let payments = monthly_payments_2024("1000");
    let id = prepare(
        &svc,
        &[
            (TableKind::Accounts, ACCOUNTS),
            (TableKind::Customers, CUSTOMERS),
            (
                TableKind::Subscriptions,
                "subscription_id,account_id,start_date,end_date,mrr\nSUB-001,ACC-001,2024-01-01,2024-12-31,1000\n",
            ),
            (TableKind::Invoices, &invoices),
            (TableKind::Payments, &payments),
        ],
    );

    svc.run_blocking(&id, false).unwrap();
    assert_eq!(svc.status(&id).unwrap().status, SessionStatus::Completed);

    let dashboard = svc.dashboard(&id).unwrap();
    assert!(dashboard.score.score >= 95, "score {}", dashboard.score.score);
    assert!(dashboard.top_findings.is_empty());
    assert_eq!(dashboard.total_exclusions, 0);

    let accounts = svc.accounts(&id, &AccountFilter::default()).unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].periods, 12);
    assert_eq!(accounts[0].primary_variance_type, SegmentStatus::Clean);
    assert_eq!(accounts[0].expected_total, 12_000.0);
    assert_eq!(accounts[0].total_variance, 0.0);
}

#[test]
fn s2_proration_at_both_boundaries() {
    let svc = service();
    let id = prepare(
        &svc,
        &[
            (TableKind::Accounts, ACCOUNTS),
            (TableKind::Customers, CUSTOMERS),
            (
                TableKind::Subscriptions,
                "subscription_id,account_id,start_date,end_date,mrr\nSUB-001,ACC-001,2024-02-10,2024-11-20,3000\n",
            ),
            (
                TableKind::Invoices,
                "invoice_id,customer_id,invoice_date,period_start,period_end,amount,status\n\
                 INV-01,CUST-001,2024-02-10,2024-02-10,2024-02-29,2068.97,paid\n",
            ),
            (
                TableKind::Payments,
                "payment_id,invoice_id,payment_date,amount\nPAY-01,INV-01,2024-02-20,2068.97\n",
            ),
        ],
    );

    svc.run_blocking(&id, false).unwrap();
    let lineage = svc.lineage(&id, "RSX-0001").unwrap();
    let segments = &lineage.subscriptions[0].segments;
    assert_eq!(segments.len(), 10);
    assert_eq!(segments[0].period, "2024-02");
    assert_eq!(segments[0].expected, 2068.97);
    assert_eq!(segments[0].status, SegmentStatus::Clean);
    assert_eq!(segments[9].period, "2024-11");
    assert_eq!(segments[9].expected, 2000.0);
}

#[test]
fn s3_proportional_allocation_conserves_invoice_amount() {
    let svc = service();
    let id = prepare(
        &svc,
        &[
            (TableKind::Accounts, ACCOUNTS),
            (TableKind::Customers, CUSTOMERS),
            (
                TableKind::Subscriptions,
                "subscription_id,account_id,start_date,end_date,mrr\nSUB-001,ACC-001,2024-01-01,2024-12-31,2000\n",
            ),
            (
                TableKind::Invoices,
                "invoice_id,customer_id,invoice_date,period_start,period_end,amount,status\n\
                 INV-01,CUST-001,2024-01-15,2024-01-15,2024-03-14,6000,paid\n",
            ),
        ],
    );

    svc.run_blocking(&id, false).unwrap();
    let lineage = svc.lineage(&id, "RSX-0001").unwrap();
    let segments = &lineage.subscriptions[0].segments;
    assert_eq!(segments[0].invoiced, 1700.0);
    assert_eq!(segments[1].invoiced, 2900.0);
    assert_eq!(segments[2].invoiced, 1400.0);

    let allocated: f64 = segments.iter().map(|s| s.invoiced).sum();
    assert!((allocated - 6000.0).abs() < 0.005);
}

#[test]
fn s4_missing_invoices_sum_to_revenue_at_risk() {
    let svc = service();
    let id = prepare(
        &svc,
        &[
            (TableKind::Accounts, ACCOUNTS),
            (TableKind::Customers, CUSTOMERS),
            (
                TableKind::Subscriptions,
                "subscription_id,account_id,start_date,end_date,mrr\nSUB-001,ACC-001,2024-01-01,2024-12-31,1000\n",
            ),
            (
                TableKind::Invoices,
                "invoice_id,customer_id,invoice_date,period_start,period_end,amount,status\n\
                 INV-01,CUST-001,2025-01-01,2025-01-01,2025-01-31,1000,paid\n",
            ),
        ],
    );

    svc.run_blocking(&id, false).unwrap();
    let dashboard = svc.dashboard(&id).unwrap();
    let rar = &dashboard.score.revenue_at_risk;
    assert_eq!(rar.missing_invoice.amount, 12_000.0);
    assert_eq!(rar.missing_invoice.accounts, 1);

    let accounts = svc
        .accounts(
            &id,
            &AccountFilter {
                variance_types: vec![SegmentStatus::MissingInvoice],
                ..AccountFilter::default()
            },
        )
        .unwrap();
    assert_eq!(accounts.len(), 1);
}

#[test]
fn s5_credit_netting_flips_clean_to_under_billed() {
    let svc = service();
    let id = prepare(
        &svc,
        &[
            (TableKind::Accounts, ACCOUNTS),
            (TableKind::Customers, CUSTOMERS),
            (
                TableKind::Subscriptions,
                "subscription_id,account_id,start_date,end_date,mrr\nSUB-001,ACC-001,2024-01-01,2024-01-31,1000\n",
            ),
            (
                TableKind::Invoices,
                "invoice_id,customer_id,invoice_date,period_start,period_end,amount,status\n\
                 INV-01,CUST-001,2024-01-01,2024-01-01,2024-01-31,1000,paid\n",
            ),
            (
                TableKind::Payments,
                "payment_id,invoice_id,payment_date,amount\nPAY-01,INV-01,2024-01-15,1000\n",
            ),
            (
                TableKind::CreditNotes,
                "credit_note_id,customer_id,invoice_id,credit_date,amount,reason\n\
                 CN-01,CUST-001,,2024-01-20,200,goodwill\n",
            ),
        ],
    );

    svc.run_blocking(&id, false).unwrap();
    let lineage = svc.lineage(&id, "RSX-0001").unwrap();
    let seg = &lineage.subscriptions[0].segments[0];
    assert_eq!(seg.effective_invoiced, 800.0);
    assert_eq!(seg.variance, -200.0);
    assert_eq!(seg.status, SegmentStatus::UnderBilled);
}

#[test]
fn s6_unmatched_account_is_unknown_exposure() {
    let svc = service();
    let id = prepare(
        &svc,
        &[
            (
                TableKind::Accounts,
                "account_id,account_name\nACC-001,Orphaned Systems\n",
            ),
            (
                TableKind::Customers,
                "customer_id,customer_name\nCUST-001,Completely Unrelated Name\n",
            ),
            (
                TableKind::Subscriptions,
                "subscription_id,account_id,start_date,end_date,mrr\nSUB-001,ACC-001,2024-01-01,2024-12-31,5000\n",
            ),
            (
                TableKind::Invoices,
                "invoice_id,customer_id,invoice_date,period_start,period_end,amount,status\n\
                 INV-01,CUST-001,2024-01-01,2024-01-01,2024-01-31,5000,paid\n",
            ),
        ],
    );

    svc.run_blocking(&id, false).unwrap();
    let accounts = svc.accounts(&id, &AccountFilter::default()).unwrap();
    assert_eq!(accounts.len(), 1);
    let acc = &accounts[0];
    assert_eq!(acc.match_type, revspine_core::MatchType::Unmatched);
    assert_eq!(acc.primary_variance_type, SegmentStatus::Unknown);
    assert_eq!(acc.expected_total, 60_000.0);

    let dashboard = svc.dashboard(&id).unwrap();
    assert_eq!(dashboard.score.revenue_at_risk.unknown.amount, 60_000.0);
    assert_eq!(dashboard.score.coverage.arr_pct, 0.0);
    // The invoice had no linked customer to land on
    let exclusions = svc.exclusions(&id, None).unwrap();
    assert!(exclusions
        .exclusions
        .iter()
        .any(|e| e.record_id == "INV-01" && e.reason_code == ReasonCode::AllocationAmbiguous));
}

// =============================================================================
// Identity arbitration workflow
// =============================================================================

const FUZZY_ACCOUNTS: &str = "account_id,account_name\nACC-001,Acme Data Systems\n";
const FUZZY_CUSTOMERS: &str = "customer_id,customer_name\nCUST-001,Acme Systems\n";

fn fuzzy_session(svc: &SessionService) -> String {
    prepare(
        svc,
        &[
            (TableKind::Accounts, FUZZY_ACCOUNTS),
            (TableKind::Customers, FUZZY_CUSTOMERS),
            (
                TableKind::Subscriptions,
                "subscription_id,account_id,start_date,end_date,mrr\nSUB-001,ACC-001,2024-01-01,2024-12-31,1000\n",
            ),
            (
                TableKind::Invoices,
                "invoice_id,customer_id,invoice_date,period_start,period_end,amount,status\n\
                 INV-01,CUST-001,2024-01-01,2024-01-01,2024-01-31,1000,paid\n",
            ),
        ],
    )
}

#[test]
fn analyze_refuses_while_review_pending() {
    let svc = service();
    let id = fuzzy_session(&svc);

    let view = svc.identity(&id).unwrap();
    assert_eq!(view.pending_review.len(), 1);
    assert!(!view.all_reviewed);

    let err = svc.run_blocking(&id, false).unwrap_err();
    assert!(matches!(err, Error::IdentityReviewRequired));
    // No state change
    assert_eq!(
        svc.status(&id).unwrap().status,
        SessionStatus::IdentityReview
    );

    // Explicit bypass proceeds with the pair left unmatched
    svc.run_blocking(&id, true).unwrap();
    let accounts = svc.accounts(&id, &AccountFilter::default()).unwrap();
    assert_eq!(accounts[0].primary_variance_type, SegmentStatus::Unknown);
}

#[test]
fn decide_undo_reset_replay() {
    let svc = service();
    let id = fuzzy_session(&svc);
    let match_id = svc.identity(&id).unwrap().pending_review[0].match_id.clone();

    // Confirm, analyze
    svc.decide(&id, &match_id, ReviewDecision::Confirmed).unwrap();
    assert!(svc.identity(&id).unwrap().all_reviewed);
    svc.run_blocking(&id, false).unwrap();
    let accounts = svc.accounts(&id, &AccountFilter::default()).unwrap();
    assert_eq!(
        accounts[0].match_type,
        revspine_core::MatchType::FuzzyConfirmed
    );

    // Undo pops the decision and the queue returns
    let undone = svc.undo(&id).unwrap().unwrap();
    assert_eq!(undone.match_id, match_id);
    let view = svc.identity(&id).unwrap();
    assert_eq!(view.pending_review.len(), 1);

    // Undo on an empty log signals rather than failing
    assert!(svc.undo(&id).unwrap().is_none());

    // Reject leaves both sides unmatched
    svc.decide(&id, &match_id, ReviewDecision::Rejected).unwrap();
    let view = svc.identity(&id).unwrap();
    assert!(view.all_reviewed);
    assert_eq!(view.unmatched_accounts.len(), 1);
    assert_eq!(view.unmatched_customers.len(), 1);

    // Reset clears the log and restores the queue
    let cleared = svc.reset(&id).unwrap();
    assert_eq!(cleared, 1);
    assert_eq!(svc.identity(&id).unwrap().pending_review.len(), 1);
    assert_eq!(
        svc.status(&id).unwrap().status,
        SessionStatus::IdentityReview
    );
}

#[test]
fn deciding_unknown_match_fails() {
    let svc = service();
    let id = fuzzy_session(&svc);
    let err = svc
        .decide(&id, "FM-9999", ReviewDecision::Confirmed)
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// =============================================================================
// Universal invariants
// =============================================================================

#[test]
fn determinism_across_runs() {
    let svc = service();
    let invoices = monthly_invoices_2024("997.37");
    let id = prepare(
        &svc,
        &[
            (TableKind::Accounts, ACCOUNTS),
            (TableKind::Customers, CUSTOMERS),
            (
                TableKind::Subscriptions,
                "subscription_id,account_id,start_date,end_date,mrr,ramp_schedule\n\
                 SUB-001,ACC-001,2024-01-15,2024-11-20,1000,\"[{\"\"effective_date\"\":\"\"2024-06-10\"\",\"\"mrr\"\":1500}]\"\n",
            ),
            (TableKind::Invoices, &invoices),
        ],
    );

    svc.run_blocking(&id, false).unwrap();
    let db = svc.db();
    let first_recon: serde_json::Value = db
        .require_artifact(&id, ArtifactKind::Reconciliation)
        .unwrap();
    let first_score: serde_json::Value = db.require_artifact(&id, ArtifactKind::Score).unwrap();
    let first_spine: serde_json::Value = db.require_artifact(&id, ArtifactKind::Spine).unwrap();
    let first_summaries: serde_json::Value = db
        .require_artifact(&id, ArtifactKind::AccountSummaries)
        .unwrap();

    // Re-run on the identical inputs and decision log
    svc.run_blocking(&id, false).unwrap();
    let second_recon: serde_json::Value = db
        .require_artifact(&id, ArtifactKind::Reconciliation)
        .unwrap();
    let second_score: serde_json::Value = db.require_artifact(&id, ArtifactKind::Score).unwrap();
    let second_spine: serde_json::Value = db.require_artifact(&id, ArtifactKind::Spine).unwrap();
    let second_summaries: serde_json::Value = db
        .require_artifact(&id, ArtifactKind::AccountSummaries)
        .unwrap();

    assert_eq!(first_recon, second_recon);
    assert_eq!(first_score, second_score);
    assert_eq!(first_spine, second_spine);
    assert_eq!(first_summaries, second_summaries);
}

#[test]
fn exclusion_log_captures_every_refused_record() {
    let svc = service();
    let id = prepare(
        &svc,
        &[
            (TableKind::Accounts, ACCOUNTS),
            (TableKind::Customers, CUSTOMERS),
            (
                TableKind::Subscriptions,
                "subscription_id,account_id,start_date,end_date,mrr\n\
                 SUB-001,ACC-001,2024-01-01,2024-12-31,1000\n\
                 SUB-BAD,ACC-001,2024-01-01,2024-12-31,-50\n",
            ),
            (
                TableKind::Invoices,
                "invoice_id,customer_id,invoice_date,period_start,period_end,amount,status\n\
                 INV-01,CUST-001,2024-01-01,2024-01-01,2024-01-31,1000,paid\n\
                 INV-VOID,CUST-001,2024-02-01,2024-02-01,2024-02-29,1000,void\n\
                 INV-STRAY,CUST-GHOST,2024-03-01,2024-03-01,2024-03-31,1000,paid\n",
            ),
            (
                TableKind::Payments,
                "payment_id,invoice_id,payment_date,amount\n\
                 PAY-01,INV-01,2024-01-15,1000\n\
                 PAY-VOID,INV-VOID,2024-02-15,1000\n\
                 PAY-GHOST,INV-GHOST,2024-03-15,1000\n",
            ),
            (
                TableKind::CreditNotes,
                "credit_note_id,customer_id,invoice_id,credit_date,amount,reason\n\
                 CN-STRAY,CUST-GHOST,,2024-01-15,100,stray\n",
            ),
        ],
    );

    svc.run_blocking(&id, false).unwrap();
    let view = svc.exclusions(&id, None).unwrap();

    let excluded_ids: Vec<&str> = view
        .exclusions
        .iter()
        .map(|e| e.record_id.as_str())
        .collect();
    for expect in [
        "SUB-BAD",
        "INV-VOID",
        "INV-STRAY",
        "PAY-VOID",
        "PAY-GHOST",
        "CN-STRAY",
    ] {
        assert_eq!(
            excluded_ids.iter().filter(|id| **id == expect).count(),
            1,
            "expected exactly one exclusion for {}",
            expect
        );
    }
    // Every exclusion carries a human-readable description
    assert!(view.exclusions.iter().all(|e| !e.description.is_empty()));

    // Filter by reason code
    let unallocated = svc
        .exclusions(&id, Some(ReasonCode::CreditNoteUnallocated))
        .unwrap();
    assert_eq!(unallocated.total, 1);
    assert_eq!(unallocated.exclusions[0].record_id, "CN-STRAY");
    // SUB-BAD, INV-VOID and both refused payments
    assert_eq!(view.summary["UNSUPPORTED_STRUCTURE"], 4);
}

#[test]
fn cancellation_at_stage_boundary_restores_review_state() {
    let svc = service();
    let id = fuzzy_session(&svc);
    let match_id = svc.identity(&id).unwrap().pending_review[0].match_id.clone();
    svc.decide(&id, &match_id, ReviewDecision::Confirmed).unwrap();

    // A pre-cancelled flag stops the run at the first stage boundary
    let cancel = CancelFlag::new();
    cancel.cancel();
    pipeline::run(svc.db(), &id, &cancel).unwrap();

    assert_eq!(
        svc.status(&id).unwrap().status,
        SessionStatus::IdentityReview
    );
    assert!(svc.dashboard(&id).is_err());
}

#[test]
fn background_analysis_completes() {
    let svc = service();
    let invoices = monthly_invoices_2024("1000");
    let id = prepare(
        &svc,
        &[
            (TableKind::Accounts, ACCOUNTS),
            (TableKind::Customers, CUSTOMERS),
            (
                TableKind::Subscriptions,
                "subscription_id,account_id,start_date,end_date,mrr\nSUB-001,ACC-001,2024-01-01,2024-12-31,1000\n",
            ),
            (TableKind::Invoices, &invoices),
        ],
    );

    let handle = svc.analyze(&id, false).unwrap();
    handle.wait();

    let status = svc.status(&id).unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    assert_eq!(status.processing.current_step.as_deref(), Some("scoring"));
    for step in pipeline::STEPS {
        assert!(
            status.processing.steps.contains_key(step),
            "missing step record for {}",
            step
        );
    }
    assert!(!status.processing.log.is_empty());
}

#[test]
fn validation_failure_reports_rows_and_fields() {
    let svc = service();
    let session = svc.create_session(settings_2024()).unwrap();
    svc.load_table(
        &session.id,
        TableKind::Accounts,
        "account_id,account_name\nACC-001,Acme\nACC-001,Duplicate\n".as_bytes(),
        "accounts.csv",
    )
    .unwrap();

    let output = svc.validate(&session.id).unwrap();
    assert!(!output.report.valid);
    assert!(output.identity_summary.is_none());
    assert!(output
        .report
        .errors
        .iter()
        .any(|e| e.message.contains("Duplicate account_id")));
    assert!(output
        .report
        .errors
        .iter()
        .any(|e| e.file == "customers" && e.message.contains("required")));
    assert_eq!(
        svc.status(&session.id).unwrap().status,
        SessionStatus::Created
    );
}

#[test]
fn settings_validation_and_unknown_keys() {
    let svc = service();
    let bad = Settings {
        period_start: "2024-13".to_string(),
        ..Settings::default()
    };
    assert!(svc.create_session(bad).is_err());

    // Unknown keys are rejected at the deserialization boundary
    let parsed: Result<Settings, serde_json::Error> =
        serde_json::from_str(r#"{"currency":"EUR","deferred_revenue":true}"#);
    assert!(parsed.is_err());
}

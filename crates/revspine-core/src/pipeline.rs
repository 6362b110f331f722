//! Analysis pipeline driver
//!
//! Runs the five stages in order, persisting each stage's artifact and a
//! progress record before moving on. The cancel flag is honored at stage
//! boundaries only; a cancelled run keeps every fully-persisted stage and
//! drops the session back to identity review. Failures flip the session
//! into the `error` terminal state with the cause recorded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{error, info};

use crate::db::{ArtifactKind, Database};
use crate::error::Result;
use crate::identity;
use crate::ingest::Rowsets;
use crate::lifecycle;
use crate::models::{
    LogEntry, ProcessingStatus, SessionStatus, Settings, StepRecord, StepState,
};
use crate::reconcile;
use crate::rollup;
use crate::scoring;
use crate::utils::{last_day_of_month, parse_month};

/// Stage names, in execution order
pub const STEPS: [&str; 5] = [
    "ingestion",
    "identity",
    "lifecycle",
    "reconciliation",
    "scoring",
];

/// Cooperative cancellation handle, checked between stages
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolve the reporting period from session settings
pub fn reporting_period(settings: &Settings) -> Result<(NaiveDate, NaiveDate)> {
    let (sy, sm) = parse_month(&settings.period_start)?;
    let (ey, em) = parse_month(&settings.period_end)?;
    let start = NaiveDate::from_ymd_opt(sy, sm, 1).unwrap();
    let end = last_day_of_month(ey, em);
    if start > end {
        return Err(crate::error::Error::InvalidData(format!(
            "period_start {} is after period_end {}",
            settings.period_start, settings.period_end
        )));
    }
    Ok((start, end))
}

/// Writes step records and the progress log through single-document
/// session updates.
struct StepLog<'a> {
    db: &'a Database,
    session_id: &'a str,
    processing: ProcessingStatus,
}

impl<'a> StepLog<'a> {
    fn new(db: &'a Database, session_id: &'a str) -> Self {
        Self {
            db,
            session_id,
            processing: ProcessingStatus::default(),
        }
    }

    fn record(&mut self, step: &str, state: StepState, message: String) -> Result<()> {
        self.processing.current_step = Some(step.to_string());
        self.processing.steps.insert(
            step.to_string(),
            StepRecord {
                status: state,
                timestamp: Utc::now(),
            },
        );
        if !message.is_empty() {
            self.processing.log.push(LogEntry {
                step: step.to_string(),
                message,
                timestamp: Utc::now(),
            });
        }
        self.db.save_processing(self.session_id, &self.processing)
    }

    fn running(&mut self, step: &str, message: &str) -> Result<()> {
        info!(step, "{}", message);
        self.record(step, StepState::Running, message.to_string())
    }

    fn complete(&mut self, step: &str, message: String) -> Result<()> {
        info!(step, "{}", message);
        self.record(step, StepState::Complete, message)
    }
}

/// Run the full analysis for a session. Expects the session to already be
/// in the `processing` state.
pub fn run(db: &Database, session_id: &str, cancel: &CancelFlag) -> Result<()> {
    match run_stages(db, session_id, cancel) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(session = session_id, error = %e, "Analysis failed");
            db.mark_session_error(session_id, &e.to_string())?;
            Err(e)
        }
    }
}

fn cancelled(db: &Database, session_id: &str, cancel: &CancelFlag) -> Result<bool> {
    if cancel.is_cancelled() {
        info!(session = session_id, "Analysis cancelled");
        db.update_session_status(session_id, SessionStatus::IdentityReview)?;
        return Ok(true);
    }
    Ok(false)
}

fn run_stages(db: &Database, session_id: &str, cancel: &CancelFlag) -> Result<()> {
    let session = db.get_session(session_id)?;
    let (period_start, period_end) = reporting_period(&session.settings)?;
    let mut log = StepLog::new(db, session_id);

    db.clear_derived_artifacts(session_id)?;

    // Stage 1: ingestion
    log.running("ingestion", "Loading validated data")?;
    let rowsets = Rowsets::load(db, session_id)?;
    log.complete(
        "ingestion",
        format!(
            "Loaded {} accounts, {} customers, {} subscriptions, {} invoices, {} payments, {} credit notes",
            rowsets.accounts.len(),
            rowsets.customers.len(),
            rowsets.subscriptions.len(),
            rowsets.invoices.len(),
            rowsets.payments.len(),
            rowsets.credit_notes.len(),
        ),
    )?;
    if cancelled(db, session_id, cancel)? {
        return Ok(());
    }

    // Stage 2: identity spine
    log.running("identity", "Building identity spine")?;
    let outcome = identity::resolve(&rowsets.accounts, &rowsets.customers, &session.decisions);
    db.put_artifact(session_id, ArtifactKind::Identity, &outcome)?;
    db.put_artifact(session_id, ArtifactKind::Spine, &outcome.spine)?;
    log.complete(
        "identity",
        format!(
            "{} accounts on the spine, {} auto-matched, {} unmatched",
            outcome.spine.len(),
            outcome.auto_matched.len(),
            outcome.unmatched_accounts.len()
        ),
    )?;
    if cancelled(db, session_id, cancel)? {
        return Ok(());
    }

    // Stage 3: lifecycle segments
    log.running("lifecycle", "Generating revenue segments")?;
    let lifecycle_out = lifecycle::build_segments(
        &rowsets.subscriptions,
        &outcome.spine,
        period_start,
        period_end,
    );
    db.put_artifact(session_id, ArtifactKind::Segments, &lifecycle_out.segments)?;
    let mut exclusions = lifecycle_out.exclusions;
    log.complete(
        "lifecycle",
        format!(
            "{} revenue segments generated, {} subscriptions excluded",
            lifecycle_out.segments.len(),
            exclusions.len()
        ),
    )?;
    if cancelled(db, session_id, cancel)? {
        return Ok(());
    }

    // Stage 4: reconciliation
    log.running("reconciliation", "Allocating invoices and reconciling")?;
    let recon = reconcile::reconcile(
        &lifecycle_out.segments,
        &rowsets.invoices,
        &rowsets.payments,
        &rowsets.credit_notes,
        &outcome.spine,
        session.settings.tolerance,
    );
    exclusions.extend(recon.exclusions);
    db.put_artifact(session_id, ArtifactKind::Reconciliation, &recon.variances)?;
    db.put_artifact(session_id, ArtifactKind::Exclusions, &exclusions)?;
    log.complete(
        "reconciliation",
        format!(
            "{} segments reconciled, {} total exclusions",
            recon.variances.len(),
            exclusions.len()
        ),
    )?;
    if cancelled(db, session_id, cancel)? {
        return Ok(());
    }

    // Stage 5: scoring
    log.running("scoring", "Calculating structural integrity score")?;
    let summaries = rollup::summarize_accounts(
        &outcome.spine,
        &recon.variances,
        &session.settings.currency,
    );
    let score = scoring::calculate_score(
        &outcome.spine,
        &recon.variances,
        &summaries,
        rowsets.subscriptions.len(),
    );
    db.put_artifact(session_id, ArtifactKind::AccountSummaries, &summaries)?;
    db.put_artifact(session_id, ArtifactKind::Score, &score)?;
    log.complete(
        "scoring",
        format!("Score: {} ({})", score.score, score.band),
    )?;

    db.mark_session_completed(session_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporting_period_expands_months() {
        let settings = Settings {
            period_start: "2024-01".to_string(),
            period_end: "2024-12".to_string(),
            ..Settings::default()
        };
        let (start, end) = reporting_period(&settings).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
    }

    #[test]
    fn reporting_period_rejects_inverted_range() {
        let settings = Settings {
            period_start: "2024-06".to_string(),
            period_end: "2024-01".to_string(),
            ..Settings::default()
        };
        assert!(reporting_period(&settings).is_err());
    }

    #[test]
    fn cancel_flag_round_trip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}

//! Session operations facade
//!
//! `SessionService` is the surface the operational layer (CLI, or any
//! future transport) talks to: create sessions, load tables, validate,
//! arbitrate identity matches, kick off background analysis and read the
//! derived artifacts. One session is owned by one worker at a time; all
//! mutation goes through single-document store writes.

use std::collections::BTreeMap;
use std::io::Read;
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{ArtifactKind, Database};
use crate::error::{Error, Result};
use crate::identity::{self, IdentityLink, IdentityOutcome, IdentitySummary, MatchCandidate, MatchType, UnmatchedEntity};
use crate::ingest::{read_table, RawRow, RawTable};
use crate::models::{
    AccountRow, CustomerRow, Decision, Exclusion, HistoryEntry, ProcessingStatus, ReasonCode,
    ReviewDecision, SegmentStatus, Session, SessionStatus, Settings, TableKind, UploadRecord,
};
use crate::pipeline::{self, CancelFlag};
use crate::reconcile::SegmentVariance;
use crate::rollup::AccountSummary;
use crate::scoring::{self, ScoreReport, DEFAULT_FINDINGS};
use crate::validate::{self, ValidationIssue, ValidationReport};

/// Result of `validate`: the report plus, when valid, the initial identity
/// picture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutput {
    pub report: ValidationReport,
    pub identity_summary: Option<IdentitySummary>,
}

/// The arbitration view of a session's identity state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityView {
    pub auto_matched: Vec<IdentityLink>,
    pub needs_review: Vec<MatchCandidate>,
    pub pending_review: Vec<MatchCandidate>,
    pub unmatched_accounts: Vec<UnmatchedEntity>,
    pub unmatched_customers: Vec<UnmatchedEntity>,
    pub decisions: Vec<Decision>,
    pub all_reviewed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusView {
    pub status: SessionStatus,
    pub processing: ProcessingStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub score: ScoreReport,
    pub top_findings: Vec<AccountSummary>,
    pub total_exclusions: usize,
    pub ambiguous_allocations: usize,
    pub settings: Settings,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filters for the account ledger
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    /// Keep only these primary variance types (empty keeps all)
    pub variance_types: Vec<SegmentStatus>,
    pub match_type: Option<MatchType>,
    /// Case-insensitive substring over account name and rsx id
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionLineage {
    pub subscription_id: String,
    pub segments: Vec<SegmentVariance>,
    pub total_expected: f64,
    pub total_invoiced: f64,
    pub total_credit_notes: f64,
    pub total_collected: f64,
    pub total_variance: f64,
}

/// Full drill-down for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lineage {
    pub entity: IdentityLink,
    pub subscriptions: Vec<SubscriptionLineage>,
    pub total_expected: f64,
    pub total_invoiced: f64,
    pub total_variance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionView {
    pub exclusions: Vec<Exclusion>,
    pub total: usize,
    /// Count per reason code over the whole log, independent of filtering
    pub summary: BTreeMap<String, usize>,
}

/// Handle on a background analysis run
pub struct AnalysisHandle {
    cancel: CancelFlag,
    join: thread::JoinHandle<()>,
}

impl AnalysisHandle {
    /// Request cooperative cancellation at the next stage boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the worker finishes
    pub fn wait(self) {
        let _ = self.join.join();
    }
}

#[derive(Clone)]
pub struct SessionService {
    db: Database,
}

impl SessionService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // ========== Session lifecycle ==========

    pub fn create_session(&self, settings: Settings) -> Result<Session> {
        pipeline::reporting_period(&settings)?;
        self.db.create_session(&settings)
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        self.db.get_session(id)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        self.db.list_sessions()
    }

    pub fn update_settings(&self, id: &str, settings: Settings) -> Result<()> {
        pipeline::reporting_period(&settings)?;
        let session = self.db.get_session(id)?;
        if session.status == SessionStatus::Processing {
            return Err(Error::State(
                "settings cannot change while analysis is running".to_string(),
            ));
        }
        self.db.update_session_settings(id, &settings)
    }

    // ========== Data loading & validation ==========

    /// Parse a CSV table into the session's raw store.
    ///
    /// Loading data invalidates any previous validation or analysis, so the
    /// session drops back to `created`.
    pub fn load_table<R: Read>(
        &self,
        id: &str,
        table: TableKind,
        reader: R,
        filename: &str,
    ) -> Result<usize> {
        let session = self.db.get_session(id)?;
        if session.status == SessionStatus::Processing {
            return Err(Error::State(
                "data cannot change while analysis is running".to_string(),
            ));
        }

        let parsed = read_table(reader)?;
        let rows = parsed.rows.len();
        self.db
            .put_artifact(id, ArtifactKind::raw_for(table), &parsed.rows)?;
        self.db.record_upload(
            id,
            table.as_str(),
            &UploadRecord {
                rows,
                filename: filename.to_string(),
            },
        )?;
        self.db.update_session_status(id, SessionStatus::Created)?;
        debug!(session = id, table = %table, rows, "Table loaded");
        Ok(rows)
    }

    fn raw_tables(&self, id: &str) -> Result<BTreeMap<TableKind, RawTable>> {
        let mut tables = BTreeMap::new();
        for kind in TableKind::ALL {
            let rows: Option<Vec<RawRow>> =
                self.db.get_artifact(id, ArtifactKind::raw_for(kind))?;
            if let Some(rows) = rows {
                let headers: Vec<String> =
                    rows.first().map(|r| r.keys().cloned().collect()).unwrap_or_default();
                tables.insert(kind, RawTable { headers, rows });
            }
        }
        Ok(tables)
    }

    fn load_entities(&self, id: &str) -> Result<(Vec<AccountRow>, Vec<CustomerRow>)> {
        let mut issues: Vec<ValidationIssue> = Vec::new();

        let accounts_raw: Vec<RawRow> =
            self.db.require_artifact(id, ArtifactKind::AccountsRaw)?;
        let accounts: Vec<AccountRow> = accounts_raw
            .iter()
            .enumerate()
            .filter_map(|(i, row)| validate::parse_account(row, i + 2, &mut issues))
            .collect();

        let customers_raw: Vec<RawRow> =
            self.db.require_artifact(id, ArtifactKind::CustomersRaw)?;
        let customers: Vec<CustomerRow> = customers_raw
            .iter()
            .enumerate()
            .filter_map(|(i, row)| validate::parse_customer(row, i + 2, &mut issues))
            .collect();

        Ok((accounts, customers))
    }

    fn resolve_identity(&self, session: &Session) -> Result<IdentityOutcome> {
        let (accounts, customers) = self.load_entities(&session.id)?;
        Ok(identity::resolve(&accounts, &customers, &session.decisions))
    }

    /// Validate all uploaded tables. On success the session moves to
    /// `identity_review` with the initial match picture stored.
    pub fn validate(&self, id: &str) -> Result<ValidationOutput> {
        let session = self.db.get_session(id)?;
        if session.status == SessionStatus::Processing {
            return Err(Error::State("analysis is running".to_string()));
        }

        let tables = self.raw_tables(id)?;
        let report = validate::validate_all(&tables);
        if !report.valid {
            self.db.update_session_status(id, SessionStatus::Created)?;
            return Ok(ValidationOutput {
                report,
                identity_summary: None,
            });
        }

        let session = self.db.get_session(id)?;
        let outcome = self.resolve_identity(&session)?;
        self.db.put_artifact(id, ArtifactKind::Identity, &outcome)?;
        self.db
            .update_session_status(id, SessionStatus::IdentityReview)?;

        Ok(ValidationOutput {
            identity_summary: Some(outcome.summary()),
            report,
        })
    }

    // ========== Identity arbitration ==========

    pub fn identity(&self, id: &str) -> Result<IdentityView> {
        let session = self.db.get_session(id)?;
        if session.status == SessionStatus::Created {
            return Err(Error::State("validate before reviewing identity".to_string()));
        }

        let outcome = self.resolve_identity(&session)?;
        Ok(IdentityView {
            all_reviewed: outcome.all_reviewed(),
            auto_matched: outcome.auto_matched,
            needs_review: outcome.needs_review,
            pending_review: outcome.pending_review,
            unmatched_accounts: outcome.unmatched_accounts,
            unmatched_customers: outcome.unmatched_customers,
            decisions: session.decisions,
        })
    }

    /// Append an operator decision to the log
    pub fn decide(&self, id: &str, match_id: &str, decision: ReviewDecision) -> Result<()> {
        let mut session = self.db.get_session(id)?;
        if session.status == SessionStatus::Processing {
            return Err(Error::State("analysis is running".to_string()));
        }

        let outcome = self.resolve_identity(&session)?;
        if !outcome.needs_review.iter().any(|c| c.match_id == match_id) {
            return Err(Error::NotFound(format!("match {}", match_id)));
        }

        let now = Utc::now();
        session.decisions.push(Decision {
            match_id: match_id.to_string(),
            decision,
            decided_at: now,
        });
        session.history.push(HistoryEntry {
            action: "decide".to_string(),
            match_id: Some(match_id.to_string()),
            timestamp: now,
        });
        self.db
            .save_decisions(id, &session.decisions, &session.history)?;

        // Re-deciding after a completed run makes its artifacts stale
        if session.status == SessionStatus::Completed {
            self.db
                .update_session_status(id, SessionStatus::IdentityReview)?;
        }
        Ok(())
    }

    /// Pop the most recent decision. Returns None when the log is empty.
    pub fn undo(&self, id: &str) -> Result<Option<Decision>> {
        let mut session = self.db.get_session(id)?;
        if session.status == SessionStatus::Processing {
            return Err(Error::State("analysis is running".to_string()));
        }

        let Some(removed) = session.decisions.pop() else {
            return Ok(None);
        };
        session.history.push(HistoryEntry {
            action: "undo".to_string(),
            match_id: Some(removed.match_id.clone()),
            timestamp: Utc::now(),
        });
        self.db
            .save_decisions(id, &session.decisions, &session.history)?;
        if session.status == SessionStatus::Completed {
            self.db
                .update_session_status(id, SessionStatus::IdentityReview)?;
        }
        Ok(Some(removed))
    }

    /// Clear the decision log, restoring the initial review queue
    pub fn reset(&self, id: &str) -> Result<usize> {
        let mut session = self.db.get_session(id)?;
        if session.status == SessionStatus::Processing {
            return Err(Error::State("analysis is running".to_string()));
        }

        let cleared = session.decisions.len();
        session.decisions.clear();
        session.history.push(HistoryEntry {
            action: "reset".to_string(),
            match_id: None,
            timestamp: Utc::now(),
        });
        self.db
            .save_decisions(id, &session.decisions, &session.history)?;
        self.db
            .update_session_status(id, SessionStatus::IdentityReview)?;
        Ok(cleared)
    }

    // ========== Analysis ==========

    fn prepare_analysis(&self, id: &str, bypass_review: bool) -> Result<()> {
        let session = self.db.get_session(id)?;
        match session.status {
            SessionStatus::IdentityReview | SessionStatus::Completed | SessionStatus::Error => {}
            SessionStatus::Created => {
                return Err(Error::State("validate before analyze".to_string()))
            }
            SessionStatus::Processing => {
                return Err(Error::State("analysis already running".to_string()))
            }
        }

        let outcome = self.resolve_identity(&session)?;
        if !outcome.all_reviewed() && !bypass_review {
            return Err(Error::IdentityReviewRequired);
        }

        let mut processing = ProcessingStatus::default();
        processing.current_step = Some("ingestion".to_string());
        self.db.save_processing(id, &processing)?;
        self.db.update_session_status(id, SessionStatus::Processing)
    }

    /// Kick off the background analysis; returns immediately with a handle.
    pub fn analyze(&self, id: &str, bypass_review: bool) -> Result<AnalysisHandle> {
        self.prepare_analysis(id, bypass_review)?;

        let db = self.db.clone();
        let session_id = id.to_string();
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let join = thread::spawn(move || {
            // Failures are recorded on the session by the pipeline itself
            let _ = pipeline::run(&db, &session_id, &flag);
        });

        Ok(AnalysisHandle { cancel, join })
    }

    /// Run the analysis on the calling thread
    pub fn run_blocking(&self, id: &str, bypass_review: bool) -> Result<()> {
        self.prepare_analysis(id, bypass_review)?;
        pipeline::run(&self.db, id, &CancelFlag::new())
    }

    pub fn status(&self, id: &str) -> Result<StatusView> {
        let session = self.db.get_session(id)?;
        Ok(StatusView {
            status: session.status,
            processing: session.processing,
            completed_at: session.completed_at,
        })
    }

    // ========== Derived views ==========

    fn require_completed(&self, id: &str) -> Result<Session> {
        let session = self.db.get_session(id)?;
        if self
            .db
            .get_artifact::<ScoreReport>(id, ArtifactKind::Score)?
            .is_none()
        {
            return Err(Error::State("analysis not complete".to_string()));
        }
        Ok(session)
    }

    pub fn dashboard(&self, id: &str) -> Result<Dashboard> {
        let session = self.require_completed(id)?;
        let score: ScoreReport = self.db.require_artifact(id, ArtifactKind::Score)?;
        let summaries: Vec<AccountSummary> =
            self.db.require_artifact(id, ArtifactKind::AccountSummaries)?;
        let exclusions: Vec<Exclusion> =
            self.db.require_artifact(id, ArtifactKind::Exclusions)?;

        let ambiguous_allocations = exclusions
            .iter()
            .filter(|e| e.reason_code == ReasonCode::AllocationAmbiguous)
            .count();

        Ok(Dashboard {
            score,
            top_findings: scoring::quick_findings(&summaries, DEFAULT_FINDINGS),
            total_exclusions: exclusions.len(),
            ambiguous_allocations,
            settings: session.settings,
            created_at: session.created_at,
            completed_at: session.completed_at,
        })
    }

    pub fn accounts(&self, id: &str, filter: &AccountFilter) -> Result<Vec<AccountSummary>> {
        self.require_completed(id)?;
        let summaries: Vec<AccountSummary> =
            self.db.require_artifact(id, ArtifactKind::AccountSummaries)?;

        let search = filter.search.as_ref().map(|s| s.to_lowercase());
        Ok(summaries
            .into_iter()
            .filter(|s| {
                filter.variance_types.is_empty()
                    || filter.variance_types.contains(&s.primary_variance_type)
            })
            .filter(|s| {
                filter
                    .match_type
                    .map(|m| s.match_type == m)
                    .unwrap_or(true)
            })
            .filter(|s| {
                search
                    .as_ref()
                    .map(|q| {
                        s.account_name.to_lowercase().contains(q)
                            || s.rsx_id.to_lowercase().contains(q)
                    })
                    .unwrap_or(true)
            })
            .collect())
    }

    pub fn lineage(&self, id: &str, rsx_id: &str) -> Result<Lineage> {
        self.require_completed(id)?;
        let spine: Vec<IdentityLink> = self.db.require_artifact(id, ArtifactKind::Spine)?;
        let entity = spine
            .into_iter()
            .find(|l| l.rsx_id == rsx_id)
            .ok_or_else(|| Error::NotFound(format!("entity {}", rsx_id)))?;

        let variances: Vec<SegmentVariance> =
            self.db.require_artifact(id, ArtifactKind::Reconciliation)?;
        let mut mine: Vec<SegmentVariance> = variances
            .into_iter()
            .filter(|v| v.rsx_id == rsx_id)
            .collect();
        mine.sort_by(|a, b| {
            a.subscription_id
                .cmp(&b.subscription_id)
                .then_with(|| a.period.cmp(&b.period))
                .then_with(|| a.segment_id.cmp(&b.segment_id))
        });

        let r2 = crate::utils::round2;
        let total_expected = r2(mine.iter().map(|v| v.expected).sum());
        let total_invoiced = r2(mine.iter().map(|v| v.invoiced).sum());
        let total_variance = r2(mine.iter().map(|v| v.variance).sum());

        let mut subscriptions: Vec<SubscriptionLineage> = Vec::new();
        for v in mine {
            match subscriptions
                .last_mut()
                .filter(|s| s.subscription_id == v.subscription_id)
            {
                Some(current) => current.segments.push(v),
                None => subscriptions.push(SubscriptionLineage {
                    subscription_id: v.subscription_id.clone(),
                    segments: vec![v],
                    total_expected: 0.0,
                    total_invoiced: 0.0,
                    total_credit_notes: 0.0,
                    total_collected: 0.0,
                    total_variance: 0.0,
                }),
            }
        }
        for sub in &mut subscriptions {
            sub.total_expected = r2(sub.segments.iter().map(|v| v.expected).sum());
            sub.total_invoiced = r2(sub.segments.iter().map(|v| v.invoiced).sum());
            sub.total_credit_notes = r2(sub.segments.iter().map(|v| v.credit_notes).sum());
            sub.total_collected = r2(sub.segments.iter().map(|v| v.collected).sum());
            sub.total_variance = r2(sub.segments.iter().map(|v| v.variance).sum());
        }

        Ok(Lineage {
            entity,
            subscriptions,
            total_expected,
            total_invoiced,
            total_variance,
        })
    }

    pub fn exclusions(&self, id: &str, reason: Option<ReasonCode>) -> Result<ExclusionView> {
        self.require_completed(id)?;
        let all: Vec<Exclusion> = self.db.require_artifact(id, ArtifactKind::Exclusions)?;

        let mut summary: BTreeMap<String, usize> = BTreeMap::new();
        for e in &all {
            *summary.entry(e.reason_code.as_str().to_string()).or_default() += 1;
        }

        let exclusions: Vec<Exclusion> = match reason {
            Some(code) => all.into_iter().filter(|e| e.reason_code == code).collect(),
            None => all,
        };

        Ok(ExclusionView {
            total: exclusions.len(),
            exclusions,
            summary,
        })
    }
}

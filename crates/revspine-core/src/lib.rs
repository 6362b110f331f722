//! RevSpine Core Library
//!
//! Deterministic revenue reconciliation: CRM bookings against billing
//! reality, classified by root cause. The engine is a five-stage pipeline
//! over a session-scoped SQLite store:
//! - Ingestion of the six validated CSV tables into typed rowsets
//! - Identity resolution (the account/customer crosswalk) with operator
//!   arbitration of fuzzy matches
//! - Lifecycle expansion into day-count prorated monthly revenue segments
//! - Invoice and credit-note allocation, per-segment variance
//!   classification, exclusion bookkeeping
//! - Structural integrity scoring and revenue-at-risk rollups
//!
//! No RNG, no wall-clock in the math: identical inputs and decision logs
//! produce identical artifacts.

pub mod db;
pub mod error;
pub mod export;
pub mod identity;
pub mod ingest;
pub mod lifecycle;
pub mod models;
pub mod pipeline;
pub mod reconcile;
pub mod rollup;
pub mod scoring;
pub mod session;
pub mod utils;
pub mod validate;

pub use db::{ArtifactKind, Database};
pub use error::{Error, Result};
pub use identity::{IdentityLink, IdentityOutcome, IdentitySummary, MatchCandidate, MatchType};
pub use lifecycle::RevenueSegment;
pub use models::{
    Exclusion, InvoiceStatus, ReasonCode, ReviewDecision, SegmentStatus, Session, SessionStatus,
    Settings, TableKind,
};
pub use pipeline::CancelFlag;
pub use reconcile::SegmentVariance;
pub use rollup::{AccountSummary, LineageStatus};
pub use scoring::ScoreReport;
pub use session::{
    AccountFilter, AnalysisHandle, Dashboard, ExclusionView, IdentityView, Lineage, SessionService,
    StatusView, ValidationOutput,
};
pub use validate::{ValidationIssue, ValidationReport};

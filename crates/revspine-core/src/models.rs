//! Domain models for RevSpine
//!
//! Input rows mirror the six canonical CSV tables. Everything derived from
//! them lives next to the stage that produces it (identity, lifecycle,
//! reconcile, rollup, scoring); this module keeps the shared vocabulary:
//! statuses, reason codes, session records, and settings.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Source system tag carried on CRM-side rows.
pub const SOURCE_CRM: &str = "CRM";
/// Source system tag carried on billing-side rows.
pub const SOURCE_BILLING: &str = "Billing";

// ========== Input rows ==========

/// CRM-side account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRow {
    pub account_id: String,
    pub account_name: String,
    pub email_domain: Option<String>,
}

/// Billing-side customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRow {
    pub customer_id: String,
    pub customer_name: String,
    pub email_domain: Option<String>,
}

/// One step of a ramp schedule: the MRR in force from `effective_date` on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RampStep {
    pub effective_date: NaiveDate,
    pub mrr: f64,
}

/// CRM-side booking. The interval [start_date, end_date] is inclusive on
/// both ends; a missing end_date means the subscription is open-ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRow {
    pub subscription_id: String,
    pub account_id: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub mrr: f64,
    #[serde(default)]
    pub ramp_schedule: Vec<RampStep>,
}

/// Billing document covering [period_start, period_end], both inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRow {
    pub invoice_id: String,
    pub customer_id: String,
    pub subscription_id: Option<String>,
    pub invoice_date: NaiveDate,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub amount: f64,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Paid,
    Unpaid,
    Partial,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Unpaid => "unpaid",
            Self::Partial => "partial",
            Self::Void => "void",
        }
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "paid" => Ok(Self::Paid),
            "unpaid" => Ok(Self::Unpaid),
            "partial" => Ok(Self::Partial),
            "void" => Ok(Self::Void),
            _ => Err(format!(
                "Invalid invoice status '{}'. Allowed: paid, unpaid, partial, void",
                s
            )),
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRow {
    pub payment_id: String,
    pub invoice_id: String,
    pub payment_date: NaiveDate,
    pub amount: f64,
}

/// Credit document. A present `invoice_id` links the credit to that
/// invoice; otherwise the credit stands alone and is placed by its
/// `credit_date` month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditNoteRow {
    pub credit_note_id: String,
    pub customer_id: String,
    pub invoice_id: Option<String>,
    pub credit_date: NaiveDate,
    pub amount: f64,
    #[serde(default)]
    pub reason: String,
}

/// The six input tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TableKind {
    Accounts,
    Customers,
    Subscriptions,
    Invoices,
    Payments,
    CreditNotes,
}

impl TableKind {
    pub const ALL: [TableKind; 6] = [
        Self::Accounts,
        Self::Customers,
        Self::Subscriptions,
        Self::Invoices,
        Self::Payments,
        Self::CreditNotes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Customers => "customers",
            Self::Subscriptions => "subscriptions",
            Self::Invoices => "invoices",
            Self::Payments => "payments",
            Self::CreditNotes => "credit_notes",
        }
    }

    /// Columns that must be present and non-empty on every row.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Accounts => &["account_id", "account_name"],
            Self::Customers => &["customer_id", "customer_name"],
            Self::Subscriptions => &["subscription_id", "account_id", "start_date", "mrr"],
            Self::Invoices => &[
                "invoice_id",
                "customer_id",
                "invoice_date",
                "period_start",
                "period_end",
                "amount",
                "status",
            ],
            Self::Payments => &["payment_id", "invoice_id", "payment_date", "amount"],
            Self::CreditNotes => &["credit_note_id", "customer_id", "credit_date", "amount"],
        }
    }

    pub fn primary_key(&self) -> &'static str {
        match self {
            Self::Accounts => "account_id",
            Self::Customers => "customer_id",
            Self::Subscriptions => "subscription_id",
            Self::Invoices => "invoice_id",
            Self::Payments => "payment_id",
            Self::CreditNotes => "credit_note_id",
        }
    }

    /// Tables the analysis can proceed without.
    pub fn optional(&self) -> bool {
        matches!(self, Self::Payments | Self::CreditNotes)
    }
}

impl std::str::FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "accounts" => Ok(Self::Accounts),
            "customers" => Ok(Self::Customers),
            "subscriptions" => Ok(Self::Subscriptions),
            "invoices" => Ok(Self::Invoices),
            "payments" => Ok(Self::Payments),
            "credit_notes" => Ok(Self::CreditNotes),
            _ => Err(format!(
                "Unknown table '{}'. Allowed: accounts, customers, subscriptions, invoices, payments, credit_notes",
                s
            )),
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ========== Shared analysis vocabulary ==========

/// Per-segment reconciliation verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentStatus {
    #[serde(rename = "CLEAN")]
    Clean,
    #[serde(rename = "MISSING_INVOICE")]
    MissingInvoice,
    #[serde(rename = "UNDER_BILLED")]
    UnderBilled,
    #[serde(rename = "OVER_BILLED")]
    OverBilled,
    #[serde(rename = "UNPAID_AR")]
    UnpaidAr,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "CLEAN",
            Self::MissingInvoice => "MISSING_INVOICE",
            Self::UnderBilled => "UNDER_BILLED",
            Self::OverBilled => "OVER_BILLED",
            Self::UnpaidAr => "UNPAID_AR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Tie-break rank for choosing an account's primary variance type.
    /// Higher wins.
    pub fn priority(&self) -> u8 {
        match self {
            Self::MissingInvoice => 5,
            Self::UnpaidAr => 4,
            Self::UnderBilled => 3,
            Self::OverBilled => 2,
            Self::Unknown => 1,
            Self::Clean => 0,
        }
    }
}

impl std::str::FromStr for SegmentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "CLEAN" => Ok(Self::Clean),
            "MISSING_INVOICE" => Ok(Self::MissingInvoice),
            "UNDER_BILLED" => Ok(Self::UnderBilled),
            "OVER_BILLED" => Ok(Self::OverBilled),
            "UNPAID_AR" => Ok(Self::UnpaidAr),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!("Unknown variance status: {}", s)),
        }
    }
}

impl std::fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a record was refused by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    #[serde(rename = "UNSUPPORTED_STRUCTURE")]
    UnsupportedStructure,
    #[serde(rename = "ALLOCATION_AMBIGUOUS")]
    AllocationAmbiguous,
    #[serde(rename = "CREDIT_NOTE_UNALLOCATED")]
    CreditNoteUnallocated,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedStructure => "UNSUPPORTED_STRUCTURE",
            Self::AllocationAmbiguous => "ALLOCATION_AMBIGUOUS",
            Self::CreditNoteUnallocated => "CREDIT_NOTE_UNALLOCATED",
        }
    }
}

impl std::str::FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "UNSUPPORTED_STRUCTURE" => Ok(Self::UnsupportedStructure),
            "ALLOCATION_AMBIGUOUS" => Ok(Self::AllocationAmbiguous),
            "CREDIT_NOTE_UNALLOCATED" => Ok(Self::CreditNoteUnallocated),
            _ => Err(format!("Unknown reason code: {}", s)),
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A record the engine refused to process. The exclusion log is append-only
/// within a run; every refused record shows up here exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exclusion {
    /// "subscription", "invoice", "credit_note" or "payment"
    pub record_type: String,
    pub record_id: String,
    pub reason_code: ReasonCode,
    pub description: String,
    pub excluded_at: DateTime<Utc>,
}

impl Exclusion {
    pub fn new(record_type: &str, record_id: &str, reason_code: ReasonCode, description: String) -> Self {
        Self {
            record_type: record_type.to_string(),
            record_id: record_id.to_string(),
            reason_code,
            description,
            excluded_at: Utc::now(),
        }
    }
}

/// How an amount landed on a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMethod {
    Exact,
    Proportional,
    Standalone,
}

impl AllocationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Proportional => "proportional",
            Self::Standalone => "standalone",
        }
    }
}

// ========== Session records ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    IdentityReview,
    Processing,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::IdentityReview => "identity_review",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "identity_review" => Ok(Self::IdentityReview),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session settings. Unknown keys are rejected at the deserialization
/// boundary; `currency` is display-only and never enters the arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_currency")]
    pub currency: String,
    /// First month of the reporting period, `YYYY-MM` (inclusive)
    #[serde(default = "default_period_start")]
    pub period_start: String,
    /// Last month of the reporting period, `YYYY-MM` (inclusive)
    #[serde(default = "default_period_end")]
    pub period_end: String,
    /// Absolute-dollar variance tolerance (τ in the classification table)
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_period_start() -> String {
    "2024-01".to_string()
}

fn default_period_end() -> String {
    "2024-12".to_string()
}

fn default_tolerance() -> f64 {
    1.0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            period_start: default_period_start(),
            period_end: default_period_end(),
            tolerance: default_tolerance(),
        }
    }
}

/// Operator verdict on a fuzzy match candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Confirmed,
    Rejected,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ReviewDecision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!(
                "Invalid decision '{}'. Allowed: confirmed, rejected",
                s
            )),
        }
    }
}

/// One entry of the append-only identity decision log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub match_id: String,
    pub decision: ReviewDecision,
    pub decided_at: DateTime<Utc>,
}

/// Audit trail of arbitration actions (decide/undo/reset)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    pub match_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Running,
    Complete,
}

/// Per-stage progress record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepState,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub step: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Monotonic progress of a background analysis. Readers always see a
/// consistent prefix because the whole record is written in one document
/// update per step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub current_step: Option<String>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepRecord>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub rows: usize,
    pub filename: String,
}

/// One analysis session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub settings: Settings,
    #[serde(default)]
    pub uploads: BTreeMap<String, UploadRecord>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub processing: ProcessingStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

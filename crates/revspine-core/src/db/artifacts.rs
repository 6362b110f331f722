//! Derived-artifact storage
//!
//! Each pipeline stage persists its whole output as one JSON document under
//! `(session_id, kind)`. A stage's artifact is either absent or complete;
//! there is no partial publish.

use chrono::Utc;
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Database;
use crate::error::{Error, Result};
use crate::models::TableKind;

/// Storage keys for session artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    AccountsRaw,
    CustomersRaw,
    SubscriptionsRaw,
    InvoicesRaw,
    PaymentsRaw,
    CreditNotesRaw,
    Identity,
    Spine,
    Segments,
    Reconciliation,
    AccountSummaries,
    Score,
    Exclusions,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountsRaw => "accounts_raw",
            Self::CustomersRaw => "customers_raw",
            Self::SubscriptionsRaw => "subscriptions_raw",
            Self::InvoicesRaw => "invoices_raw",
            Self::PaymentsRaw => "payments_raw",
            Self::CreditNotesRaw => "credit_notes_raw",
            Self::Identity => "identity",
            Self::Spine => "spine",
            Self::Segments => "segments",
            Self::Reconciliation => "reconciliation",
            Self::AccountSummaries => "account_summaries",
            Self::Score => "score",
            Self::Exclusions => "exclusions",
        }
    }

    /// The raw-rows artifact backing an input table
    pub fn raw_for(table: TableKind) -> Self {
        match table {
            TableKind::Accounts => Self::AccountsRaw,
            TableKind::Customers => Self::CustomersRaw,
            TableKind::Subscriptions => Self::SubscriptionsRaw,
            TableKind::Invoices => Self::InvoicesRaw,
            TableKind::Payments => Self::PaymentsRaw,
            TableKind::CreditNotes => Self::CreditNotesRaw,
        }
    }

    /// Everything a fresh analysis run recomputes
    pub const DERIVED: [ArtifactKind; 6] = [
        Self::Spine,
        Self::Segments,
        Self::Reconciliation,
        Self::AccountSummaries,
        Self::Score,
        Self::Exclusions,
    ];
}

impl Database {
    /// Store an artifact, replacing any previous document of the same kind
    pub fn put_artifact<T: Serialize>(
        &self,
        session_id: &str,
        kind: ArtifactKind,
        value: &T,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO session_data (session_id, kind, payload, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_id, kind) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
            params![
                session_id,
                kind.as_str(),
                serde_json::to_string(value)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Load an artifact if present
    pub fn get_artifact<T: DeserializeOwned>(
        &self,
        session_id: &str,
        kind: ArtifactKind,
    ) -> Result<Option<T>> {
        let conn = self.conn()?;
        let result: rusqlite::Result<String> = conn.query_row(
            "SELECT payload FROM session_data WHERE session_id = ? AND kind = ?",
            params![session_id, kind.as_str()],
            |row| row.get(0),
        );

        match result {
            Ok(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Load an artifact that must exist at this point of the session
    pub fn require_artifact<T: DeserializeOwned>(
        &self,
        session_id: &str,
        kind: ArtifactKind,
    ) -> Result<T> {
        self.get_artifact(session_id, kind)?.ok_or_else(|| {
            Error::NotFound(format!("{} for session {}", kind.as_str(), session_id))
        })
    }

    /// Drop the derived artifacts of a prior run
    pub fn clear_derived_artifacts(&self, session_id: &str) -> Result<()> {
        let conn = self.conn()?;
        for kind in ArtifactKind::DERIVED {
            conn.execute(
                "DELETE FROM session_data WHERE session_id = ? AND kind = ?",
                params![session_id, kind.as_str()],
            )?;
        }
        Ok(())
    }
}

//! Session record operations

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rusqlite::params;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{
    Decision, HistoryEntry, ProcessingStatus, Session, SessionStatus, Settings, UploadRecord,
};

fn next_session_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("rs-{:x}-{:02x}", Utc::now().timestamp_millis(), n & 0xff)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Session, [String; 5])> {
    let id: String = row.get(0)?;
    let status_str: String = row.get(1)?;
    let settings_json: String = row.get(2)?;
    let uploads_json: String = row.get(3)?;
    let decisions_json: String = row.get(4)?;
    let history_json: String = row.get(5)?;
    let processing_json: String = row.get(6)?;
    let created_at_str: String = row.get(7)?;
    let completed_at_str: Option<String> = row.get(8)?;

    let session = Session {
        id,
        status: status_str.parse().unwrap_or(SessionStatus::Created),
        settings: Settings::default(),
        uploads: BTreeMap::new(),
        decisions: Vec::new(),
        history: Vec::new(),
        processing: ProcessingStatus::default(),
        created_at: parse_datetime(&created_at_str),
        completed_at: completed_at_str.map(|s| parse_datetime(&s)),
    };
    Ok((
        session,
        [
            settings_json,
            uploads_json,
            decisions_json,
            history_json,
            processing_json,
        ],
    ))
}

fn hydrate(pair: (Session, [String; 5])) -> Result<Session> {
    let (mut session, [settings, uploads, decisions, history, processing]) = pair;
    session.settings = serde_json::from_str(&settings)?;
    session.uploads = serde_json::from_str(&uploads)?;
    session.decisions = serde_json::from_str(&decisions)?;
    session.history = serde_json::from_str(&history)?;
    session.processing = serde_json::from_str(&processing).unwrap_or_default();
    Ok(session)
}

const SELECT_SESSION: &str = r#"
    SELECT id, status, settings, uploads, decisions, history, processing, created_at, completed_at
    FROM sessions
"#;

impl Database {
    /// Create a new session with the given settings
    pub fn create_session(&self, settings: &Settings) -> Result<Session> {
        let conn = self.conn()?;
        let id = next_session_id();
        let now = Utc::now();

        conn.execute(
            r#"
            INSERT INTO sessions (id, status, settings, processing, created_at)
            VALUES (?, 'created', ?, '{}', ?)
            "#,
            params![id, serde_json::to_string(settings)?, now.to_rfc3339()],
        )?;

        self.get_session(&id)
    }

    /// Fetch a session by id
    pub fn get_session(&self, id: &str) -> Result<Session> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!("{} WHERE id = ?", SELECT_SESSION),
            params![id],
            row_to_session,
        );

        match result {
            Ok(pair) => hydrate(pair),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(Error::NotFound(format!("Session {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// List all sessions, newest first
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY created_at DESC", SELECT_SESSION))?;

        let pairs = stmt
            .query_map([], row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        pairs.into_iter().map(hydrate).collect()
    }

    pub fn update_session_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sessions SET status = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Session {}", id)));
        }
        Ok(())
    }

    pub fn update_session_settings(&self, id: &str, settings: &Settings) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET settings = ? WHERE id = ?",
            params![serde_json::to_string(settings)?, id],
        )?;
        Ok(())
    }

    pub fn record_upload(&self, id: &str, table: &str, upload: &UploadRecord) -> Result<()> {
        let mut session = self.get_session(id)?;
        session.uploads.insert(table.to_string(), upload.clone());

        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET uploads = ? WHERE id = ?",
            params![serde_json::to_string(&session.uploads)?, id],
        )?;
        Ok(())
    }

    /// Replace the decision log and audit trail in one write
    pub fn save_decisions(
        &self,
        id: &str,
        decisions: &[Decision],
        history: &[HistoryEntry],
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET decisions = ?, history = ? WHERE id = ?",
            params![
                serde_json::to_string(decisions)?,
                serde_json::to_string(history)?,
                id
            ],
        )?;
        Ok(())
    }

    /// Replace the whole processing record (single-document update)
    pub fn save_processing(&self, id: &str, processing: &ProcessingStatus) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET processing = ? WHERE id = ?",
            params![serde_json::to_string(processing)?, id],
        )?;
        Ok(())
    }

    pub fn mark_session_completed(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET status = 'completed', completed_at = ? WHERE id = ?",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Flip the session into the `error` terminal state, recording the cause
    pub fn mark_session_error(&self, id: &str, message: &str) -> Result<()> {
        let mut processing = self.get_session(id)?.processing;
        processing.error = Some(message.to_string());

        let conn = self.conn()?;
        conn.execute(
            "UPDATE sessions SET status = 'error', processing = ? WHERE id = ?",
            params![serde_json::to_string(&processing)?, id],
        )?;
        Ok(())
    }
}

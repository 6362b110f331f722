//! Session store: pooled SQLite with in-process migrations
//!
//! Two tables back the whole engine:
//! - `sessions` - one row per analysis session (status, settings, decision
//!   log, processing record), JSON columns for the structured parts
//! - `session_data` - derived artifacts keyed by `(session_id, kind)`,
//!   one JSON document per stage output
//!
//! Stages publish their output with a single document write, so readers
//! polling a session always observe a consistent prefix of the pipeline.

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::Result;

mod artifacts;
mod sessions;


pub use artifacts::ArtifactKind;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Parse a stored RFC 3339 timestamp, falling back to now on corruption
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
}

impl Database {
    /// Open (or create) the database at `path` and run migrations
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(8).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Create a throwaway database for tests.
    ///
    /// Uses a temporary file rather than `:memory:` because every pooled
    /// connection must see the same database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("revspine_test_{}_{}.db", std::process::id(), id));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);
        Self::new(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Path of the backing database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- WAL mode: status polling reads don't block the worker's writes
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Analysis sessions
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'created',
                settings TEXT NOT NULL,                -- JSON Settings
                uploads TEXT NOT NULL DEFAULT '{}',    -- JSON map table -> UploadRecord
                decisions TEXT NOT NULL DEFAULT '[]',  -- JSON append-only decision log
                history TEXT NOT NULL DEFAULT '[]',    -- JSON arbitration audit trail
                processing TEXT NOT NULL DEFAULT '{}', -- JSON ProcessingStatus
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

            -- Derived artifacts, one JSON document per (session, kind)
            CREATE TABLE IF NOT EXISTS session_data (
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (session_id, kind)
            );
            "#,
        )?;

        info!(path = %self.db_path, "Database ready");
        Ok(())
    }
}

//! SQLite sink implementation
//!
//! This module provides a durable, SQLite-based implementation of the Sink
//! trait, plus the run bookkeeping and read-back queries used by the CLI.

use crate::output::RunSummary;
use crate::sink::schema::initialize_schema;
use crate::sink::traits::{Sink, SinkError, SinkResult};
use crate::sink::{validate_artifact_key, Artifact, FieldValue, Record};
use crate::state::RunState;
use chrono::Utc;
use rusqlite::{ffi, params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A harvest run as stored in the `runs` table
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub state: RunState,
    pub pages_fetched: u64,
    pub records_pushed: u64,
    pub artifacts_stored: u64,
}

struct SqliteInner {
    conn: Connection,
    run_id: Option<i64>,
}

/// SQLite sink backend
///
/// The connection sits behind a mutex so concurrent workers serialize
/// their writes.
pub struct SqliteSink {
    inner: Mutex<SqliteInner>,
}

impl SqliteSink {
    /// Opens or creates a sink database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteSink)` - Successfully opened/created database
    /// * `Err(SinkError)` - Failed to open database
    pub fn new(path: &Path) -> SinkResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> SinkResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            inner: Mutex::new(SqliteInner { conn, run_id: None }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Run Management =====

    /// Starts a new run; records and artifacts stored afterwards are tagged with it
    pub fn begin_run(&self, config_hash: &str) -> SinkResult<i64> {
        let mut inner = self.lock();
        let now = Utc::now().to_rfc3339();
        inner.conn.execute(
            "INSERT INTO runs (started_at, config_hash, state) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunState::Running.to_db_string()],
        )?;

        let run_id = inner.conn.last_insert_rowid();
        inner.run_id = Some(run_id);
        Ok(run_id)
    }

    /// Stores the terminal state and counters of a run
    pub fn finish_run(&self, run_id: i64, summary: &RunSummary) -> SinkResult<()> {
        let mut inner = self.lock();
        let now = Utc::now().to_rfc3339();
        inner.conn.execute(
            "UPDATE runs SET finished_at = ?1, state = ?2, pages_fetched = ?3,
             pages_failed = ?4, pages_skipped = ?5, records_pushed = ?6,
             artifacts_stored = ?7, sink_errors = ?8
             WHERE id = ?9",
            params![
                now,
                summary.state.to_db_string(),
                summary.pages_fetched as i64,
                summary.pages_failed as i64,
                summary.pages_skipped as i64,
                summary.records_pushed as i64,
                summary.artifacts_stored as i64,
                summary.sink_errors as i64,
                run_id,
            ],
        )?;

        if inner.run_id == Some(run_id) {
            inner.run_id = None;
        }
        Ok(())
    }

    /// Closes a run that ended without a summary, leaving its counters at zero
    pub fn abort_run(&self, run_id: i64) -> SinkResult<()> {
        self.finish_run(
            run_id,
            &RunSummary {
                state: RunState::Aborted,
                ..RunSummary::default()
            },
        )
    }

    pub fn get_run(&self, run_id: i64) -> SinkResult<Option<RunRecord>> {
        let inner = self.lock();
        let run = inner
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, state,
                 pages_fetched, records_pushed, artifacts_stored
                 FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// Most recent runs first
    pub fn recent_runs(&self, limit: usize) -> SinkResult<Vec<RunRecord>> {
        let inner = self.lock();
        let mut stmt = inner.conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, state,
             pages_fetched, records_pushed, artifacts_stored
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;

        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    // ===== Read-back =====

    pub fn count_records(&self) -> SinkResult<u64> {
        let inner = self.lock();
        let count: i64 = inner
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_artifacts(&self) -> SinkResult<u64> {
        let inner = self.lock();
        let count: i64 = inner
            .conn
            .query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_distinct_sources(&self) -> SinkResult<u64> {
        let inner = self.lock();
        let count: i64 = inner.conn.query_row(
            "SELECT COUNT(DISTINCT source_url) FROM records",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Loads every stored record in insertion order
    pub fn load_records(&self) -> SinkResult<Vec<Record>> {
        let inner = self.lock();
        let mut stmt = inner
            .conn
            .prepare("SELECT source_url, fields FROM records ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (source_url, fields_json) = row?;
            records.push(decode_record(source_url, &fields_json)?);
        }
        Ok(records)
    }

    pub fn get_artifact(&self, key: &str) -> SinkResult<Option<Artifact>> {
        let inner = self.lock();
        let artifact = inner
            .conn
            .query_row(
                "SELECT key, bytes, content_type FROM artifacts WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Artifact {
                        key: row.get(0)?,
                        bytes: row.get(1)?,
                        content_type: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(artifact)
    }
}

impl Sink for SqliteSink {
    fn push_records(&self, records: &[Record]) -> SinkResult<()> {
        let mut inner = self.lock();
        let run_id = inner.run_id;
        let now = Utc::now().to_rfc3339();

        let tx = inner.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO records (run_id, source_url, fields, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;

            for record in records {
                let fields = serde_json::to_string(&record.fields)?;
                stmt.execute(params![run_id, record.source_url, fields, now])?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    fn put_artifact(&self, key: &str, bytes: &[u8], content_type: &str) -> SinkResult<()> {
        validate_artifact_key(key)?;

        let inner = self.lock();
        let now = Utc::now().to_rfc3339();
        let result = inner.conn.execute(
            "INSERT INTO artifacts (key, run_id, content_type, bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, inner.run_id, content_type, bytes, now],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if is_key_conflict(&e) => {
                Err(SinkError::DuplicateKey(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// True for a primary key or unique violation; other constraint failures stay errors
fn is_key_conflict(error: &ffi::Error) -> bool {
    error.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        || error.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        state: RunState::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunState::Aborted),
        pages_fetched: row.get::<_, i64>(5)? as u64,
        records_pushed: row.get::<_, i64>(6)? as u64,
        artifacts_stored: row.get::<_, i64>(7)? as u64,
    })
}

fn decode_record(source_url: String, fields_json: &str) -> SinkResult<Record> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(fields_json)?;
    let fields: BTreeMap<String, FieldValue> = map
        .iter()
        .map(|(name, value)| (name.clone(), FieldValue::from_json(value)))
        .collect();
    Ok(Record { source_url, fields })
}

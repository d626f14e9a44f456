use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::models::*;

/// Async-safe handle to the engine database.
///
/// Wraps `KaizenDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking pool via `spawn_blocking`, so SQLite I/O never runs on an
/// async worker thread.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<KaizenDb>>,
}

impl DbHandle {
    pub fn new(db: KaizenDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(KaizenDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&KaizenDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, KaizenDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct KaizenDb {
    conn: Connection,
}

impl KaizenDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    scope TEXT NOT NULL,
                    mode TEXT NOT NULL,
                    max_iterations INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    attempted INTEGER NOT NULL DEFAULT 0,
                    succeeded INTEGER NOT NULL DEFAULT 0,
                    failed INTEGER NOT NULL DEFAULT 0,
                    iterations_run INTEGER NOT NULL DEFAULT 0,
                    errors TEXT NOT NULL DEFAULT '[]',
                    current_iteration TEXT,
                    started_at TEXT NOT NULL,
                    finished_at TEXT
                );

                CREATE TABLE IF NOT EXISTS iterations (
                    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                    number INTEGER NOT NULL,
                    outcome TEXT NOT NULL,
                    success INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    PRIMARY KEY (session_id, number)
                );

                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    scope TEXT NOT NULL,
                    status TEXT NOT NULL,
                    file_path TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    archived INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_scope ON sessions(scope, status);
                CREATE INDEX IF NOT EXISTS idx_jobs_scope ON jobs(scope, archived);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub fn insert_session(&self, session: &Session) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (id, scope, mode, max_iterations, status, attempted, succeeded,
                    failed, iterations_run, errors, current_iteration, started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    session.id,
                    session.scope,
                    session.mode.as_str(),
                    session.max_iterations,
                    session.status.as_str(),
                    session.attempted,
                    session.succeeded,
                    session.failed,
                    session.iterations_run,
                    serde_json::to_string(&session.errors)?,
                    session
                        .current_iteration
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    session.started_at.to_rfc3339(),
                    session.finished_at.map(|t| t.to_rfc3339()),
                ],
            )
            .context("Failed to insert session")?;
        Ok(())
    }

    pub fn update_session(&self, session: &Session) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE sessions SET status = ?2, attempted = ?3, succeeded = ?4, failed = ?5,
                    iterations_run = ?6, errors = ?7, current_iteration = ?8, finished_at = ?9
                 WHERE id = ?1",
                params![
                    session.id,
                    session.status.as_str(),
                    session.attempted,
                    session.succeeded,
                    session.failed,
                    session.iterations_run,
                    serde_json::to_string(&session.errors)?,
                    session
                        .current_iteration
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    session.finished_at.map(|t| t.to_rfc3339()),
                ],
            )
            .context("Failed to update session")?;
        if changed == 0 {
            anyhow::bail!("Session {} not found for update", session.id);
        }
        Ok(())
    }

    /// Publish the live snapshot without touching the counters.
    pub fn update_current_iteration(
        &self,
        session_id: &str,
        current: Option<&CurrentIteration>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sessions SET current_iteration = ?2 WHERE id = ?1",
                params![session_id, current.map(serde_json::to_string).transpose()?],
            )
            .context("Failed to update current iteration")?;
        Ok(())
    }

    const SESSION_COLUMNS: &'static str = "id, scope, mode, max_iterations, status, attempted, succeeded, failed,
        iterations_run, errors, current_iteration, started_at, finished_at";

    fn map_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
        Ok(SessionRow {
            id: row.get(0)?,
            scope: row.get(1)?,
            mode: row.get(2)?,
            max_iterations: row.get(3)?,
            status: row.get(4)?,
            attempted: row.get(5)?,
            succeeded: row.get(6)?,
            failed: row.get(7)?,
            iterations_run: row.get(8)?,
            errors: row.get(9)?,
            current_iteration: row.get(10)?,
            started_at: row.get(11)?,
            finished_at: row.get(12)?,
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", Self::SESSION_COLUMNS);
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare get_session")?;
        let mut rows = stmt
            .query_map(params![id], Self::map_session_row)
            .context("Failed to query session")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read session row")?.into_session()?)),
            None => Ok(None),
        }
    }

    /// Sessions newest first, optionally limited to one scope.
    pub fn list_sessions(&self, scope: Option<&str>) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE (?1 IS NULL OR scope = ?1) ORDER BY started_at DESC",
            Self::SESSION_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_sessions")?;
        let rows = stmt
            .query_map(params![scope], Self::map_session_row)
            .context("Failed to query sessions")?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.context("Failed to read session row")?.into_session()?);
        }
        Ok(sessions)
    }

    /// Mark sessions still `running` from a previous process as failed.
    pub fn fail_stale_sessions(&self, reason: &str) -> Result<Vec<String>> {
        let stale: Vec<Session> = self
            .list_sessions(None)?
            .into_iter()
            .filter(Session::is_running)
            .collect();
        let mut ids = Vec::new();
        for mut session in stale {
            session.status = SessionStatus::Failed;
            session.errors.push(reason.to_string());
            session.current_iteration = None;
            session.finished_at = Some(Utc::now());
            self.update_session(&session)?;
            ids.push(session.id);
        }
        Ok(ids)
    }

    /// Move a session out of `running` if it is still there. Returns the
    /// updated session, or `None` when another writer finalized it first.
    pub fn finish_running_session(
        &self,
        id: &str,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<Option<Session>> {
        let Some(mut session) = self.get_session(id)? else {
            return Ok(None);
        };
        if !session.is_running() {
            return Ok(None);
        }
        session.status = status;
        if let Some(error) = error {
            session.errors.push(error.to_string());
        }
        session.current_iteration = None;
        session.finished_at = Some(Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE sessions SET status = ?2, errors = ?3, current_iteration = NULL, finished_at = ?4
                 WHERE id = ?1 AND status = 'running'",
                params![
                    session.id,
                    session.status.as_str(),
                    serde_json::to_string(&session.errors)?,
                    session.finished_at.map(|t| t.to_rfc3339()),
                ],
            )
            .context("Failed to finish session")?;
        Ok((changed > 0).then_some(session))
    }

    // ── Iterations ────────────────────────────────────────────────────

    /// Append an iteration and the updated session rollup atomically.
    pub fn record_iteration(&self, iteration: &Iteration, session: &Session) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO iterations (session_id, number, outcome, success, payload, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                iteration.session_id,
                iteration.number,
                iteration.outcome.as_str(),
                iteration.success,
                serde_json::to_string(iteration)?,
                iteration.timestamp.to_rfc3339(),
            ],
        )
        .with_context(|| {
            format!(
                "Failed to insert iteration {} of session {}",
                iteration.number, iteration.session_id
            )
        })?;
        self.update_session(session)?;
        tx.commit().context("Failed to commit iteration")?;
        Ok(())
    }

    pub fn list_iterations(&self, session_id: &str) -> Result<Vec<Iteration>> {
        self.query_iterations(
            "SELECT payload FROM iterations WHERE session_id = ?1 ORDER BY number",
            Some(session_id),
        )
    }

    pub fn list_all_iterations(&self) -> Result<Vec<Iteration>> {
        self.query_iterations(
            "SELECT payload FROM iterations WHERE ?1 IS NULL ORDER BY session_id, number",
            None,
        )
    }

    fn query_iterations(&self, sql: &str, session_id: Option<&str>) -> Result<Vec<Iteration>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare iteration query")?;
        let rows = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))
            .context("Failed to query iterations")?;
        let mut iterations = Vec::new();
        for row in rows {
            let payload = row.context("Failed to read iteration row")?;
            iterations.push(
                serde_json::from_str(&payload).context("Failed to decode iteration payload")?,
            );
        }
        Ok(iterations)
    }

    // ── Jobs ──────────────────────────────────────────────────────────

    pub fn insert_job(&self, job: &ImprovementJob) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO jobs (id, scope, status, file_path, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    job.id,
                    job.scope,
                    job.status.as_str(),
                    job.file_path,
                    serde_json::to_string(job)?,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert job")?;
        Ok(())
    }

    pub fn update_job(&self, job: &ImprovementJob) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?2, payload = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    job.id,
                    job.status.as_str(),
                    serde_json::to_string(job)?,
                    job.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to update job")?;
        if changed == 0 {
            anyhow::bail!("Job {} not found for update", job.id);
        }
        Ok(())
    }

    /// Write `job` only if the stored row is still in `expected` and not
    /// archived. Returns false when the row moved on.
    pub fn update_job_from(&self, job: &ImprovementJob, expected: JobStatus) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?2, payload = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = ?5 AND archived = 0",
                params![
                    job.id,
                    job.status.as_str(),
                    serde_json::to_string(job)?,
                    job.updated_at.to_rfc3339(),
                    expected.as_str(),
                ],
            )
            .context("Failed to update job")?;
        Ok(changed > 0)
    }

    /// Fetch a job that has not been cleaned up.
    pub fn get_job(&self, id: &str) -> Result<Option<ImprovementJob>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM jobs WHERE id = ?1 AND archived = 0")
            .context("Failed to prepare get_job")?;
        let mut rows = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .context("Failed to query job")?;
        match rows.next() {
            Some(row) => {
                let payload = row.context("Failed to read job row")?;
                Ok(Some(
                    serde_json::from_str(&payload).context("Failed to decode job payload")?,
                ))
            }
            None => Ok(None),
        }
    }

    pub fn list_jobs(&self, scope: Option<&str>) -> Result<Vec<ImprovementJob>> {
        self.query_jobs(
            "SELECT payload FROM jobs WHERE archived = 0 AND (?1 IS NULL OR scope = ?1)
             ORDER BY created_at, id",
            scope,
        )
    }

    /// Every job ever created, including cleaned-up ones.
    pub fn list_job_history(&self) -> Result<Vec<ImprovementJob>> {
        self.query_jobs(
            "SELECT payload FROM jobs WHERE ?1 IS NULL ORDER BY created_at, id",
            None,
        )
    }

    fn query_jobs(&self, sql: &str, scope: Option<&str>) -> Result<Vec<ImprovementJob>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("Failed to prepare job query")?;
        let rows = stmt
            .query_map(params![scope], |row| row.get::<_, String>(0))
            .context("Failed to query jobs")?;
        let mut jobs = Vec::new();
        for row in rows {
            let payload = row.context("Failed to read job row")?;
            jobs.push(serde_json::from_str(&payload).context("Failed to decode job payload")?);
        }
        Ok(jobs)
    }

    /// Hide a job from active listings. Returns false if it was unknown.
    pub fn archive_job(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET archived = 1, updated_at = ?2 WHERE id = ?1 AND archived = 0",
                params![id, Utc::now().to_rfc3339()],
            )
            .context("Failed to archive job")?;
        Ok(changed > 0)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

struct SessionRow {
    id: String,
    scope: String,
    mode: String,
    max_iterations: u32,
    status: String,
    attempted: u32,
    succeeded: u32,
    failed: u32,
    iterations_run: u32,
    errors: String,
    current_iteration: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        Ok(Session {
            mode: Mode::from_str(&self.mode).map_err(|e| anyhow::anyhow!(e))?,
            status: SessionStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?,
            errors: serde_json::from_str(&self.errors).context("Failed to decode errors")?,
            current_iteration: self
                .current_iteration
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("Failed to decode current iteration")?,
            started_at: parse_timestamp(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_timestamp).transpose()?,
            id: self.id,
            scope: self.scope,
            max_iterations: self.max_iterations,
            attempted: self.attempted,
            succeeded: self.succeeded,
            failed: self.failed,
            iterations_run: self.iterations_run,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp '{}'", s))?
        .with_timezone(&Utc))
}

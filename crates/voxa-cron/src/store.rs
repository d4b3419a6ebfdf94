//! SQLite-backed task storage.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::{ScheduledTask, TaskStatus};

/// Maximum stored length of `last_result`, in characters.
const MAX_RESULT_CHARS: usize = 500;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS scheduled_tasks (
        id             TEXT PRIMARY KEY,
        name           TEXT NOT NULL,
        schedule_type  TEXT NOT NULL
                       CHECK(schedule_type IN ('cron', 'interval', 'once')),
        schedule_value TEXT NOT NULL,
        action_type    TEXT NOT NULL
                       CHECK(action_type IN ('plugin', 'speak')),
        action_payload TEXT NOT NULL,
        next_run       TEXT,
        last_run       TEXT,
        last_result    TEXT,
        status         TEXT NOT NULL DEFAULT 'active'
                       CHECK(status IN ('active', 'paused', 'completed')),
        created_at     TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_status_next_run
    ON scheduled_tasks (status, next_run);
";

/// Persistent storage for scheduled tasks.
///
/// A single SQLite handle behind a mutex; the foreground API and the poll
/// loop both go through it, so no row is ever observed half-written. All
/// timestamps are stored as RFC 3339 UTC text, which sorts lexically.
pub struct TaskStore {
    conn: Mutex<Option<Connection>>,
}

impl TaskStore {
    /// Open or create a task store at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!("Task store opened: {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(Error::StoreClosed)?;
        f(conn)
    }

    /// Insert a new task row with `status = 'active'`. Returns the generated
    /// id. Payload semantics are the engine's responsibility; the store takes
    /// the JSON text as given.
    pub fn add(
        &self,
        name: &str,
        schedule_type: &str,
        schedule_value: &str,
        action_type: &str,
        action_payload: &str,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scheduled_tasks
                     (id, name, schedule_type, schedule_value, action_type,
                      action_payload, next_run, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8)",
                rusqlite::params![
                    id,
                    name,
                    schedule_type,
                    schedule_value,
                    action_type,
                    action_payload,
                    next_run.map(|t| t.to_rfc3339()),
                    now.to_rfc3339(),
                ],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    /// All active tasks whose `next_run` is at or before `now`.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, schedule_type, schedule_value, action_type,
                        action_payload, next_run, last_run, last_result, status, created_at
                 FROM scheduled_tasks
                 WHERE status = 'active' AND next_run <= ?1",
            )?;
            let tasks = stmt
                .query_map(rusqlite::params![now.to_rfc3339()], row_to_task)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Record the outcome of one execution: sets `last_run` to the current
    /// time, truncates `result` to 500 characters, and writes `next_run`
    /// (a real NULL when `None`) and `status`.
    pub fn record_run(
        &self,
        id: &str,
        result: &str,
        next_run: Option<DateTime<Utc>>,
        status: TaskStatus,
    ) -> Result<()> {
        let now = Utc::now();
        let truncated: String = result.chars().take(MAX_RESULT_CHARS).collect();
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE scheduled_tasks
                 SET last_run = ?1, last_result = ?2, next_run = ?3, status = ?4
                 WHERE id = ?5",
                rusqlite::params![
                    now.to_rfc3339(),
                    truncated,
                    next_run.map(|t| t.to_rfc3339()),
                    status.as_str(),
                    id,
                ],
            )?;
            Ok(())
        })
    }

    /// Update a task's status only.
    pub fn set_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE scheduled_tasks SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.as_str(), id],
            )?;
            Ok(())
        })
    }

    /// Get a task by id.
    pub fn get(&self, id: &str) -> Result<Option<ScheduledTask>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, schedule_type, schedule_value, action_type,
                        action_payload, next_run, last_run, last_result, status, created_at
                 FROM scheduled_tasks WHERE id = ?1",
            )?;
            match stmt.query_row(rusqlite::params![id], row_to_task) {
                Ok(task) => Ok(Some(task)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Close the underlying connection. Safe to call more than once; later
    /// operations fail with [`Error::StoreClosed`].
    pub fn close(&self) {
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.take() {
            if let Err((_conn, e)) = conn.close() {
                tracing::warn!("Task store did not close cleanly: {e}");
            }
        }
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let status: String = row.get(9)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule_type: row.get(2)?,
        schedule_value: row.get(3)?,
        action_type: row.get(4)?,
        action_payload: row.get(5)?,
        next_run: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| s.parse().ok()),
        last_run: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| s.parse().ok()),
        last_result: row.get(8)?,
        // The CHECK constraint keeps this a closed set; an unknown value from
        // an out-of-band edit maps to Completed so it can never run.
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Completed),
        created_at: row
            .get::<_, String>(10)?
            .parse()
            .unwrap_or_else(|_| Utc::now()),
    })
}

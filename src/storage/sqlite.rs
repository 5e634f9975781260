//! SQLite-backed `TaskStore`.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, warn};

use super::{check_edge, Pool, StoreError, TaskStore};
use crate::model::{NewTask, RunMetrics, Task, TaskId, TaskStatus, TestResult};

const TASK_COLUMNS: &str = "id, owner_id, num_users, ramp_up, target_url, start_time, end_time, status, created_at, updated_at";

const RESULT_COLUMNS: &str = "id, test_id, tps, avg_response_time, min_response_time, max_response_time,
     success_count, failure_count, error_rate, availability, rps,
     dns_time, connect_time, ttfb, content_download_time, duration_secs, created_at";

/// Timestamps are stored as fixed-width UTC RFC 3339 so that text
/// comparison in SQL matches chronological order.
fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

/// Raw column values of a `load_tests` row, decoded after the query finishes.
struct TaskRow {
    id: i64,
    owner_id: i64,
    num_users: i64,
    ramp_up: i64,
    target_url: String,
    start_time: String,
    end_time: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            num_users: row.get(2)?,
            ramp_up: row.get(3)?,
            target_url: row.get(4)?,
            start_time: row.get(5)?,
            end_time: row.get(6)?,
            status: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_task(self) -> Result<Task, StoreError> {
        let status = self
            .status
            .parse::<TaskStatus>()
            .map_err(|e| StoreError::Corrupt(format!("task {}: {e}", self.id)))?;
        let count = |v: i64, field: &str| {
            u32::try_from(v).map_err(|_| StoreError::Corrupt(format!("task {}: {field}={v}", self.id)))
        };
        Ok(Task {
            id: self.id,
            owner_id: self.owner_id,
            num_users: count(self.num_users, "num_users")?,
            ramp_up: count(self.ramp_up, "ramp_up")?,
            target_url: self.target_url,
            scheduled_start: parse_ts(&self.start_time)?,
            scheduled_end: parse_ts(&self.end_time)?,
            status,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// Raw `test_results` row; `created_at` is decoded after the query finishes.
struct ResultRow {
    id: i64,
    task_id: TaskId,
    metrics: RunMetrics,
    rps: f64,
    duration_secs: f64,
    created_at: String,
}

impl ResultRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            metrics: RunMetrics {
                tps: row.get(2)?,
                avg_response_time: row.get(3)?,
                min_response_time: row.get(4)?,
                max_response_time: row.get(5)?,
                success_count: row.get::<_, i64>(6)?.max(0) as u64,
                failure_count: row.get::<_, i64>(7)?.max(0) as u64,
                error_rate: row.get(8)?,
                availability: row.get(9)?,
                dns_time: row.get(11)?,
                connect_time: row.get(12)?,
                ttfb: row.get(13)?,
                content_download_time: row.get(14)?,
            },
            rps: row.get(10)?,
            duration_secs: row.get(15)?,
            created_at: row.get(16)?,
        })
    }

    fn into_result(self) -> Result<TestResult, StoreError> {
        Ok(TestResult {
            id: Some(self.id),
            task_id: self.task_id,
            metrics: self.metrics,
            rps: self.rps,
            duration_secs: self.duration_secs,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

/// `TaskStore` over the shared r2d2 SQLite pool.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: Pool,
}

impl SqliteTaskStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn query_tasks(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Task>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, TaskRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        // One undecodable row must not hide the rest from the scheduler.
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match row.into_task() {
                    Ok(task) => Some(task),
                    Err(e) => {
                        warn!(task_id = id, error = %e, "skipping undecodable task row");
                        None
                    }
                }
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, mut new: NewTask) -> Result<Task, StoreError> {
        // Stored at microsecond precision; return what a later read would see.
        new.scheduled_start = new.scheduled_start.trunc_subsecs(6);
        new.scheduled_end = new.scheduled_end.trunc_subsecs(6);
        new.validate()?;
        let now = Utc::now().trunc_subsecs(6);
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO load_tests (owner_id, num_users, ramp_up, target_url, start_time, end_time, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                new.owner_id,
                new.num_users,
                new.ramp_up,
                new.target_url.trim(),
                fmt_ts(&new.scheduled_start),
                fmt_ts(&new.scheduled_end),
                TaskStatus::Pending.as_str(),
                fmt_ts(&now),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(task_id = id, owner_id = new.owner_id, "task created");

        Ok(Task {
            id,
            owner_id: new.owner_id,
            num_users: new.num_users,
            ramp_up: new.ramp_up,
            target_url: new.target_url.trim().to_string(),
            scheduled_start: new.scheduled_start,
            scheduled_end: new.scheduled_end,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM load_tests WHERE id = ?1"),
                params![id],
                TaskRow::read,
            )
            .optional()?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM load_tests WHERE status = ?1 ORDER BY start_time ASC, id ASC"),
            &[&status.as_str()],
        )
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.query_tasks(
            &format!("SELECT {TASK_COLUMNS} FROM load_tests ORDER BY start_time ASC, id ASC"),
            &[],
        )
    }

    async fn claim_task(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, StoreError> {
        check_edge(id, from, to)?;
        let conn = self.pool.get()?;
        // Single conditional UPDATE: the status guard and the write are one statement.
        let changed = conn.execute(
            "UPDATE load_tests SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![to.as_str(), fmt_ts(&Utc::now()), id, from.as_str()],
        )?;
        Ok(changed == 1)
    }

    async fn set_status(&self, id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let allowed = status
            .predecessors()
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(",");

        let conn = self.pool.get()?;
        let changed = if allowed.is_empty() {
            0
        } else {
            conn.execute(
                &format!(
                    "UPDATE load_tests SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status IN ({allowed})"
                ),
                params![status.as_str(), fmt_ts(&Utc::now()), id],
            )?
        };
        if changed == 1 {
            return Ok(());
        }

        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM load_tests WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match current {
            None => Err(StoreError::NotFound(id)),
            Some(raw) => {
                let from = raw
                    .parse::<TaskStatus>()
                    .map_err(|e| StoreError::Corrupt(format!("task {id}: {e}")))?;
                Err(StoreError::InvalidTransition { id, from, to: status })
            }
        }
    }

    async fn insert_result(&self, result: &TestResult) -> Result<i64, StoreError> {
        let m = &result.metrics;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO test_results (
                test_id, tps, avg_response_time, min_response_time, max_response_time,
                success_count, failure_count, error_rate, availability, rps,
                dns_time, connect_time, ttfb, content_download_time, duration_secs, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                result.task_id,
                m.tps,
                m.avg_response_time,
                m.min_response_time,
                m.max_response_time,
                m.success_count as i64,
                m.failure_count as i64,
                m.error_rate,
                m.availability,
                result.rps,
                m.dns_time,
                m.connect_time,
                m.ttfb,
                m.content_download_time,
                result.duration_secs,
                fmt_ts(&result.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn results_for_task(&self, id: TaskId) -> Result<Vec<TestResult>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESULT_COLUMNS} FROM test_results WHERE test_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![id], ResultRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ResultRow::into_result).collect()
    }
}

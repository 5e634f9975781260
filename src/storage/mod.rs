//! Task/result storage -- SQLite pool, schema, and the `TaskStore` seam.

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use self::memory::InMemoryTaskStore;
pub use self::sqlite::SqliteTaskStore;

use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use thiserror::Error;

use crate::model::{NewTask, Task, TaskId, TaskStatus, TestResult, ValidationError};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("invalid task: {0}")]
    Invalid(#[from] ValidationError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Durable record of tasks and their results.
///
/// Every status write goes through the lifecycle graph in
/// [`TaskStatus::can_transition_to`]; `claim_task` is the only
/// synchronization primitive between concurrent executions.
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a validated submission in `pending`.
    async fn create_task(&self, new: NewTask) -> Result<Task, StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// All tasks with the given status, ordered by scheduled start.
    async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;

    /// Every task, ordered by scheduled start.
    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Atomically move `id` from `from` to `to`.
    ///
    /// Returns `Ok(false)` when the task is no longer in `from` (a lost race,
    /// not an error).
    async fn claim_task(&self, id: TaskId, from: TaskStatus, to: TaskStatus)
        -> Result<bool, StoreError>;

    /// Move `id` to `status` from whichever predecessor it is currently in.
    async fn set_status(&self, id: TaskId, status: TaskStatus) -> Result<(), StoreError>;

    /// Persist a result and return its id. Results are never updated.
    async fn insert_result(&self, result: &TestResult) -> Result<i64, StoreError>;

    async fn results_for_task(&self, id: TaskId) -> Result<Vec<TestResult>, StoreError>;
}

/// Reject a claim that is not an edge of the lifecycle graph.
pub(crate) fn check_edge(id: TaskId, from: TaskStatus, to: TaskStatus) -> Result<(), StoreError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { id, from, to })
    }
}

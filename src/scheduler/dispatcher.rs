use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::model::{Task, TaskStatus};
use crate::runner::Runner;
use crate::storage::{StoreError, TaskStore};

/// Claims due tasks and hands them to the runner on their own tokio task.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    runner: Runner,
    /// Caps executions in flight; `None` means unbounded.
    permits: Option<Arc<Semaphore>>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, runner: Runner, config: &SchedulerConfig) -> Self {
        Self {
            store,
            runner,
            permits: config
                .concurrency_limit()
                .map(|n| Arc::new(Semaphore::new(n))),
            poll_interval: config.poll_interval(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Approved tasks whose execution window contains `now`.
    pub async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let approved = self.store.list_tasks_by_status(TaskStatus::Approved).await?;
        Ok(approved.into_iter().filter(|t| t.is_due(now)).collect())
    }

    /// One scheduler iteration: claim every due task and dispatch it.
    ///
    /// Returns the handles of the executions started by this call; dropping
    /// them detaches the runs.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<TaskStatus>>, StoreError> {
        let due = self.due_tasks(now).await?;
        if !due.is_empty() {
            debug!(count = due.len(), "due tasks found");
        }

        let mut started = Vec::new();
        for task in due {
            let id = task.id;
            match self.claim_and_dispatch(task).await {
                Ok(Some(handle)) => started.push(handle),
                Ok(None) => {}
                // One bad row must not stop the rest of the batch.
                Err(e) => error!(task_id = id, error = %e, "claim failed"),
            }
        }
        Ok(started)
    }

    /// Atomically move `task` from `approved` to `running` and start it.
    ///
    /// `Ok(None)` means another dispatcher won the claim.
    pub async fn claim_and_dispatch(&self, mut task: Task) -> Result<Option<JoinHandle<TaskStatus>>, StoreError> {
        let claimed = self
            .store
            .claim_task(task.id, TaskStatus::Approved, TaskStatus::Running)
            .await?;
        if !claimed {
            debug!(task_id = task.id, "task already claimed, skipping");
            return Ok(None);
        }

        task.status = TaskStatus::Running;
        info!(task_id = task.id, target = %task.target_url, users = task.num_users, "task claimed");
        Ok(Some(self.spawn_execution(task)))
    }

    /// Start a just-approved task without waiting for the next poll.
    ///
    /// Only tasks whose window is already open are claimed; anything else is
    /// left for the poll loop.
    pub async fn trigger_on_approval(&self, task: &Task) -> Option<JoinHandle<TaskStatus>> {
        let now = Utc::now();
        if !task.window_contains(now) {
            debug!(task_id = task.id, start = %task.scheduled_start, "approved task not yet due, deferring to poll loop");
            return None;
        }

        let mut approved = task.clone();
        approved.status = TaskStatus::Approved;
        match self.claim_and_dispatch(approved).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(task_id = task.id, error = %e, "immediate dispatch failed");
                None
            }
        }
    }

    /// Fail tasks left `running` by a previous process; their child is gone.
    pub async fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let stale = self.store.list_tasks_by_status(TaskStatus::Running).await?;
        let mut recovered = 0;
        for task in stale {
            match self
                .store
                .claim_task(task.id, TaskStatus::Running, TaskStatus::Failed)
                .await
            {
                Ok(true) => {
                    warn!(task_id = task.id, "interrupted execution marked failed");
                    recovered += 1;
                }
                Ok(false) => {}
                Err(e) => error!(task_id = task.id, error = %e, "failed to recover task"),
            }
        }
        Ok(recovered)
    }

    /// Approved tasks that are due now or whose window opens within `hours`.
    /// This is strictly a dry-run preview; nothing is claimed.
    pub async fn preview(&self, now: DateTime<Utc>, hours: u64) -> Result<Vec<Task>, StoreError> {
        let horizon = now + chrono::Duration::hours(hours.min(24 * 365) as i64);
        let approved = self.store.list_tasks_by_status(TaskStatus::Approved).await?;
        Ok(approved
            .into_iter()
            .filter(|t| t.scheduled_end > now && t.scheduled_start <= horizon)
            .collect())
    }

    fn spawn_execution(&self, task: Task) -> JoinHandle<TaskStatus> {
        let runner = self.runner.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // Held for the whole run; waiting here never blocks the poll loop.
            let _permit = match permits {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };
            runner.execute(task).await
        })
    }
}

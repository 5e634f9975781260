//! In-process `TaskStore` used by tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::{check_edge, StoreError, TaskStore};
use crate::model::{NewTask, Task, TaskId, TaskStatus, TestResult};

#[derive(Default)]
struct Inner {
    next_task_id: TaskId,
    next_result_id: i64,
    tasks: BTreeMap<TaskId, Task>,
    results: Vec<TestResult>,
    /// Every successful status write, in order, for lifecycle assertions.
    transitions: Vec<(TaskId, TaskStatus)>,
}

/// Map-backed store; the mutex makes each operation atomic like a single SQL statement.
#[derive(Default)]
pub struct InMemoryTaskStore {
    inner: Mutex<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every operation completes under the lock, so a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a task as-is, bypassing submission validation and status rules.
    pub fn insert_task(&self, task: Task) {
        let mut inner = self.lock();
        inner.next_task_id = inner.next_task_id.max(task.id);
        inner.transitions.push((task.id, task.status));
        inner.tasks.insert(task.id, task);
    }

    /// Status history of one task, starting with its initial status.
    pub fn status_history(&self, id: TaskId) -> Vec<TaskStatus> {
        self.lock()
            .transitions
            .iter()
            .filter(|(task_id, _)| *task_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn result_count(&self) -> usize {
        self.lock().results.len()
    }
}

fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| {
        a.scheduled_start
            .cmp(&b.scheduled_start)
            .then(a.id.cmp(&b.id))
    });
    tasks
}

#[async_trait::async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, new: NewTask) -> Result<Task, StoreError> {
        new.validate()?;
        let now = Utc::now();
        let mut inner = self.lock();
        inner.next_task_id += 1;
        let task = Task {
            id: inner.next_task_id,
            owner_id: new.owner_id,
            num_users: new.num_users,
            ramp_up: new.ramp_up,
            target_url: new.target_url.trim().to_string(),
            scheduled_start: new.scheduled_start,
            scheduled_end: new.scheduled_end,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        inner.transitions.push((task.id, task.status));
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.lock().tasks.get(&id).cloned())
    }

    async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let tasks = self
            .lock()
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        Ok(sorted(tasks))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(sorted(self.lock().tasks.values().cloned().collect()))
    }

    async fn claim_task(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, StoreError> {
        check_edge(id, from, to)?;
        let mut inner = self.lock();
        let Some(task) = inner.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if task.status != from {
            return Ok(false);
        }
        task.status = to;
        task.updated_at = Utc::now();
        inner.transitions.push((id, to));
        Ok(true)
    }

    async fn set_status(&self, id: TaskId, status: TaskStatus) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let task = inner.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        check_edge(id, task.status, status)?;
        task.status = status;
        task.updated_at = Utc::now();
        inner.transitions.push((id, status));
        Ok(())
    }

    async fn insert_result(&self, result: &TestResult) -> Result<i64, StoreError> {
        let mut inner = self.lock();
        if !inner.tasks.contains_key(&result.task_id) {
            return Err(StoreError::NotFound(result.task_id));
        }
        inner.next_result_id += 1;
        let id = inner.next_result_id;
        let mut stored = result.clone();
        stored.id = Some(id);
        inner.results.push(stored);
        Ok(id)
    }

    async fn results_for_task(&self, id: TaskId) -> Result<Vec<TestResult>, StoreError> {
        Ok(self
            .lock()
            .results
            .iter()
            .filter(|r| r.task_id == id)
            .cloned()
            .collect())
    }
}

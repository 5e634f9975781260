//! Execution runner: drive one claimed task through the load generator to a terminal status.

pub mod artifact;
pub mod locust;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::model::{Task, TaskId, TaskStatus, TestResult};
use crate::storage::TaskStore;

pub use self::artifact::{parse_stats, parse_stats_file, ArtifactError};
pub use self::locust::LocustBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for load generator: {source}")]
    Wait {
        #[source]
        source: std::io::Error,
    },

    #[error("load generator exited with code {code:?}")]
    Exited { code: Option<i32>, output: String },

    #[error("load generator still running after {after:?}; killed")]
    TimedOut { after: Duration },

    #[error("cannot prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invocation parameters derived deterministically from a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    pub task_id: TaskId,
    pub users: u32,
    pub spawn_rate: u32,
    pub host: String,
    pub run_time_secs: u64,
    /// Output path prefix; unique per task and start second.
    pub artifact_prefix: PathBuf,
}

impl RunParams {
    pub fn for_task(task: &Task, results_dir: &Path, started_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id,
            users: task.num_users,
            spawn_rate: task.ramp_up,
            host: task.target_url.clone(),
            run_time_secs: task.run_duration_secs(),
            artifact_prefix: results_dir
                .join(format!("task_{}_{}", task.id, started_at.timestamp())),
        }
    }
}

/// Something that can run a load test and leave a stats artifact behind.
#[async_trait::async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// Run to completion; on success return the path of the stats artifact.
    async fn run(&self, params: &RunParams) -> Result<PathBuf, BackendError>;
}

/// Runs claimed tasks to `completed` or `failed`.
#[derive(Clone)]
pub struct Runner {
    store: Arc<dyn TaskStore>,
    backend: Arc<dyn ExecutionBackend>,
    results_dir: PathBuf,
}

impl Runner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        backend: Arc<dyn ExecutionBackend>,
        results_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            backend,
            results_dir: results_dir.into(),
        }
    }

    /// Execute a task that is already `running` and return the terminal status it reached.
    pub async fn execute(&self, task: Task) -> TaskStatus {
        let run_id = uuid::Uuid::new_v4();
        let params = RunParams::for_task(&task, &self.results_dir, Utc::now());
        info!(
            task_id = task.id,
            %run_id,
            backend = self.backend.name(),
            users = params.users,
            spawn_rate = params.spawn_rate,
            run_time_secs = params.run_time_secs,
            host = %params.host,
            "execution started"
        );

        let artifact = match self.backend.run(&params).await {
            Ok(path) => path,
            Err(e) => {
                match &e {
                    BackendError::Exited { output, .. } => {
                        error!(task_id = task.id, %run_id, error = %e, output = %output.trim(), "load generator failed")
                    }
                    _ => error!(task_id = task.id, %run_id, error = %e, "load generator failed"),
                }
                return self.finish(task.id, TaskStatus::Failed).await;
            }
        };

        let metrics = match parse_stats_file(&artifact) {
            Ok(m) => m,
            Err(e) => {
                error!(task_id = task.id, %run_id, artifact = %artifact.display(), error = %e, "result artifact unusable");
                return self.finish(task.id, TaskStatus::Failed).await;
            }
        };

        // Result first: a completed task always has its row.
        let result = TestResult::new(task.id, metrics, params.run_time_secs as f64);
        if let Err(e) = self.store.insert_result(&result).await {
            error!(task_id = task.id, %run_id, error = %e, "failed to save result");
            return self.finish(task.id, TaskStatus::Failed).await;
        }

        info!(
            task_id = task.id,
            %run_id,
            tps = result.metrics.tps,
            error_rate = result.metrics.error_rate,
            availability = result.metrics.availability,
            "execution completed"
        );
        self.finish(task.id, TaskStatus::Completed).await
    }

    async fn finish(&self, id: TaskId, status: TaskStatus) -> TaskStatus {
        if let Err(e) = self.store.set_status(id, status).await {
            warn!(task_id = id, %status, error = %e, "failed to record terminal status");
        }
        status
    }
}

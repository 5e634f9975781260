//! Shared helpers: a fake execution backend and task builders.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use loadgate::config::SchedulerConfig;
use loadgate::model::{Task, TaskStatus};
use loadgate::runner::{BackendError, ExecutionBackend, RunParams, Runner};
use loadgate::scheduler::Scheduler;
use loadgate::storage::{InMemoryTaskStore, TaskStore};

pub const STATS_HEADER: &str = "Type,Name,Request Count,Failure Count,Median Response Time,Average Response Time,Min Response Time,Max Response Time,Average Content Size,Requests/s,Failures/s\n";

/// Two-endpoint run: 1000 requests, 50 failures, 47.6 rps.
pub fn aggregated_csv() -> String {
    format!(
        "{STATS_HEADER}GET,/,1000,50,110,120.5,30.0,900.0,512,47.6,2.4\nAggregated,/,1000,50,110,120.5,30.0,900.0,512,47.6,2.4\n"
    )
}

pub fn csv_without_aggregate() -> String {
    format!("{STATS_HEADER}GET,/,1000,50,110,120.5,30.0,900.0,512,47.6,2.4\n")
}

/// What the fake load generator does when run.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    /// Exit 0 and write this stats CSV.
    Artifact(String),
    /// Exit 0 without writing anything.
    NoArtifact,
    /// Exit with a non-zero code.
    Exit(i32),
}

/// Backend that writes a canned artifact instead of spawning Locust.
pub struct FakeBackend {
    outcome: FakeOutcome,
    delay: Duration,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub seen: Mutex<Vec<RunParams>>,
}

impl FakeBackend {
    pub fn new(outcome: FakeOutcome) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn run(&self, params: &RunParams) -> Result<PathBuf, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(params.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut path = params.artifact_prefix.clone().into_os_string();
        path.push("_stats.csv");
        let path = PathBuf::from(path);

        match &self.outcome {
            FakeOutcome::Artifact(csv) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir).unwrap();
                }
                std::fs::write(&path, csv).unwrap();
                Ok(path)
            }
            FakeOutcome::NoArtifact => Ok(path),
            FakeOutcome::Exit(code) => Err(BackendError::Exited {
                code: Some(*code),
                output: "Traceback: connection refused".to_string(),
            }),
        }
    }
}

/// An approved task whose window `[now - 1m, now + 5m)` is open.
pub fn due_task(id: i64) -> Task {
    let now = Utc::now();
    task_with_window(id, now - ChronoDuration::minutes(1), now + ChronoDuration::minutes(5))
}

pub fn task_with_window(id: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Task {
    Task {
        id,
        owner_id: 1,
        num_users: 20,
        ramp_up: 2,
        target_url: "http://target.example.test".to_string(),
        scheduled_start: start,
        scheduled_end: end,
        status: TaskStatus::Approved,
        created_at: start,
        updated_at: start,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryTaskStore>,
    pub backend: Arc<FakeBackend>,
    pub scheduler: Scheduler,
    pub runner: Runner,
    pub results_dir: tempfile::TempDir,
}

pub fn harness(outcome: FakeOutcome) -> Harness {
    harness_with(FakeBackend::new(outcome), 0)
}

pub fn harness_with(backend: FakeBackend, max_concurrent_runs: usize) -> Harness {
    let store = Arc::new(InMemoryTaskStore::new());
    let backend = Arc::new(backend);
    let results_dir = tempfile::tempdir().unwrap();
    let dyn_store: Arc<dyn TaskStore> = store.clone();
    let runner = Runner::new(dyn_store.clone(), backend.clone(), results_dir.path());
    let scheduler = Scheduler::new(
        dyn_store,
        runner.clone(),
        &SchedulerConfig {
            poll_interval_secs: 30,
            max_concurrent_runs,
        },
    );
    Harness {
        store,
        backend,
        scheduler,
        runner,
        results_dir,
    }
}

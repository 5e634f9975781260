//! loadgate -- approval-gated load test scheduling.
//!
//! Submitted load tests wait for approval; the scheduler then claims each
//! approved task once its window opens, runs Locust headless against the
//! target, parses the aggregate statistics, and records normalized metrics.

pub mod api;
pub mod config;
pub mod model;
pub mod runner;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use crate::config::AppConfig;
use crate::runner::{LocustBackend, Runner};
use crate::scheduler::Scheduler;
use crate::storage::{SqliteTaskStore, TaskStore};

/// Wire the SQLite store, Locust backend, and scheduler from configuration.
pub fn build_scheduler(config: &AppConfig) -> Result<Scheduler> {
    let pool = storage::open_pool(&config.storage.db_path)?;
    let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(pool));
    let backend = Arc::new(LocustBackend::new(config.locust.clone()));
    let runner = Runner::new(store.clone(), backend, config.locust.results_dir.clone());
    Ok(Scheduler::new(store, runner, &config.scheduler))
}

/// Start the loadgate daemon: API server and scheduler.
pub async fn serve(config: &AppConfig) -> Result<()> {
    // 1. Initialize Storage + Scheduler
    tracing::info!(db_path = %config.storage.db_path, "Initializing database");
    let scheduler = build_scheduler(config)?;

    // 2. Tasks still `running` belong to a process that no longer exists
    let recovered = scheduler.recover_interrupted().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "Failed tasks interrupted by previous shutdown");
    }

    // 3. Start Scheduler Engine (background task)
    let scheduler_engine = scheduler.clone();
    tokio::spawn(async move {
        scheduler::run_scheduler_loop(scheduler_engine).await;
    });

    // 4. Start API Server
    let addr: std::net::SocketAddr = config.server.bind.parse()?;
    let app = api::router(api::state::AppState::new(scheduler));

    tracing::info!(%addr, "loadgate listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

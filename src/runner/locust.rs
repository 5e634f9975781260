//! Locust process wrapper -- spawn headless, capture output, enforce the watchdog.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{BackendError, ExecutionBackend, RunParams};
use crate::config::LocustConfig;

/// Suffix Locust appends to the `--csv` prefix for aggregate statistics.
pub const STATS_SUFFIX: &str = "_stats.csv";

/// Runs Locust as a child process per execution.
#[derive(Debug, Clone)]
pub struct LocustBackend {
    config: LocustConfig,
}

impl LocustBackend {
    pub fn new(config: LocustConfig) -> Self {
        Self { config }
    }

    /// Full argument vector after the program name.
    pub fn command_args(&self, params: &RunParams) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.extend([
            "-f".to_string(),
            self.config.locustfile.display().to_string(),
            "--headless".to_string(),
            "-u".to_string(),
            params.users.to_string(),
            "-r".to_string(),
            params.spawn_rate.to_string(),
            "--host".to_string(),
            params.host.clone(),
            "--run-time".to_string(),
            format!("{}s", params.run_time_secs),
            "--csv".to_string(),
            params.artifact_prefix.display().to_string(),
            "--only-summary".to_string(),
        ]);
        args
    }

    /// Where Locust writes aggregate statistics for `params`.
    pub fn stats_path(params: &RunParams) -> PathBuf {
        let mut path = params.artifact_prefix.clone().into_os_string();
        path.push(STATS_SUFFIX);
        PathBuf::from(path)
    }

    /// How long to wait for the child before killing it, if bounded.
    fn watchdog(&self, params: &RunParams) -> Option<Duration> {
        (self.config.grace_period_secs > 0).then(|| {
            Duration::from_secs(params.run_time_secs + self.config.grace_period_secs)
        })
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for LocustBackend {
    fn name(&self) -> &'static str {
        "locust"
    }

    async fn run(&self, params: &RunParams) -> Result<PathBuf, BackendError> {
        if let Some(dir) = params.artifact_prefix.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| BackendError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let args = self.command_args(params);
        debug!(task_id = params.task_id, program = %self.config.program, ?args, "spawning locust");

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| BackendError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        let output = match self.watchdog(params) {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(res) => res,
                Err(_) => {
                    // Dropping the pending future drops the child; kill_on_drop reaps it.
                    warn!(task_id = params.task_id, limit_secs = limit.as_secs(), "locust exceeded watchdog, killed");
                    return Err(BackendError::TimedOut { after: limit });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|source| BackendError::Wait { source })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(BackendError::Exited {
                code: output.status.code(),
                output: combined,
            });
        }

        info!(task_id = params.task_id, "locust finished");
        Ok(Self::stats_path(params))
    }
}

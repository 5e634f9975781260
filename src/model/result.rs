//! Normalized metrics produced by one load test execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;

/// Round to 4 decimal places so stored metrics compare and render deterministically.
pub fn round4(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

/// Numeric core of a result, derived purely from the load generator's artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Requests per second across all endpoints.
    pub tps: f64,
    /// Response times in milliseconds.
    pub avg_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub error_rate: f64,
    pub availability: f64,
    // Network timing breakdown (ms); zero unless the tool reports it.
    #[serde(default)]
    pub dns_time: f64,
    #[serde(default)]
    pub connect_time: f64,
    #[serde(default)]
    pub ttfb: f64,
    #[serde(default)]
    pub content_download_time: f64,
}

impl RunMetrics {
    /// Build metrics from raw aggregate counters, deriving the rates.
    ///
    /// Failures are capped at `total_requests`, so `error_rate = failures / total`
    /// stays in `[0, 1]` (0 when nothing was sent) and `availability = 1 - error_rate`;
    /// every float is rounded to 4 places.
    pub fn from_counters(
        total_requests: u64,
        failures: u64,
        avg_response_time: f64,
        min_response_time: f64,
        max_response_time: f64,
        requests_per_sec: f64,
    ) -> Self {
        let failures = failures.min(total_requests);
        let error_rate = if total_requests > 0 {
            round4(failures as f64 / total_requests as f64)
        } else {
            0.0
        };

        Self {
            tps: round4(requests_per_sec),
            avg_response_time: round4(avg_response_time),
            min_response_time: round4(min_response_time),
            max_response_time: round4(max_response_time),
            success_count: total_requests - failures,
            failure_count: failures,
            error_rate,
            availability: round4(1.0 - error_rate),
            ..Self::default()
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

/// A persisted result row, owned by its task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Assigned on insert; `None` before the row exists.
    pub id: Option<i64>,
    pub task_id: TaskId,
    #[serde(flatten)]
    pub metrics: RunMetrics,
    /// Same value as `metrics.tps`, kept as its own column for reports.
    pub rps: f64,
    /// Configured run length in seconds.
    pub duration_secs: f64,
    pub created_at: DateTime<Utc>,
}

impl TestResult {
    pub fn new(task_id: TaskId, metrics: RunMetrics, duration_secs: f64) -> Self {
        Self {
            id: None,
            task_id,
            rps: metrics.tps,
            metrics,
            duration_secs: round4(duration_secs),
            created_at: Utc::now(),
        }
    }
}

//! Core domain types: load test tasks, their lifecycle, and execution results.

pub mod result;

pub use self::result::{round4, RunMetrics, TestResult};

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Store-assigned task identifier.
pub type TaskId = i64;

/// Lifecycle status of a load test task.
///
/// ```text
/// pending -> approved -> running -> completed | failed
/// pending | approved -> rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Approved,
    Running,
    Completed,
    Failed,
    Rejected,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Approved,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Approved => "approved",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Rejected => "rejected",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Rejected)
                | (Approved, Running)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    /// Statuses from which `self` may be entered.
    pub fn predecessors(&self) -> Vec<TaskStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|from| from.can_transition_to(*self))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Rejected
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown task status '{0}'")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A requested load test campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: i64,
    /// Number of simulated concurrent users.
    pub num_users: u32,
    /// Users spawned per second until `num_users` is reached.
    pub ramp_up: u32,
    pub target_url: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether `now` lies in the half-open execution window `[start, end)`.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_start <= now && now < self.scheduled_end
    }

    /// Whether the scheduler may claim this task at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Approved && self.window_contains(now)
    }

    /// Total run time handed to the load generator, truncated to whole seconds.
    pub fn run_duration_secs(&self) -> u64 {
        (self.scheduled_end - self.scheduled_start)
            .num_seconds()
            .max(0) as u64
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("num_users must be at least 1")]
    NoUsers,

    #[error("target_url must be an http(s) URL, got '{0}'")]
    BadTarget(String),

    #[error("scheduled_end ({end}) must be after scheduled_start ({start})")]
    EmptyWindow { start: String, end: String },

    #[error("{field} year {year} is outside 0000-9999")]
    YearOutOfRange { field: &'static str, year: i32 },
}

/// Years that fit the four-digit RFC 3339 form the store writes.
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 0..=9999;

/// A task submission, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub owner_id: i64,
    pub num_users: u32,
    #[serde(default)]
    pub ramp_up: u32,
    pub target_url: String,
    #[serde(alias = "start_time", deserialize_with = "deserialize_timestamp")]
    pub scheduled_start: DateTime<Utc>,
    #[serde(alias = "end_time", deserialize_with = "deserialize_timestamp")]
    pub scheduled_end: DateTime<Utc>,
}

impl NewTask {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.num_users == 0 {
            return Err(ValidationError::NoUsers);
        }
        let url = self.target_url.trim();
        let has_scheme = url.starts_with("http://") || url.starts_with("https://");
        if !has_scheme || url.contains(char::is_whitespace) {
            return Err(ValidationError::BadTarget(self.target_url.clone()));
        }
        for (field, ts) in [
            ("scheduled_start", self.scheduled_start),
            ("scheduled_end", self.scheduled_end),
        ] {
            if !YEAR_RANGE.contains(&ts.year()) {
                return Err(ValidationError::YearOutOfRange {
                    field,
                    year: ts.year(),
                });
            }
        }
        if self.scheduled_end <= self.scheduled_start {
            return Err(ValidationError::EmptyWindow {
                start: self.scheduled_start.to_rfc3339(),
                end: self.scheduled_end.to_rfc3339(),
            });
        }
        Ok(())
    }
}

/// Parse a submitted timestamp.
///
/// Accepts RFC 3339 (`2024-05-01T10:00:00+08:00`, `2024-05-01T10:00:00Z`) and
/// the zone-less form browsers send from `datetime-local` inputs
/// (`2024-05-01T10:00`, `2024-05-01T10:00:00`), which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unparseable timestamp: {raw:?}")))
}

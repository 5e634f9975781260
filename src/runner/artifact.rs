//! Locust `_stats.csv` parser -- locate the aggregate row, normalize it into `RunMetrics`.
//!
//! Layout (header row, then one row per endpoint, then the aggregate):
//!
//! ```text
//! Type,Name,Request Count,Failure Count,Median Response Time,Average Response Time,
//!     Min Response Time,Max Response Time,Average Content Size,Requests/s,...
//! GET,/,1000,50,110,120.5,30.0,900.0,512,47.6,...
//! ,Aggregated,1000,50,110,120.5,30.0,900.0,512,47.6,...
//! ```
//!
//! Older Locust releases label the aggregate `Total` and put it in the first column.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use thiserror::Error;
use tracing::debug;

use crate::model::RunMetrics;

/// Labels that mark the aggregate row across Locust versions.
pub const AGGREGATE_LABELS: [&str; 2] = ["Aggregated", "Total"];

const COL_REQUEST_COUNT: usize = 2;
const COL_FAILURE_COUNT: usize = 3;
const COL_AVG_RESPONSE: usize = 5;
const COL_MIN_RESPONSE: usize = 6;
const COL_MAX_RESPONSE: usize = 7;
const COL_REQUESTS_PER_SEC: usize = 9;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("cannot open result artifact {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("result artifact has no header row")]
    MissingHeader,

    #[error("no aggregate row ({}) in result artifact", AGGREGATE_LABELS.join("/"))]
    MissingAggregate,

    #[error("malformed result artifact: {0}")]
    Csv(#[from] csv::Error),
}

/// Parse the stats artifact at `path`.
pub fn parse_stats_file(path: &Path) -> Result<RunMetrics, ArtifactError> {
    let file = File::open(path).map_err(|source| ArtifactError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    parse_stats(file)
}

/// Parse a stats artifact from any reader.
pub fn parse_stats<R: Read>(reader: R) -> Result<RunMetrics, ArtifactError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    if reader.headers()?.is_empty() {
        return Err(ArtifactError::MissingHeader);
    }

    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                debug!(line = line + 2, error = %e, "skipping unreadable stats row");
                continue;
            }
        };
        if !is_aggregate(&record) {
            continue;
        }

        return Ok(RunMetrics::from_counters(
            count_at(&record, COL_REQUEST_COUNT),
            count_at(&record, COL_FAILURE_COUNT),
            float_at(&record, COL_AVG_RESPONSE),
            float_at(&record, COL_MIN_RESPONSE),
            float_at(&record, COL_MAX_RESPONSE),
            float_at(&record, COL_REQUESTS_PER_SEC),
        ));
    }

    Err(ArtifactError::MissingAggregate)
}

/// The label sits in column 1 (after a blank or `None` request type), or in
/// column 0 for artifacts without a type column.
fn is_aggregate(record: &csv::StringRecord) -> bool {
    record
        .iter()
        .take(2)
        .any(|field| AGGREGATE_LABELS.contains(&field))
}

fn float_at(record: &csv::StringRecord, idx: usize) -> f64 {
    record
        .get(idx)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn count_at(record: &csv::StringRecord, idx: usize) -> u64 {
    record
        .get(idx)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
}

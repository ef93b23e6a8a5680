//! # Queue Job Model
//!
//! Transient work items of the dedup queue. A job references its event log
//! record (which holds the payload) and carries the deterministic dedup key
//! that makes redelivered upstream events collapse into one job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed (possibly not before `available_at`)
    Queued,
    /// Claimed by a worker until its lock expires
    Running,
    /// Acknowledged; kept to absorb duplicates for the dedup window
    Completed,
    /// Out of attempts or permanently failed
    Abandoned,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

/// Job to enqueue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub dedup_key: String,
    pub event_log_id: i64,
}

/// A claimed job as handed to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: i64,
    pub dedup_key: String,
    pub event_log_id: i64,
    /// Attempts including the current one
    pub attempts: u32,
    pub max_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl QueueJob {
    pub fn is_last_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Result of enqueuing a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued { job_id: i64 },
    /// A job with the same dedup key already exists; nothing was added
    Duplicate {
        existing_job_id: i64,
        existing_event_log_id: i64,
    },
}

/// Result of handing a failed job back to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Requeued {
        attempts: u32,
        available_at: DateTime<Utc>,
    },
    Abandoned {
        attempts: u32,
    },
}

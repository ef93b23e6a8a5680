//! # Event Log Model
//!
//! Append-only record of every accepted raw provider payload.
//!
//! ## Lifecycle
//!
//! ```text
//! PENDING ──▶ PROCESSING ──▶ PROCESSED
//!    │             │
//!    └─────────────┴───────▶ FAILED ──▶ PROCESSING (retry)
//! ```
//!
//! A `PROCESSED` record is never mutated again. A `FAILED` record whose job
//! exhausted its attempts stays `FAILED` and is surfaced by reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventLogStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl EventLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        }
    }

    /// Processed records are frozen
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Processed)
    }
}

impl fmt::Display for EventLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventLogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "PROCESSED" => Ok(Self::Processed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid event log status: {s}")),
        }
    }
}

/// One row per accepted raw upstream payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRecord {
    pub id: i64,
    pub payload: serde_json::Value,
    pub status: EventLogStatus,
    /// Dedup key derived from the raw payload at ingress
    pub dedup_key: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_strings() {
        for status in [
            EventLogStatus::Pending,
            EventLogStatus::Processing,
            EventLogStatus::Processed,
            EventLogStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<EventLogStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<EventLogStatus>().is_err());
    }

    #[test]
    fn test_only_processed_is_final() {
        assert!(EventLogStatus::Processed.is_final());
        assert!(!EventLogStatus::Failed.is_final());
    }
}

//! # Worker Pool
//!
//! Bounded concurrent executors for the dedup queue.

pub mod backoff;
pub mod pool;
pub mod processor;

pub use backoff::retry_delay;
pub use pool::WorkerPool;
pub use processor::{EventProcessor, JobOutcome, ProcessSummary};

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Runtime counters shared by every worker of a pool
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
    failed_permanent: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub failed_permanent: u64,
    /// Queue bookkeeping failures (claim, ack, retry)
    pub errors: u64,
}

impl WorkerStats {
    pub fn record(&self, outcome: &JobOutcome) {
        let counter = match outcome {
            JobOutcome::Completed(_) => &self.processed,
            JobOutcome::Retried { .. } => &self.retried,
            JobOutcome::Abandoned { .. } => &self.abandoned,
            JobOutcome::FailedPermanently => &self.failed_permanent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            failed_permanent: self.failed_permanent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

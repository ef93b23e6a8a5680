//! # Worker Pool
//!
//! N tokio tasks pull jobs independently from the shared queue. The queue's
//! claim lock guarantees no job is handed to two workers at once; workers
//! share nothing else but the store.
//!
//! Shutdown cancels the pool's token. Workers finish the job in hand, then
//! exit; anything still running after `shutdown_timeout` is aborted and its
//! job becomes claimable again when the lock expires.

use super::processor::EventProcessor;
use super::WorkerStats;
use crate::error::{DeliveryError, Result};
use crate::ingest::DeliveryCore;
use crate::store::DeliveryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct WorkerPool {
    store: Arc<dyn DeliveryStore>,
    processor: Arc<EventProcessor>,
    stats: Arc<WorkerStats>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(core: &DeliveryCore) -> Self {
        let config = core.config();
        Self {
            store: core.store().clone(),
            processor: Arc::new(EventProcessor::new(core)),
            stats: Arc::new(WorkerStats::default()),
            concurrency: config.worker.concurrency,
            poll_interval: config.queue.poll_interval(),
            shutdown_timeout: config.worker.shutdown_timeout(),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Spawn the workers; returns immediately
    pub fn start(&mut self) -> Result<()> {
        if !self.handles.is_empty() {
            return Err(DeliveryError::Worker("worker pool already started".to_string()));
        }

        for worker_id in 0..self.concurrency {
            let worker = Worker {
                id: worker_id,
                store: self.store.clone(),
                processor: self.processor.clone(),
                stats: self.stats.clone(),
                poll_interval: self.poll_interval,
                cancel: self.cancel.child_token(),
            };
            self.handles.push(tokio::spawn(async move { worker.run().await }));
        }

        info!(concurrency = self.concurrency, "Worker pool started");
        Ok(())
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty() && !self.cancel.is_cancelled()
    }

    /// Stop claiming, wait for in-flight jobs, abort stragglers
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        let handles = std::mem::take(&mut self.handles);
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let joined = futures::future::join_all(handles);
        match tokio::time::timeout(self.shutdown_timeout, joined).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "Worker task ended abnormally");
                    }
                }
                info!(stats = ?self.stats.snapshot(), "Worker pool stopped");
                Ok(())
            }
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                error!(
                    timeout_seconds = self.shutdown_timeout.as_secs(),
                    "Worker pool shutdown timed out; remaining workers aborted"
                );
                Err(DeliveryError::Worker(format!(
                    "shutdown exceeded {}s",
                    self.shutdown_timeout.as_secs()
                )))
            }
        }
    }
}

struct Worker {
    id: usize,
    store: Arc<dyn DeliveryStore>,
    processor: Arc<EventProcessor>,
    stats: Arc<WorkerStats>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(&self) {
        info!(worker_id = self.id, "Delivery worker starting");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.store.claim(self.processor.visibility_timeout()).await {
                Ok(Some(job)) => match self.processor.execute(self.id, job).await {
                    Ok(outcome) => self.stats.record(&outcome),
                    Err(e) => {
                        self.stats.record_error();
                        error!(
                            worker_id = self.id,
                            error = %e,
                            "Failed to settle job with the store"
                        );
                    }
                },
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.poll_interval) => {}
                        () = self.cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    self.stats.record_error();
                    error!(worker_id = self.id, error = %e, "Failed to claim job");
                    tokio::select! {
                        () = tokio::time::sleep(self.poll_interval * 5) => {}
                        () = self.cancel.cancelled() => break,
                    }
                }
            }
        }

        info!(worker_id = self.id, "Delivery worker stopped");
    }
}

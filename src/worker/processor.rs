//! # Event Processor
//!
//! Runs one claimed job end to end:
//!
//! 1. mark the event log record `PROCESSING`
//! 2. decode the payload and run each event through its branch
//! 3. mark the record `PROCESSED`, then ack the job
//!
//! On error the record is marked `FAILED` with the error text. Permanent
//! errors abandon the job immediately; transient ones go back to the queue
//! with backoff until the attempt limit abandons them. An abandoned job's
//! record stays `FAILED` for reconciliation to surface.

use super::backoff::retry_delay;
use crate::config::BackoffConfig;
use crate::error::{DeliveryError, ErrorClass, Result};
use crate::ingest::{DeliveryCore, InboundIngestor, StatusPipeline};
use crate::logging::log_job_outcome;
use crate::models::{QueueJob, RetryOutcome};
use crate::payload::{decode, ProviderEvent};
use crate::store::DeliveryStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Counts produced by processing one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub statuses_applied: usize,
    pub statuses_discarded: usize,
    pub inbound_messages: usize,
    /// The record was already `PROCESSED`; nothing ran
    pub already_processed: bool,
}

/// What the worker did with a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(ProcessSummary),
    Retried { attempts: u32, delay: Duration },
    /// Out of attempts after a transient error
    Abandoned { attempts: u32 },
    /// Permanent error; abandoned without further attempts
    FailedPermanently,
}

pub struct EventProcessor {
    store: Arc<dyn DeliveryStore>,
    status: StatusPipeline,
    inbound: InboundIngestor,
    backoff: BackoffConfig,
    processing_timeout: Duration,
    visibility_timeout: Duration,
}

impl EventProcessor {
    pub fn new(core: &DeliveryCore) -> Self {
        let config = core.config();
        Self {
            store: core.store().clone(),
            status: core.status_pipeline(),
            inbound: core.inbound_ingestor(),
            backoff: config.backoff.clone(),
            processing_timeout: config.worker.processing_timeout(),
            visibility_timeout: config.queue.visibility_timeout(),
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    /// Run the processing branches for the job's record
    #[instrument(
        skip(self, job),
        fields(event_log_id = job.event_log_id, dedup_key = %job.dedup_key)
    )]
    pub async fn process(&self, job: &QueueJob) -> Result<ProcessSummary> {
        let record = self
            .store
            .get_event_log(job.event_log_id)
            .await?
            .ok_or(DeliveryError::EventLogNotFound {
                event_log_id: job.event_log_id,
            })?;

        if !self.store.mark_processing(record.id).await? {
            debug!("Event log record already processed; skipping");
            return Ok(ProcessSummary {
                already_processed: true,
                ..Default::default()
            });
        }

        let mut summary = ProcessSummary::default();
        for event in decode(&record.payload)? {
            match event {
                ProviderEvent::StatusBatch { statuses, .. } => {
                    let report = self.status.process_batch(&statuses).await?;
                    summary.statuses_applied += report.applied;
                    summary.statuses_discarded += report.discarded;
                }
                ProviderEvent::InboundBatch {
                    routing,
                    contacts,
                    messages,
                } => {
                    let stored = self
                        .inbound
                        .ingest_batch(&routing, &contacts, &messages)
                        .await?;
                    summary.inbound_messages += stored.len();
                }
            }
        }

        self.store.mark_processed(record.id, None).await?;
        Ok(summary)
    }

    /// Process a claimed job and settle it with the queue
    ///
    /// Only bookkeeping failures (failing the record, settling the job) are
    /// returned as errors. The job then stays locked until its lock expires.
    pub async fn execute(&self, worker_id: usize, job: QueueJob) -> Result<JobOutcome> {
        let result = match tokio::time::timeout(self.processing_timeout, self.process(&job)).await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout {
                timeout_seconds: self.processing_timeout.as_secs(),
            }),
        };

        match result {
            Ok(summary) => {
                self.store.ack(job.id).await?;
                let outcome = if summary.already_processed {
                    "already_processed"
                } else {
                    "completed"
                };
                log_job_outcome(
                    worker_id,
                    job.event_log_id,
                    &job.dedup_key,
                    job.attempts,
                    outcome,
                    None,
                );
                Ok(JobOutcome::Completed(summary))
            }
            Err(err) => self.settle_failure(worker_id, &job, err).await,
        }
    }

    async fn settle_failure(
        &self,
        worker_id: usize,
        job: &QueueJob,
        err: DeliveryError,
    ) -> Result<JobOutcome> {
        let message = err.to_string();
        // Until the record is FAILED the job stays locked; it is settled again
        // after the lock expires, or by reconciliation once out of attempts
        self.store.mark_failed(job.event_log_id, &message).await?;

        match err.class() {
            ErrorClass::Permanent => {
                self.store.abandon(job.id, &message).await?;
                warn!(
                    worker_id,
                    event_log_id = job.event_log_id,
                    dedup_key = %job.dedup_key,
                    error = %message,
                    "Permanent failure; job abandoned"
                );
                log_job_outcome(
                    worker_id,
                    job.event_log_id,
                    &job.dedup_key,
                    job.attempts,
                    "failed_permanently",
                    Some(&message),
                );
                Ok(JobOutcome::FailedPermanently)
            }
            ErrorClass::Transient => {
                let delay = retry_delay(&self.backoff, job.attempts);
                match self.store.retry(job.id, delay, &message).await? {
                    RetryOutcome::Requeued { attempts, .. } => {
                        warn!(
                            worker_id,
                            event_log_id = job.event_log_id,
                            attempts,
                            max_attempts = job.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Transient failure; job requeued"
                        );
                        log_job_outcome(
                            worker_id,
                            job.event_log_id,
                            &job.dedup_key,
                            attempts,
                            "retried",
                            Some(&message),
                        );
                        Ok(JobOutcome::Retried { attempts, delay })
                    }
                    RetryOutcome::Abandoned { attempts } => {
                        error!(
                            worker_id,
                            event_log_id = job.event_log_id,
                            dedup_key = %job.dedup_key,
                            attempts,
                            error = %message,
                            "Retries exhausted; job abandoned and record left FAILED"
                        );
                        log_job_outcome(
                            worker_id,
                            job.event_log_id,
                            &job.dedup_key,
                            attempts,
                            "abandoned",
                            Some(&message),
                        );
                        Ok(JobOutcome::Abandoned { attempts })
                    }
                }
            }
        }
    }

    /// Claim and execute jobs until none is available
    pub async fn drain(&self) -> Result<Vec<JobOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(job) = self.store.claim(self.visibility_timeout).await? {
            outcomes.push(self.execute(0, job).await?);
        }
        Ok(outcomes)
    }
}

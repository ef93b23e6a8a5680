//! # Ingress
//!
//! The entry point the front door calls after acknowledging a provider
//! delivery. Every payload is recorded in the event log before anything else
//! happens, including payloads that turn out to be malformed, so nothing the
//! provider sent is silently dropped.

use super::inbound::InboundIngestor;
use super::status::StatusPipeline;
use crate::billing::BillingPolicy;
use crate::config::DeliveryConfig;
use crate::constants::notes::SUPERSEDED;
use crate::error::Result;
use crate::events::NotificationBridge;
use crate::models::{EnqueueOutcome, NewJob};
use crate::payload::{decode, derive_dedup_key};
use crate::store::DeliveryStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What happened to an accepted payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// A new job was queued
    Queued { job_id: i64 },
    /// A job with the same dedup key exists; this record was marked superseded
    Duplicate { existing_job_id: i64 },
    /// The payload failed to decode and was recorded as `FAILED`
    Rejected { reason: String },
    /// Enqueue failed; the record stays `PENDING` until reconciliation
    Deferred { error: String },
}

/// Returned by [`DeliveryCore::accept`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptReceipt {
    pub event_log_id: i64,
    pub dedup_key: String,
    pub disposition: Disposition,
}

/// Explicitly constructed service object holding the store and collaborators
///
/// Cheap to clone; workers and the reconciliation sweeper share one instance.
#[derive(Clone)]
pub struct DeliveryCore {
    store: Arc<dyn DeliveryStore>,
    notifier: Arc<dyn NotificationBridge>,
    config: Arc<DeliveryConfig>,
    billing: BillingPolicy,
}

impl std::fmt::Debug for DeliveryCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryCore")
            .field("config", &self.config)
            .field("billing", &self.billing)
            .finish_non_exhaustive()
    }
}

impl DeliveryCore {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        notifier: Arc<dyn NotificationBridge>,
        config: DeliveryConfig,
    ) -> Self {
        let billing = BillingPolicy::from_config(&config.billing);
        Self {
            store,
            notifier,
            config: Arc::new(config),
            billing,
        }
    }

    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.store
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn status_pipeline(&self) -> StatusPipeline {
        StatusPipeline::new(
            self.store.clone(),
            self.notifier.clone(),
            self.billing.clone(),
            self.config.worker.max_transition_attempts,
        )
    }

    pub fn inbound_ingestor(&self) -> InboundIngestor {
        InboundIngestor::new(self.store.clone(), self.notifier.clone())
    }

    /// Record a raw provider payload and queue it for processing
    ///
    /// Only a failure to write the event log itself is an error; every other
    /// outcome is reported in the receipt so the front door can always ack.
    #[instrument(skip(self, payload))]
    pub async fn accept(&self, payload: &Value) -> Result<AcceptReceipt> {
        let dedup_key = derive_dedup_key(payload);
        let record = self.store.insert_event_log(payload, &dedup_key).await?;

        if let Err(e) = decode(payload) {
            let reason = e.to_string();
            warn!(
                event_log_id = record.id,
                dedup_key = %dedup_key,
                reason = %reason,
                "Rejected malformed provider payload"
            );
            self.store.mark_failed(record.id, &reason).await?;
            return Ok(AcceptReceipt {
                event_log_id: record.id,
                dedup_key,
                disposition: Disposition::Rejected { reason },
            });
        }

        let disposition = self.enqueue_record(record.id, &dedup_key).await;
        Ok(AcceptReceipt {
            event_log_id: record.id,
            dedup_key,
            disposition,
        })
    }

    /// Enqueue the job for an already recorded event
    ///
    /// Also used by reconciliation for records left `PENDING`.
    pub(crate) async fn enqueue_record(&self, event_log_id: i64, dedup_key: &str) -> Disposition {
        let job = NewJob {
            dedup_key: dedup_key.to_string(),
            event_log_id,
        };

        match self.store.enqueue(job, self.config.queue.max_attempts).await {
            Ok(EnqueueOutcome::Enqueued { job_id }) => {
                debug!(event_log_id, job_id, dedup_key, "Queued provider event");
                Disposition::Queued { job_id }
            }
            Ok(EnqueueOutcome::Duplicate {
                existing_job_id,
                existing_event_log_id,
            }) => {
                if existing_event_log_id != event_log_id {
                    info!(
                        event_log_id,
                        existing_job_id,
                        dedup_key,
                        "Duplicate provider event absorbed"
                    );
                    let superseded = self
                        .store
                        .mark_processed(event_log_id, Some(SUPERSEDED))
                        .await;
                    if let Err(e) = superseded {
                        warn!(
                            event_log_id,
                            error = %e,
                            "Failed to mark duplicate record superseded"
                        );
                    }
                }
                Disposition::Duplicate { existing_job_id }
            }
            Err(e) => {
                error!(
                    event_log_id,
                    dedup_key,
                    error = %e,
                    "Enqueue failed; record left PENDING for reconciliation"
                );
                Disposition::Deferred {
                    error: e.to_string(),
                }
            }
        }
    }
}

//! # Reconciliation Sweeper
//!
//! Periodic background pass that repairs what the hot path can leave behind:
//!
//! - jobs whose lock expired after their last allowed attempt (a worker
//!   crashed or could not settle them) are abandoned and their records
//!   marked `FAILED`
//! - event log records stuck `PENDING` because their enqueue failed are
//!   enqueued again
//! - campaigns whose messages changed recently have their counters
//!   recomputed from message rows
//! - finished jobs older than the dedup window are purged
//! - records left `FAILED` are counted and surfaced in the logs
//!
//! ## Configuration
//!
//! ```toml
//! [reconciliation]
//! enabled = true
//! interval_seconds = 60
//! pending_threshold_seconds = 300
//! campaign_lookback_seconds = 3600
//! ```

use crate::campaign::CampaignAggregator;
use crate::constants::RECONCILIATION_BATCH_SIZE;
use crate::error::Result;
use crate::ingest::{DeliveryCore, Disposition};
use crate::models::EventLogStatus;
use chrono::Utc;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Exhausted jobs whose records were failed and jobs abandoned
    pub locks_abandoned: usize,
    pub requeued: usize,
    /// Stale records whose job already existed
    pub already_queued: usize,
    /// Stale records whose enqueue failed again
    pub deferred: usize,
    pub campaigns_recomputed: usize,
    pub jobs_purged: u64,
    pub failed_records: i64,
}

#[derive(Clone)]
pub struct ReconciliationSweeper {
    core: DeliveryCore,
    aggregator: CampaignAggregator,
}

impl std::fmt::Debug for ReconciliationSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationSweeper")
            .field("config", &self.core.config().reconciliation)
            .finish_non_exhaustive()
    }
}

impl ReconciliationSweeper {
    pub fn new(core: DeliveryCore) -> Self {
        let aggregator = CampaignAggregator::new(core.store().clone());
        Self { core, aggregator }
    }

    /// Run sweeps on the configured interval until cancelled
    ///
    /// A failed sweep is logged and the loop continues with the next tick.
    pub async fn run(&self, cancel: CancellationToken) {
        let config = &self.core.config().reconciliation;
        let mut ticker = tokio::time::interval(config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_seconds = config.interval_seconds,
            pending_threshold_seconds = config.pending_threshold_seconds,
            campaign_lookback_seconds = config.campaign_lookback_seconds,
            "Starting reconciliation sweeper"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = cancel.cancelled() => break,
            }

            let start = Instant::now();
            match self.sweep_once().await {
                Ok(report) => {
                    let duration_ms = start.elapsed().as_millis() as u64;
                    let repaired = report.locks_abandoned
                        + report.requeued
                        + report.deferred
                        + report.campaigns_recomputed;
                    if repaired > 0 || report.jobs_purged > 0
                    {
                        info!(?report, duration_ms, "Reconciliation sweep completed");
                    } else {
                        debug!(duration_ms, "Reconciliation sweep found nothing to repair");
                    }
                }
                Err(e) => error!(error = %e, "Reconciliation sweep failed"),
            }
        }

        info!("Reconciliation sweeper stopped");
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let store = self.core.store();
        let config = self.core.config();
        let now = Utc::now();
        let mut report = SweepReport::default();

        for job in store.exhausted_locks(RECONCILIATION_BATCH_SIZE).await? {
            let reason = format!(
                "lock expired after {} of {} attempts",
                job.attempts, job.max_attempts
            );
            // Leave the job locked if its record cannot be failed; the next sweep retries
            if let Err(e) = store.mark_failed(job.event_log_id, &reason).await {
                warn!(
                    job_id = job.id,
                    event_log_id = job.event_log_id,
                    error = %e,
                    "Could not fail record of exhausted job"
                );
                continue;
            }
            store.abandon(job.id, &reason).await?;
            report.locks_abandoned += 1;
        }
        if report.locks_abandoned > 0 {
            warn!(
                locks_abandoned = report.locks_abandoned,
                "Abandoned jobs whose attempts ran out without being settled"
            );
        }

        let stale = store
            .stale_pending(
                now - to_chrono(config.reconciliation.pending_threshold()),
                RECONCILIATION_BATCH_SIZE,
            )
            .await?;
        for record in stale {
            match self.core.enqueue_record(record.id, &record.dedup_key).await {
                Disposition::Queued { .. } => report.requeued += 1,
                Disposition::Duplicate { .. } => report.already_queued += 1,
                Disposition::Deferred { .. } | Disposition::Rejected { .. } => report.deferred += 1,
            }
        }
        if report.requeued > 0 {
            info!(requeued = report.requeued, "Re-enqueued stale PENDING event log records");
        }

        let touched = store
            .campaigns_touched_since(now - to_chrono(config.reconciliation.campaign_lookback()))
            .await?;
        for campaign_id in touched {
            match self.aggregator.recompute(campaign_id).await {
                Ok(_) => report.campaigns_recomputed += 1,
                Err(e) => warn!(campaign_id, error = %e, "Campaign recompute failed"),
            }
        }

        report.jobs_purged = store
            .purge_finished(now - to_chrono(config.queue.dedup_window()))
            .await?;

        report.failed_records = store.count_event_logs(EventLogStatus::Failed).await?;
        if report.failed_records > 0 {
            warn!(
                failed_records = report.failed_records,
                "Event log records remain FAILED and need attention"
            );
        }

        Ok(report)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;
    use crate::events::NoopBridge;
    use crate::models::JobStatus;
    use crate::store::prelude::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn status_payload(external_id: &str) -> serde_json::Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "waba-1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {
                            "phone_number_id": "pn-1",
                            "display_phone_number": "15550000000"
                        },
                        "statuses": [{
                            "id": external_id,
                            "status": "sent",
                            "timestamp": "1700000000",
                            "recipient_id": "15551234567"
                        }]
                    }
                }]
            }]
        })
    }

    fn core_for(store: &Arc<MemoryStore>) -> DeliveryCore {
        DeliveryCore::new(store.clone(), Arc::new(NoopBridge), DeliveryConfig::default())
    }

    #[tokio::test]
    async fn test_sweep_requeues_stale_pending_records() {
        let store = Arc::new(MemoryStore::new());
        let core = core_for(&store);

        let record = store
            .insert_event_log(&status_payload("wamid.1"), "status:wamid.1:sent")
            .await
            .unwrap();
        store.set_event_log_created_at(record.id, Utc::now() - chrono::Duration::hours(1));

        let report = ReconciliationSweeper::new(core).sweep_once().await.unwrap();

        assert_eq!(report.requeued, 1);
        assert_eq!(
            store.job_state("status:wamid.1:sent").map(|(status, _)| status),
            Some(JobStatus::Queued)
        );
    }

    #[tokio::test]
    async fn test_sweep_leaves_fresh_pending_records_alone() {
        let store = Arc::new(MemoryStore::new());
        let core = core_for(&store);

        store
            .insert_event_log(&status_payload("wamid.2"), "status:wamid.2:sent")
            .await
            .unwrap();

        let report = ReconciliationSweeper::new(core).sweep_once().await.unwrap();

        assert_eq!(report.requeued, 0);
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_counts_failed_records() {
        let store = Arc::new(MemoryStore::new());
        let core = core_for(&store);

        let receipt = core.accept(&json!({"object": "nope"})).await.unwrap();
        assert!(matches!(receipt.disposition, Disposition::Rejected { .. }));

        let report = ReconciliationSweeper::new(core).sweep_once().await.unwrap();
        assert_eq!(report.failed_records, 1);
    }

    #[tokio::test]
    async fn test_sweep_fails_records_of_exhausted_locks() {
        let store = Arc::new(MemoryStore::new());
        let core = core_for(&store);
        let max_attempts = core.config().queue.max_attempts;

        let receipt = core.accept(&status_payload("wamid.3")).await.unwrap();
        for _ in 0..max_attempts {
            store.expire_delays();
            let job = store.claim(Duration::from_secs(60)).await.unwrap().unwrap();
            assert!(store.mark_processing(job.event_log_id).await.unwrap());
        }
        store.expire_delays();
        assert!(store.claim(Duration::from_secs(60)).await.unwrap().is_none());

        let report = ReconciliationSweeper::new(core).sweep_once().await.unwrap();

        assert_eq!(report.locks_abandoned, 1);
        assert_eq!(report.failed_records, 1);
        assert_eq!(
            store.job_state(&receipt.dedup_key),
            Some((JobStatus::Abandoned, max_attempts))
        );
        let record = store.get_event_log(receipt.event_log_id).await.unwrap().unwrap();
        assert_eq!(record.status, EventLogStatus::Failed);
        assert!(record.error.unwrap().contains("lock expired"));
    }
}

//! Worker retry classification and pool lifecycle

mod common;

use common::*;
use delivery_core::models::{EventLogStatus, JobStatus};
use delivery_core::state_machine::MessageStatus;
use delivery_core::store::prelude::*;
use delivery_core::worker::{JobOutcome, WorkerPool};
use delivery_core::ReconciliationSweeper;
use std::time::Duration;

#[tokio::test]
async fn test_transient_failure_is_retried_then_succeeds() {
    let harness = TestHarness::new();
    harness.outbound("wamid.A", None).await;
    let receipt = harness.accept(&single_status("wamid.A", "sent", 0)).await;
    let processor = harness.processor();

    harness.store.set_message_outage(true);
    let job = harness
        .store
        .claim(processor.visibility_timeout())
        .await
        .unwrap()
        .unwrap();
    let outcome = processor.execute(0, job).await.unwrap();
    assert!(matches!(outcome, JobOutcome::Retried { attempts: 1, .. }));

    let record = harness
        .store
        .get_event_log(receipt.event_log_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, EventLogStatus::Failed);
    assert!(record.error.unwrap().contains("unavailable"));

    harness.store.set_message_outage(false);
    let outcomes = harness.drain().await;
    assert!(matches!(outcomes.as_slice(), [JobOutcome::Completed(_)]));

    let record = harness
        .store
        .get_event_log(receipt.event_log_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, EventLogStatus::Processed);
    assert_eq!(harness.message("wamid.A").await.status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_transient_failures_exhaust_attempts_and_abandon() {
    let harness = TestHarness::new();
    harness.outbound("wamid.A", None).await;
    let receipt = harness.accept(&single_status("wamid.A", "sent", 0)).await;

    harness.store.set_message_outage(true);
    let outcomes = harness.drain().await;

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], JobOutcome::Retried { attempts: 1, .. }));
    assert!(matches!(outcomes[1], JobOutcome::Retried { attempts: 2, .. }));
    assert_eq!(outcomes[2], JobOutcome::Abandoned { attempts: 3 });
    assert_eq!(
        harness.store.job_state(&receipt.dedup_key),
        Some((JobStatus::Abandoned, 3))
    );

    let record = harness
        .store
        .get_event_log(receipt.event_log_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, EventLogStatus::Failed);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let harness = TestHarness::new();
    let receipt = harness
        .accept(&single_status("wamid.ghost", "sent", 0))
        .await;

    let outcomes = harness.drain().await;

    assert_eq!(outcomes, vec![JobOutcome::FailedPermanently]);
    assert_eq!(
        harness.store.job_state(&receipt.dedup_key),
        Some((JobStatus::Abandoned, 1))
    );
}

#[tokio::test]
async fn test_unrecordable_failure_leaves_job_locked() {
    let harness = TestHarness::new();
    harness.outbound("wamid.A", None).await;
    let receipt = harness.accept(&single_status("wamid.A", "sent", 0)).await;
    let processor = harness.processor();

    harness.store.set_event_log_outage(true);
    let job = harness
        .store
        .claim(processor.visibility_timeout())
        .await
        .unwrap()
        .unwrap();
    assert!(processor.execute(0, job).await.is_err());

    // Neither requeued nor abandoned while the record could not be failed
    assert_eq!(
        harness.store.job_state(&receipt.dedup_key),
        Some((JobStatus::Running, 1))
    );

    harness.store.set_event_log_outage(false);
    harness.store.expire_delays();
    let outcomes = harness.drain().await;
    assert!(matches!(outcomes.as_slice(), [JobOutcome::Completed(_)]));
    assert_eq!(harness.message("wamid.A").await.status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_unsettled_job_stops_at_max_attempts_and_is_failed_by_sweep() {
    let harness = TestHarness::new();
    harness.outbound("wamid.A", None).await;
    let receipt = harness.accept(&single_status("wamid.A", "sent", 0)).await;
    let processor = harness.processor();

    harness.store.set_event_log_outage(true);
    let mut attempts = Vec::new();
    for _ in 0..5 {
        harness.store.expire_delays();
        if let Some(job) = harness
            .store
            .claim(processor.visibility_timeout())
            .await
            .unwrap()
        {
            attempts.push(job.attempts);
            assert!(processor.execute(0, job).await.is_err());
        }
    }
    assert_eq!(attempts, vec![1, 2, 3]);
    harness.store.set_event_log_outage(false);

    let report = ReconciliationSweeper::new(harness.core.clone())
        .sweep_once()
        .await
        .unwrap();

    assert_eq!(report.locks_abandoned, 1);
    assert_eq!(
        harness.store.job_state(&receipt.dedup_key),
        Some((JobStatus::Abandoned, 3))
    );
    let record = harness
        .store
        .get_event_log(receipt.event_log_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, EventLogStatus::Failed);
    assert_eq!(harness.message("wamid.A").await.status, MessageStatus::Queued);
}

#[tokio::test]
async fn test_processed_record_is_not_reprocessed() {
    let harness = TestHarness::new();
    harness.open_wallet(10.0).await;
    harness.outbound("wamid.A", None).await;
    let receipt = harness.accept(&single_status("wamid.A", "sent", 0)).await;
    harness.drain().await;

    // A stale job pointing at an already processed record
    harness
        .store
        .enqueue(
            delivery_core::models::NewJob {
                dedup_key: "replay".to_string(),
                event_log_id: receipt.event_log_id,
            },
            3,
        )
        .await
        .unwrap();
    let outcomes = harness.drain().await;

    let [JobOutcome::Completed(summary)] = outcomes.as_slice() else {
        panic!("expected one completed job, got {outcomes:?}");
    };
    assert!(summary.already_processed);
    assert_eq!(harness.store.balance(USER_ID).await.unwrap(), Some(9.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_processes_jobs_and_shuts_down() {
    let harness = TestHarness::new();
    harness.register_account().await;
    for i in 0..20 {
        let id = format!("wamid.{i}");
        harness.outbound(&id, None).await;
        harness.accept(&single_status(&id, "delivered", i)).await;
    }

    let mut pool = WorkerPool::new(&harness.core);
    pool.start().unwrap();
    assert!(pool.is_running());
    assert!(pool.start().is_err());
    let stats = pool.stats();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while stats.snapshot().processed < 20 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pool.shutdown().await.unwrap();

    assert_eq!(stats.snapshot().processed, 20);
    for i in 0..20 {
        let message = harness.message(&format!("wamid.{i}")).await;
        assert_eq!(message.status, MessageStatus::Delivered);
    }
}

//! Ingress recording, deduplication and inbound message ingestion

mod common;

use common::*;
use delivery_core::constants::events::MESSAGE_RECEIVED;
use delivery_core::constants::notes::SUPERSEDED;
use delivery_core::ingest::Disposition;
use delivery_core::models::{EventLogStatus, JobStatus};
use delivery_core::state_machine::{MessageDirection, MessageStatus};
use delivery_core::store::prelude::*;
use delivery_core::worker::JobOutcome;
use delivery_core::ReconciliationSweeper;
use serde_json::json;

#[tokio::test]
async fn test_accepting_same_payload_many_times_yields_one_job() {
    let harness = TestHarness::new();
    harness.open_wallet(10.0).await;
    harness.outbound("wamid.A", None).await;
    let payload = single_status("wamid.A", "delivered", 0);

    let mut receipts = Vec::new();
    for _ in 0..5 {
        receipts.push(harness.accept(&payload).await);
    }
    let outcomes = harness.drain().await;

    assert_eq!(harness.store.job_count(), 1);
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(receipts[0].disposition, Disposition::Queued { .. }));
    for receipt in &receipts[1..] {
        assert!(matches!(receipt.disposition, Disposition::Duplicate { .. }));
        let record = harness
            .store
            .get_event_log(receipt.event_log_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, EventLogStatus::Processed);
        assert_eq!(record.error.as_deref(), Some(SUPERSEDED));
    }
    assert_eq!(harness.store.balance(USER_ID).await.unwrap(), Some(9.0));
}

#[tokio::test]
async fn test_malformed_payload_is_recorded_and_rejected() {
    let harness = TestHarness::new();

    let receipt = harness.accept(&json!({"entry": "not-a-list"})).await;

    let Disposition::Rejected { reason } = &receipt.disposition else {
        panic!("expected rejection, got {:?}", receipt.disposition);
    };
    assert!(!reason.is_empty());
    assert!(receipt.dedup_key.starts_with("fallback:"));
    let record = harness
        .store
        .get_event_log(receipt.event_log_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, EventLogStatus::Failed);
    assert_eq!(harness.store.job_count(), 0);
}

#[tokio::test]
async fn test_enqueue_outage_defers_until_reconciliation() {
    let harness = TestHarness::new();
    harness.outbound("wamid.A", None).await;

    harness.store.set_queue_outage(true);
    let receipt = harness.accept(&single_status("wamid.A", "sent", 0)).await;
    assert!(matches!(receipt.disposition, Disposition::Deferred { .. }));
    let record = harness
        .store
        .get_event_log(receipt.event_log_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, EventLogStatus::Pending);

    harness.store.set_queue_outage(false);
    let an_hour_ago = chrono::Utc::now() - chrono::Duration::hours(1);
    harness
        .store
        .set_event_log_created_at(receipt.event_log_id, an_hour_ago);
    let report = ReconciliationSweeper::new(harness.core.clone())
        .sweep_once()
        .await
        .unwrap();
    assert_eq!(report.requeued, 1);

    harness.drain().await;
    assert_eq!(harness.message("wamid.A").await.status, MessageStatus::Sent);
    assert_eq!(
        harness.store.job_state(&receipt.dedup_key).map(|(status, _)| status),
        Some(JobStatus::Completed)
    );
}

#[tokio::test]
async fn test_inbound_text_creates_contact_conversation_and_message() {
    let harness = TestHarness::new();
    harness.register_account().await;
    let mut events = harness.publisher.subscribe();

    let (_, outcomes) = harness
        .deliver(&inbound_payload(
            "+1 555 123 4567",
            Some("Jane"),
            vec![text_message("wamid.in1", "+1 555 123 4567", "hello", 0)],
        ))
        .await;
    assert!(matches!(outcomes.as_slice(), [JobOutcome::Completed(s)] if s.inbound_messages == 1));

    let message = harness.message("wamid.in1").await;
    assert_eq!(message.direction, MessageDirection::Incoming);
    assert_eq!(message.status, MessageStatus::Delivered);
    assert_eq!(message.delivered_at, Some(ts(0)));
    assert_eq!(message.user_id, USER_ID);

    let conversation = harness
        .store
        .get_conversation(message.conversation_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.phone, "15551234567");
    assert_eq!(conversation.unread_count, 1);
    assert_eq!(conversation.last_message_at, Some(ts(0)));

    let contact = harness
        .store
        .upsert_contact(USER_ID, "15551234567", None)
        .await
        .unwrap();
    assert_eq!(Some(contact.id), message.contact_id);
    assert_eq!(contact.name.as_deref(), Some("Jane"));

    let event = events.try_recv().unwrap();
    assert_eq!(event.name, MESSAGE_RECEIVED);
    assert_eq!(event.context["preview"], "hello");
}

#[tokio::test]
async fn test_inbound_messages_share_one_conversation() {
    let harness = TestHarness::new();
    harness.register_account().await;

    harness
        .deliver(&inbound_payload(
            "15551234567",
            None,
            vec![
                text_message("wamid.in1", "15551234567", "one", 0),
                text_message("wamid.in2", "15551234567", "two", 30),
            ],
        ))
        .await;
    harness
        .deliver(&inbound_payload(
            "15551234567",
            None,
            vec![text_message("wamid.in3", "15551234567", "late", 10)],
        ))
        .await;

    let first = harness.message("wamid.in1").await;
    let third = harness.message("wamid.in3").await;
    assert_eq!(first.conversation_id, third.conversation_id);

    let conversation = harness
        .store
        .get_conversation(first.conversation_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.unread_count, 3);
    assert_eq!(conversation.last_message_at, Some(ts(30)));
}

#[tokio::test]
async fn test_inbound_for_unregistered_number_fails_permanently() {
    let harness = TestHarness::new();

    let (receipt, outcomes) = harness
        .deliver(&inbound_payload(
            "15551234567",
            None,
            vec![text_message("wamid.in1", "15551234567", "hi", 0)],
        ))
        .await;

    assert_eq!(outcomes, vec![JobOutcome::FailedPermanently]);
    let record = harness
        .store
        .get_event_log(receipt.event_log_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, EventLogStatus::Failed);
    assert!(record.error.unwrap().contains(PHONE_NUMBER_ID));
}

#[tokio::test]
async fn test_redelivered_inbound_message_is_stored_once() {
    let harness = TestHarness::new();
    harness.register_account().await;
    let message = text_message("wamid.in1", "15551234567", "hello", 0);

    harness
        .deliver(&inbound_payload("15551234567", None, vec![message.clone()]))
        .await;
    // A later batch leads with a new message and repeats the old one
    harness
        .deliver(&inbound_payload(
            "15551234567",
            Some("Jane"),
            vec![text_message("wamid.in2", "15551234567", "again", 5), message],
        ))
        .await;

    let stored = harness.message("wamid.in1").await;
    let conversation = harness
        .store
        .get_conversation(stored.conversation_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.unread_count, 2);
}

#[tokio::test]
async fn test_batch_sharing_an_event_with_earlier_payload_is_processed() {
    let harness = TestHarness::new();
    harness.open_wallet(10.0).await;
    harness.outbound("wamid.A", None).await;
    harness.outbound("wamid.B", None).await;

    let (first, _) = harness.deliver(&single_status("wamid.A", "sent", 0)).await;
    let batch = status_payload(vec![
        status("wamid.A", "sent", 0),
        status("wamid.B", "sent", 1),
    ]);
    let (second, outcomes) = harness.deliver(&batch).await;

    assert_ne!(first.dedup_key, second.dedup_key);
    assert!(matches!(second.disposition, Disposition::Queued { .. }));
    assert!(matches!(outcomes.as_slice(), [JobOutcome::Completed(_)]));
    assert_eq!(harness.message("wamid.A").await.status, MessageStatus::Sent);
    assert_eq!(harness.message("wamid.B").await.status, MessageStatus::Sent);
    // A's debit is not repeated by the batch
    assert_eq!(harness.store.balance(USER_ID).await.unwrap(), Some(8.0));

    // Redelivering the same batch, in any order, still collapses
    let reordered = status_payload(vec![
        status("wamid.B", "sent", 1),
        status("wamid.A", "sent", 0),
    ]);
    let third = harness.accept(&reordered).await;
    assert_eq!(third.dedup_key, second.dedup_key);
    assert!(matches!(third.disposition, Disposition::Duplicate { .. }));
}

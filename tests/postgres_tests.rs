//! PostgreSQL backend tests
//!
//! Each test gets an isolated database from `sqlx::test`. They need a running
//! server: `DATABASE_URL=postgresql://localhost/delivery_test cargo test -- --ignored`

#![cfg(feature = "postgres")]

mod common;

use common::*;
use delivery_core::events::NoopBridge;
use delivery_core::models::{
    Account, DebitOutcome, DebitRequest, DeclineReason, EnqueueOutcome, EventLogStatus, NewJob,
    NewOutboundMessage, RetryOutcome,
};
use delivery_core::state_machine::MessageStatus;
use delivery_core::store::prelude::*;
use delivery_core::store::PgStore;
use delivery_core::worker::{EventProcessor, JobOutcome};
use delivery_core::{CampaignAggregator, DeliveryCore};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

fn core_for(pool: PgPool) -> (Arc<PgStore>, DeliveryCore) {
    let store = Arc::new(PgStore::new(pool));
    let core = DeliveryCore::new(store.clone(), Arc::new(NoopBridge), test_config());
    (store, core)
}

async fn outbound(store: &PgStore, external_id: &str, campaign_id: Option<i64>) {
    store
        .record_outbound(NewOutboundMessage {
            user_id: USER_ID,
            external_id: Some(external_id.to_string()),
            contact_id: None,
            conversation_id: None,
            campaign_id,
            message_type: "template".to_string(),
            content: json!({"template": "welcome"}),
        })
        .await
        .unwrap();
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_concurrent_debits_apply_once(pool: PgPool) {
    let store = Arc::new(PgStore::new(pool));
    store.open_wallet(USER_ID, 100.0).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .debit(&DebitRequest::new(USER_ID, 10.0, "wamid.A"))
                .await
                .unwrap()
        }));
    }
    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().applied() {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(store.balance(USER_ID).await.unwrap(), Some(90.0));
    assert_eq!(store.transactions(USER_ID).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_debit_declines_leave_no_row(pool: PgPool) {
    let store = PgStore::new(pool);

    let no_wallet = store
        .debit(&DebitRequest::new(USER_ID, 1.0, "wamid.A"))
        .await
        .unwrap();
    assert_eq!(
        no_wallet,
        DebitOutcome::Declined {
            reason: DeclineReason::NoBillingAccount
        }
    );

    store.open_wallet(USER_ID, 0.5).await.unwrap();
    let short = store
        .debit(&DebitRequest::new(USER_ID, 1.0, "wamid.A"))
        .await
        .unwrap();
    assert!(matches!(
        short,
        DebitOutcome::Declined {
            reason: DeclineReason::InsufficientBalance { .. }
        }
    ));
    assert!(store.transactions(USER_ID).await.unwrap().is_empty());

    // The declined key is not burned; a later debit under it can still apply
    store
        .topup(&DebitRequest::new(USER_ID, 5.0, "topup-1"))
        .await
        .unwrap();
    assert!(store
        .debit(&DebitRequest::new(USER_ID, 1.0, "wamid.A"))
        .await
        .unwrap()
        .applied());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_queue_dedup_claim_and_retry(pool: PgPool) {
    let store = PgStore::new(pool);
    let record = store
        .insert_event_log(&json!({"entry": []}), "status:wamid.A:sent")
        .await
        .unwrap();
    let job = NewJob {
        dedup_key: "status:wamid.A:sent".to_string(),
        event_log_id: record.id,
    };

    let first = store.enqueue(job.clone(), 2).await.unwrap();
    let second = store.enqueue(job, 2).await.unwrap();
    let EnqueueOutcome::Enqueued { job_id } = first else {
        panic!("expected a new job");
    };
    assert_eq!(
        second,
        EnqueueOutcome::Duplicate {
            existing_job_id: job_id,
            existing_event_log_id: record.id
        }
    );

    let claimed = store.claim(Duration::from_secs(60)).await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 1);
    assert!(store.claim(Duration::from_secs(60)).await.unwrap().is_none());

    let retried = store
        .retry(claimed.id, Duration::ZERO, "boom")
        .await
        .unwrap();
    assert!(matches!(retried, RetryOutcome::Requeued { attempts: 1, .. }));

    let again = store.claim(Duration::from_secs(60)).await.unwrap().unwrap();
    assert_eq!(again.attempts, 2);
    assert_eq!(
        store.retry(again.id, Duration::ZERO, "boom").await.unwrap(),
        RetryOutcome::Abandoned { attempts: 2 }
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_expired_lock_without_attempts_left_is_not_reclaimed(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    let record = store
        .insert_event_log(&json!({"entry": []}), "status:wamid.A:sent")
        .await
        .unwrap();
    store
        .enqueue(
            NewJob {
                dedup_key: "status:wamid.A:sent".to_string(),
                event_log_id: record.id,
            },
            1,
        )
        .await
        .unwrap();

    let claimed = store.claim(Duration::from_secs(60)).await.unwrap().unwrap();
    sqlx::query("UPDATE delivery_jobs SET locked_until = NOW() - INTERVAL '1 second'")
        .execute(&pool)
        .await
        .unwrap();

    assert!(store.claim(Duration::from_secs(60)).await.unwrap().is_none());
    let exhausted = store.exhausted_locks(10).await.unwrap();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].id, claimed.id);
    assert_eq!(exhausted[0].attempts, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_status_events_end_to_end(pool: PgPool) {
    let (store, core) = core_for(pool);
    store.open_wallet(USER_ID, 10.0).await.unwrap();
    let campaign = store.create_campaign(USER_ID, "launch").await.unwrap();
    outbound(&store, "wamid.A", Some(campaign.id)).await;

    for payload in [
        single_status("wamid.A", "read", 20),
        single_status("wamid.A", "sent", 0),
        single_status("wamid.A", "delivered", 10),
    ] {
        core.accept(&payload).await.unwrap();
    }
    let outcomes = EventProcessor::new(&core).drain().await.unwrap();
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, JobOutcome::Completed(_))));

    let message = store
        .find_message_by_external_id("wamid.A")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.status, MessageStatus::Read);
    assert_eq!(message.read_at, Some(ts(20)));
    assert_eq!(message.delivered_at, Some(ts(20)));
    assert_eq!(store.balance(USER_ID).await.unwrap(), Some(9.0));

    let incremental = store
        .get_campaign(campaign.id)
        .await
        .unwrap()
        .unwrap()
        .counters;
    let recomputed = CampaignAggregator::new(store.clone())
        .recompute(campaign.id)
        .await
        .unwrap();
    assert_eq!(incremental, recomputed);
    assert_eq!(recomputed.read, 1);
    assert_eq!(recomputed.delivered, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_inbound_message_bumps_conversation(pool: PgPool) {
    let (store, core) = core_for(pool);
    store
        .register_account(Account {
            user_id: USER_ID,
            phone_number_id: PHONE_NUMBER_ID.to_string(),
            display_phone_number: None,
        })
        .await
        .unwrap();

    let receipt = core
        .accept(&inbound_payload(
            "15551234567",
            Some("Jane"),
            vec![
                text_message("wamid.in1", "15551234567", "hi", 0),
                text_message("wamid.in2", "15551234567", "there", 5),
            ],
        ))
        .await
        .unwrap();
    EventProcessor::new(&core).drain().await.unwrap();

    let record = store
        .get_event_log(receipt.event_log_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, EventLogStatus::Processed);

    let message = store
        .find_message_by_external_id("wamid.in2")
        .await
        .unwrap()
        .unwrap();
    let conversation = store
        .get_conversation(message.conversation_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.unread_count, 2);
    assert_eq!(conversation.last_message_at, Some(ts(5)));
}

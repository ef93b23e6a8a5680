//! Shared fixtures for the integration suites
//!
//! Everything runs against [`MemoryStore`]; the PostgreSQL suite builds its
//! own harness from a pool handed in by `sqlx::test`.

#![allow(dead_code)]

pub mod strategies;

use chrono::{DateTime, TimeZone, Utc};
use delivery_core::config::DeliveryConfig;
use delivery_core::events::EventPublisher;
use delivery_core::ingest::AcceptReceipt;
use delivery_core::models::{Account, Message, NewOutboundMessage};
use delivery_core::store::prelude::*;
use delivery_core::store::MemoryStore;
use delivery_core::worker::{EventProcessor, JobOutcome};
use delivery_core::DeliveryCore;
use serde_json::{json, Value};
use std::sync::Arc;

pub const USER_ID: i64 = 42;
pub const PHONE_NUMBER_ID: &str = "pn-1";
pub const DISPLAY_PHONE: &str = "15550001111";
pub const BASE_TS: i64 = 1_700_000_000;

/// Configuration tuned for fast, deterministic tests
pub fn test_config() -> DeliveryConfig {
    let mut config = DeliveryConfig::default();
    config.backoff.default_backoff_seconds = vec![0];
    config.backoff.backoff_multiplier = 1.0;
    config.backoff.max_backoff_seconds = 0;
    config.queue.max_attempts = 3;
    config.queue.poll_interval_ms = 10;
    config.worker.concurrency = 4;
    config.worker.shutdown_timeout_seconds = 5;
    config
}

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<EventPublisher>,
    pub core: DeliveryCore,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: DeliveryConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(EventPublisher::new(64));
        let core = DeliveryCore::new(store.clone(), publisher.clone(), config);
        Self {
            store,
            publisher,
            core,
        }
    }

    pub fn processor(&self) -> EventProcessor {
        EventProcessor::new(&self.core)
    }

    pub async fn register_account(&self) {
        self.store
            .register_account(Account {
                user_id: USER_ID,
                phone_number_id: PHONE_NUMBER_ID.to_string(),
                display_phone_number: Some(DISPLAY_PHONE.to_string()),
            })
            .await
            .unwrap();
    }

    pub async fn open_wallet(&self, balance: f64) {
        self.store.open_wallet(USER_ID, balance).await.unwrap();
    }

    pub async fn create_campaign(&self) -> i64 {
        self.store
            .create_campaign(USER_ID, "spring launch")
            .await
            .unwrap()
            .id
    }

    /// Record an outbound message in `queued`, as the send path would
    pub async fn outbound(&self, external_id: &str, campaign_id: Option<i64>) -> Message {
        self.store
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
            .unwrap()
    }

    pub async fn message(&self, external_id: &str) -> Message {
        self.store
            .find_message_by_external_id(external_id)
            .await
            .unwrap()
            .expect("message exists")
    }

    pub async fn accept(&self, payload: &Value) -> AcceptReceipt {
        self.core.accept(payload).await.unwrap()
    }

    /// Run every available job to completion
    pub async fn drain(&self) -> Vec<JobOutcome> {
        self.processor().drain().await.unwrap()
    }

    /// Accept a payload and process it
    pub async fn deliver(&self, payload: &Value) -> (AcceptReceipt, Vec<JobOutcome>) {
        let receipt = self.accept(payload).await;
        let outcomes = self.drain().await;
        (receipt, outcomes)
    }
}

pub fn ts(offset_seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_TS + offset_seconds, 0).unwrap()
}

fn envelope(value: Value) -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "waba-1",
            "changes": [{
                "field": "messages",
                "value": value
            }]
        }]
    })
}

fn metadata() -> Value {
    json!({"display_phone_number": DISPLAY_PHONE, "phone_number_id": PHONE_NUMBER_ID})
}

/// One status entry as the provider sends it
pub fn status(external_id: &str, status: &str, offset_seconds: i64) -> Value {
    json!({
        "id": external_id,
        "status": status,
        "timestamp": (BASE_TS + offset_seconds).to_string(),
        "recipient_id": "15551234567",
        "pricing": {"billable": true, "pricing_model": "CBP", "category": "marketing"}
    })
}

pub fn failed_status(external_id: &str, offset_seconds: i64, code: i64, title: &str) -> Value {
    let mut entry = status(external_id, "failed", offset_seconds);
    entry["errors"] = json!([{"code": code, "title": title}]);
    entry
}

pub fn status_payload(statuses: Vec<Value>) -> Value {
    envelope(json!({
        "messaging_product": "whatsapp",
        "metadata": metadata(),
        "statuses": statuses
    }))
}

/// Payload carrying a single status event
pub fn single_status(external_id: &str, status_name: &str, offset_seconds: i64) -> Value {
    status_payload(vec![status(external_id, status_name, offset_seconds)])
}

pub fn text_message(external_id: &str, from: &str, body: &str, offset_seconds: i64) -> Value {
    json!({
        "from": from,
        "id": external_id,
        "timestamp": (BASE_TS + offset_seconds).to_string(),
        "type": "text",
        "text": {"body": body}
    })
}

pub fn inbound_payload(from: &str, name: Option<&str>, messages: Vec<Value>) -> Value {
    let contacts = match name {
        Some(name) => json!([{"wa_id": from, "profile": {"name": name}}]),
        None => json!([]),
    };
    envelope(json!({
        "messaging_product": "whatsapp",
        "metadata": metadata(),
        "contacts": contacts,
        "messages": messages
    }))
}

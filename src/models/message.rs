//! # Message Model
//!
//! Canonical record of one outbound or inbound message. `external_id` is the
//! provider's message identifier and the correlation key for every status
//! event; it is unique across the table.

use crate::state_machine::{MessageDirection, MessageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub external_id: Option<String>,
    pub direction: MessageDirection,
    pub status: MessageStatus,
    pub user_id: i64,
    pub contact_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub campaign_id: Option<i64>,
    /// Provider type tag (`text`, `image`, `template`, ...)
    pub message_type: String,
    pub content: serde_json::Value,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn is_outgoing(&self) -> bool {
        self.direction == MessageDirection::Outgoing
    }
}

/// Outbound message as recorded by the send path before the provider answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboundMessage {
    pub user_id: i64,
    pub external_id: Option<String>,
    pub contact_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub message_type: String,
    pub content: serde_json::Value,
}

/// Inbound message produced by the ingestor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInboundMessage {
    pub user_id: i64,
    pub external_id: String,
    pub contact_id: i64,
    pub conversation_id: i64,
    pub message_type: String,
    pub content: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

//! # Inbound Message Ingestor
//!
//! Turns inbound provider messages into stored messages. The owning user is
//! resolved from the routing metadata, the sender becomes a contact matched
//! on phone digits, and the conversation is keyed by `(user_id, contact_id)`.

use crate::constants::events::MESSAGE_RECEIVED;
use crate::error::{DeliveryError, Result};
use crate::events::NotificationBridge;
use crate::models::{Message, NewInboundMessage};
use crate::payload::{ContactMeta, InboundMessage, PayloadError, RoutingMetadata};
use crate::store::{DeliveryStore, InboundInsert};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Strip everything but ASCII digits
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

pub struct InboundIngestor {
    store: Arc<dyn DeliveryStore>,
    notifier: Arc<dyn NotificationBridge>,
}

impl InboundIngestor {
    pub fn new(store: Arc<dyn DeliveryStore>, notifier: Arc<dyn NotificationBridge>) -> Self {
        Self { store, notifier }
    }

    /// Ingest every message of a batch, pairing each with its sender profile
    pub async fn ingest_batch(
        &self,
        routing: &RoutingMetadata,
        contacts: &[ContactMeta],
        messages: &[InboundMessage],
    ) -> Result<Vec<Message>> {
        let mut stored = Vec::with_capacity(messages.len());
        for message in messages {
            let sender = normalize_phone(&message.from);
            let profile = contacts
                .iter()
                .find(|c| normalize_phone(&c.wa_id) == sender);
            stored.push(self.ingest(message, profile, routing).await?);
        }
        Ok(stored)
    }

    #[instrument(
        skip_all,
        fields(
            external_id = %message.external_id,
            phone_number_id = %routing.phone_number_id
        )
    )]
    pub async fn ingest(
        &self,
        message: &InboundMessage,
        contact: Option<&ContactMeta>,
        routing: &RoutingMetadata,
    ) -> Result<Message> {
        let account = self
            .store
            .find_account(&routing.phone_number_id)
            .await?
            .ok_or_else(|| DeliveryError::UnknownAccount {
                phone_number_id: routing.phone_number_id.clone(),
            })?;

        let phone = normalize_phone(&message.from);
        if phone.is_empty() {
            return Err(PayloadError::Shape(format!(
                "sender '{}' of message {} has no digits",
                message.from, message.external_id
            ))
            .into());
        }

        if let Some(existing) = self
            .store
            .find_message_by_external_id(&message.external_id)
            .await?
        {
            debug!(message_id = existing.id, "Inbound message already stored");
            return Ok(existing);
        }

        let name = contact.and_then(|c| c.name.as_deref());
        let contact = self
            .store
            .upsert_contact(account.user_id, &phone, name)
            .await?;
        let conversation = self
            .store
            .upsert_conversation(account.user_id, contact.id, &phone)
            .await?;

        let content = serde_json::to_value(&message.content)
            .map_err(|e| PayloadError::Shape(e.to_string()))?;

        let inserted = self
            .store
            .insert_inbound(NewInboundMessage {
                user_id: account.user_id,
                external_id: message.external_id.clone(),
                contact_id: contact.id,
                conversation_id: conversation.id,
                message_type: message.message_type.clone(),
                content,
                received_at: message.timestamp,
            })
            .await?;

        match inserted {
            InboundInsert::Inserted(stored) => {
                info!(
                    message_id = stored.id,
                    contact_id = contact.id,
                    conversation_id = conversation.id,
                    "Inbound message stored"
                );
                self.notifier
                    .publish(
                        MESSAGE_RECEIVED,
                        json!({
                            "message_id": stored.id,
                            "external_id": stored.external_id,
                            "user_id": stored.user_id,
                            "contact_id": contact.id,
                            "conversation_id": conversation.id,
                            "message_type": stored.message_type,
                            "preview": message.content.preview(),
                        }),
                    )
                    .await;
                Ok(stored)
            }
            InboundInsert::Existing(existing) => {
                debug!(message_id = existing.id, "Inbound message stored concurrently");
                Ok(existing)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_keeps_digits_only() {
        assert_eq!(normalize_phone("+1 (555) 123-4567"), "15551234567");
        assert_eq!(normalize_phone("15551234567"), "15551234567");
        assert_eq!(normalize_phone("n/a"), "");
    }
}

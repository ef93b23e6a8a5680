//! Typed provider events.

use super::provider::{RawChangeValue, RawEnvelope, RawMessage, RawStatus};
use super::PayloadError;
use crate::state_machine::MessageStatus;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numbering identifiers that route an event to its owning account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingMetadata {
    pub phone_number_id: String,
    pub display_phone_number: Option<String>,
}

/// Pricing block attached to status events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub billable: bool,
    pub category: Option<String>,
}

/// First error reported on a failed status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusError {
    pub code: String,
    pub message: String,
}

/// One status notification about an outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub external_id: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    pub recipient_id: Option<String>,
    pub pricing: Option<Pricing>,
    pub error: Option<StatusError>,
}

/// Sender profile shipped alongside inbound messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactMeta {
    pub wa_id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
        }
    }
}

/// Type-specific content of an inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundContent {
    Text {
        body: String,
    },
    Media {
        media: MediaKind,
        media_id: String,
        mime_type: Option<String>,
        caption: Option<String>,
        filename: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
        address: Option<String>,
    },
    Contacts {
        cards: Value,
    },
    Interactive {
        reply_type: String,
        reply_id: String,
        title: String,
    },
    Button {
        text: String,
        payload: Option<String>,
    },
    Reaction {
        message_id: String,
        /// Empty when the sender removed a reaction
        emoji: Option<String>,
    },
    Unsupported {
        message_type: String,
    },
}

impl InboundContent {
    /// Short human readable preview for notifications
    pub fn preview(&self) -> String {
        match self {
            Self::Text { body } => body.clone(),
            Self::Media { media, caption, .. } => caption
                .clone()
                .unwrap_or_else(|| format!("[{}]", media.as_str())),
            Self::Location { name, .. } => name.clone().unwrap_or_else(|| "[location]".to_string()),
            Self::Contacts { .. } => "[contacts]".to_string(),
            Self::Interactive { title, .. } => title.clone(),
            Self::Button { text, .. } => text.clone(),
            Self::Reaction { emoji, .. } => emoji.clone().unwrap_or_default(),
            Self::Unsupported { message_type } => format!("[{message_type}]"),
        }
    }
}

/// One inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub external_id: String,
    pub from: String,
    pub timestamp: DateTime<Utc>,
    pub message_type: String,
    pub content: InboundContent,
}

/// A decoded provider change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProviderEvent {
    StatusBatch {
        routing: RoutingMetadata,
        statuses: Vec<StatusEvent>,
    },
    InboundBatch {
        routing: RoutingMetadata,
        contacts: Vec<ContactMeta>,
        messages: Vec<InboundMessage>,
    },
}

/// Decode a raw provider payload, failing closed on any unrecognized shape
pub fn decode(payload: &Value) -> Result<Vec<ProviderEvent>, PayloadError> {
    let envelope: RawEnvelope =
        serde_json::from_value(payload.clone()).map_err(|e| PayloadError::Shape(e.to_string()))?;

    let mut events = Vec::new();
    for entry in envelope.entry {
        for change in entry.changes {
            let field = change.field.unwrap_or_else(|| "unknown".to_string());
            events.extend(decode_change(&field, change.value)?);
        }
    }

    if events.is_empty() {
        return Err(PayloadError::NoEntries);
    }
    Ok(events)
}

fn decode_change(field: &str, value: RawChangeValue) -> Result<Vec<ProviderEvent>, PayloadError> {
    if value.statuses.is_empty() && value.messages.is_empty() {
        return Err(PayloadError::UnrecognizedChange {
            field: field.to_string(),
        });
    }

    let metadata = value.metadata.ok_or(PayloadError::MissingRouting)?;
    let routing = RoutingMetadata {
        phone_number_id: metadata.phone_number_id,
        display_phone_number: metadata.display_phone_number,
    };

    let mut events = Vec::new();

    if !value.statuses.is_empty() {
        let statuses = value
            .statuses
            .into_iter()
            .map(decode_status)
            .collect::<Result<Vec<_>, _>>()?;
        events.push(ProviderEvent::StatusBatch {
            routing: routing.clone(),
            statuses,
        });
    }

    if !value.messages.is_empty() {
        let contacts = value
            .contacts
            .into_iter()
            .map(|c| ContactMeta {
                wa_id: c.wa_id,
                name: c.profile.and_then(|p| p.name).filter(|n| !n.trim().is_empty()),
            })
            .collect();
        let messages = value
            .messages
            .into_iter()
            .map(decode_message)
            .collect::<Result<Vec<_>, _>>()?;
        events.push(ProviderEvent::InboundBatch {
            routing,
            contacts,
            messages,
        });
    }

    Ok(events)
}

fn decode_status(raw: RawStatus) -> Result<StatusEvent, PayloadError> {
    let status = raw
        .status
        .parse::<MessageStatus>()
        .ok()
        // The provider never reports `queued`; only the send path assigns it
        .filter(|s| *s != MessageStatus::Queued)
        .ok_or_else(|| PayloadError::UnknownStatus {
            external_id: raw.id.clone(),
            status: raw.status.clone(),
        })?;

    let error = raw.errors.into_iter().next().map(|e| StatusError {
        code: match e.code {
            Value::String(s) => s,
            other => other.to_string(),
        },
        message: e.message.or(e.title).unwrap_or_default(),
    });

    Ok(StatusEvent {
        external_id: raw.id,
        status,
        timestamp: to_datetime(raw.timestamp)?,
        recipient_id: raw.recipient_id,
        pricing: raw.pricing.map(|p| Pricing {
            billable: p.billable,
            category: p.category,
        }),
        error,
    })
}

fn decode_message(raw: RawMessage) -> Result<InboundMessage, PayloadError> {
    let content = decode_content(&raw.kind, &raw.rest);
    Ok(InboundMessage {
        external_id: raw.id,
        from: raw.from,
        timestamp: to_datetime(raw.timestamp)?,
        message_type: raw.kind,
        content,
    })
}

fn str_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

fn decode_content(kind: &str, rest: &serde_json::Map<String, Value>) -> InboundContent {
    let body = rest.get(kind).cloned().unwrap_or(Value::Null);
    let unsupported = || InboundContent::Unsupported {
        message_type: kind.to_string(),
    };

    let media = match kind {
        "image" => Some(MediaKind::Image),
        "video" => Some(MediaKind::Video),
        "audio" => Some(MediaKind::Audio),
        "document" => Some(MediaKind::Document),
        "sticker" => Some(MediaKind::Sticker),
        _ => None,
    };
    if let Some(media) = media {
        return match str_field(&body, "id") {
            Some(media_id) => InboundContent::Media {
                media,
                media_id,
                mime_type: str_field(&body, "mime_type"),
                caption: str_field(&body, "caption"),
                filename: str_field(&body, "filename"),
            },
            None => unsupported(),
        };
    }

    match kind {
        "text" => str_field(&body, "body")
            .map(|body| InboundContent::Text { body })
            .unwrap_or_else(unsupported),
        "location" => match (
            body.get("latitude").and_then(Value::as_f64),
            body.get("longitude").and_then(Value::as_f64),
        ) {
            (Some(latitude), Some(longitude)) => InboundContent::Location {
                latitude,
                longitude,
                name: str_field(&body, "name"),
                address: str_field(&body, "address"),
            },
            _ => unsupported(),
        },
        "contacts" => InboundContent::Contacts { cards: body },
        "interactive" => {
            let reply_type = str_field(&body, "type").unwrap_or_default();
            match body.get(&reply_type) {
                Some(reply) => match (str_field(reply, "id"), str_field(reply, "title")) {
                    (Some(reply_id), Some(title)) => InboundContent::Interactive {
                        reply_type,
                        reply_id,
                        title,
                    },
                    _ => unsupported(),
                },
                None => unsupported(),
            }
        }
        "button" => match str_field(&body, "text") {
            Some(text) => InboundContent::Button {
                text,
                payload: str_field(&body, "payload"),
            },
            None => unsupported(),
        },
        "reaction" => match str_field(&body, "message_id") {
            Some(message_id) => InboundContent::Reaction {
                message_id,
                emoji: str_field(&body, "emoji").filter(|e| !e.is_empty()),
            },
            None => unsupported(),
        },
        _ => unsupported(),
    }
}

fn to_datetime(seconds: i64) -> Result<DateTime<Utc>, PayloadError> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| PayloadError::InvalidTimestamp {
            value: seconds.to_string(),
        })
}

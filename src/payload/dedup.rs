//! Deduplication key derivation.
//!
//! Keys are computed from the raw JSON before decoding, so even a payload
//! that later fails to decode gets a stable identity. Status keys include the
//! status value: `sent` and `delivered` for the same message are distinct
//! events that must both be processed.

use crate::constants::dedup::{BATCH_PREFIX, FALLBACK_PREFIX, MESSAGE_PREFIX, STATUS_PREFIX};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// One provider event found in a payload, ordered for a stable batch digest
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum EventId<'a> {
    Message(&'a str),
    Status(&'a str, &'a str),
}

impl EventId<'_> {
    fn key(&self) -> String {
        match self {
            Self::Message(id) => format!("{MESSAGE_PREFIX}{id}"),
            Self::Status(id, status) => format!("{STATUS_PREFIX}{id}:{status}"),
        }
    }
}

/// Derive the deduplication key for a raw provider payload
///
/// - `msg:<id>` when the payload carries exactly one inbound message
/// - `status:<id>:<status>` when it carries exactly one status
/// - `batch:<uuid-v5>` when it carries several events; the digest covers
///   every message id and `(id, status)` pair across all entries and changes,
///   so only a redelivery of the same set collapses
/// - `fallback:<uuid>` when no identifier can be found; such payloads are
///   never deduplicated
pub fn derive_dedup_key(payload: &Value) -> String {
    let events = event_ids(payload);
    let mut iter = events.iter();
    match (iter.next(), iter.next()) {
        (None, _) => format!("{FALLBACK_PREFIX}{}", Uuid::new_v4()),
        (Some(only), None) => only.key(),
        (Some(_), Some(_)) => {
            let digest = events
                .iter()
                .map(EventId::key)
                .collect::<Vec<_>>()
                .join("\n");
            let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, digest.as_bytes());
            format!("{BATCH_PREFIX}{id}")
        }
    }
}

fn event_ids(payload: &Value) -> BTreeSet<EventId<'_>> {
    let mut ids = BTreeSet::new();
    let values = array(payload, "entry")
        .flat_map(|entry| array(entry, "changes"))
        .filter_map(|change| change.get("value"));

    for value in values {
        for message in array(value, "messages") {
            if let Some(id) = non_empty_str(message, "id") {
                ids.insert(EventId::Message(id));
            }
        }
        for status in array(value, "statuses") {
            if let Some(id) = non_empty_str(status, "id") {
                let state = non_empty_str(status, "status").unwrap_or("unknown");
                ids.insert(EventId::Status(id, state));
            }
        }
    }
    ids
}

fn array<'a>(value: &'a Value, field: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Whether a key was generated without a provider identifier
pub fn is_fallback_key(key: &str) -> bool {
    key.starts_with(FALLBACK_PREFIX)
}

fn non_empty_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

//! Raw provider envelope as it arrives on the wire.
//!
//! These types mirror the provider JSON closely and are only used inside
//! [`super::event::decode`]; the rest of the crate sees typed events.

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<RawEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<RawChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChange {
    #[serde(default)]
    pub field: Option<String>,
    pub value: RawChangeValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawChangeValue {
    #[serde(default)]
    pub messaging_product: Option<String>,
    #[serde(default)]
    pub metadata: Option<RawMetadata>,
    #[serde(default)]
    pub contacts: Vec<RawContact>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
    #[serde(default)]
    pub statuses: Vec<RawStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMetadata {
    #[serde(default)]
    pub display_phone_number: Option<String>,
    pub phone_number_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawContact {
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<RawProfile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawProfile {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub from: String,
    pub id: String,
    #[serde(deserialize_with = "unix_seconds")]
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific body lives under a key named after `kind`
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStatus {
    pub id: String,
    pub status: String,
    #[serde(deserialize_with = "unix_seconds")]
    pub timestamp: i64,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub pricing: Option<RawPricing>,
    #[serde(default)]
    pub errors: Vec<RawError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPricing {
    #[serde(default = "default_billable")]
    pub billable: bool,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_billable() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawError {
    pub code: serde_json::Value,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The provider sends unix seconds as a string; tolerate plain integers too
fn unix_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| D::Error::custom(format!("invalid unix timestamp '{n}'"))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| D::Error::custom(format!("invalid unix timestamp '{s}'"))),
        other => Err(D::Error::custom(format!("invalid unix timestamp '{other}'"))),
    }
}

//! # Provider Payload Decoding
//!
//! The provider delivers arbitrary nested JSON. This module turns it into
//! typed [`ProviderEvent`]s at the ingress boundary and fails closed: a shape
//! it does not recognise is a [`PayloadError`], which the pipeline treats as
//! a permanent per-event failure instead of passing loosely typed data on.

pub mod dedup;
pub mod event;
pub mod provider;

pub use dedup::{derive_dedup_key, is_fallback_key};
pub use event::{
    decode, ContactMeta, InboundContent, InboundMessage, MediaKind, Pricing, ProviderEvent,
    RoutingMetadata, StatusError, StatusEvent,
};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("payload does not match the provider envelope: {0}")]
    Shape(String),

    #[error("payload contains no entries")]
    NoEntries,

    #[error("change '{field}' carries neither statuses nor messages")]
    UnrecognizedChange { field: String },

    #[error("unknown status '{status}' for message {external_id}")]
    UnknownStatus { external_id: String, status: String },

    #[error("invalid unix timestamp '{value}'")]
    InvalidTimestamp { value: String },

    #[error("missing routing metadata (phone_number_id)")]
    MissingRouting,
}

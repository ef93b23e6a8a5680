//! # Error Types
//!
//! Crate-wide error handling for the delivery event core.
//!
//! Errors carry an [`ErrorClass`] so the worker pool can decide between
//! retrying a job and abandoning it. Business-rule rejections (a declined
//! debit, a regressive status event) are never errors; they are returned as
//! ordinary outcome enums by the components that produce them.

use crate::config::ConfigurationError;
use crate::payload::PayloadError;
use crate::store::StoreError;
use thiserror::Error;

/// How the worker pool must treat a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Store unavailable, collaborator call failed, timeout: retry with backoff
    Transient,
    /// Malformed payload, unknown message or account: record and give up
    Permanent,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed provider payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Unresolvable status event(s) for unknown message(s): {}", external_ids.join(", "))]
    UnknownMessage { external_ids: Vec<String> },

    #[error("No account is registered for phone number id {phone_number_id}")]
    UnknownAccount { phone_number_id: String },

    #[error("Event log record {event_log_id} not found")]
    EventLogNotFound { event_log_id: i64 },

    #[error("Processing timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("Message {external_id} kept changing concurrently; gave up after {attempts} attempts")]
    ContentionExhausted { external_id: String, attempts: u32 },

    #[error("Worker error: {0}")]
    Worker(String),
}

impl DeliveryError {
    /// Classify this error per the retry policy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Store(err) if err.is_transient() => ErrorClass::Transient,
            Self::Store(_) => ErrorClass::Permanent,
            Self::Payload(_)
            | Self::UnknownMessage { .. }
            | Self::UnknownAccount { .. }
            | Self::EventLogNotFound { .. }
            | Self::Configuration(_) => ErrorClass::Permanent,
            Self::Timeout { .. } | Self::ContentionExhausted { .. } | Self::Worker(_) => {
                ErrorClass::Transient
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

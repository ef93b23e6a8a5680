//! # System Constants
//!
//! Event names, dedup key prefixes and notes written to the event log.

/// Notification events published for real-time observers
pub mod events {
    /// A status transition was applied to a message
    pub const MESSAGE_STATUS: &str = "message:status";
    /// A new inbound message was stored
    pub const MESSAGE_RECEIVED: &str = "message:received";
}

/// Dedup key prefixes
pub mod dedup {
    pub const MESSAGE_PREFIX: &str = "msg:";
    pub const STATUS_PREFIX: &str = "status:";
    /// Payloads carrying more than one event
    pub const BATCH_PREFIX: &str = "batch:";
    pub const FALLBACK_PREFIX: &str = "fallback:";
}

/// Notes stored on `PROCESSED` event log records that ran no downstream effect
pub mod notes {
    pub const SUPERSEDED: &str = "superseded: duplicate of an already queued event";
}

/// Upper bound of stale records re-enqueued by one reconciliation sweep
pub const RECONCILIATION_BATCH_SIZE: i64 = 500;

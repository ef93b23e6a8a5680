//! # Notifications
//!
//! Fire-and-forget notifications for real-time observers. Publishing never
//! fails from the caller's point of view and never blocks processing.

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};

use async_trait::async_trait;
use serde_json::Value;

/// Outbound notification seam
#[async_trait]
pub trait NotificationBridge: Send + Sync {
    async fn publish(&self, event_name: &str, payload: Value);
}

/// Bridge that drops every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBridge;

#[async_trait]
impl NotificationBridge for NoopBridge {
    async fn publish(&self, _event_name: &str, _payload: Value) {}
}

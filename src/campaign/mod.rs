//! # Campaign Aggregator
//!
//! Campaign counters are derived from message timestamps:
//!
//! | counter     | counts messages with        |
//! |-------------|-----------------------------|
//! | `sent`      | `sent_at` set               |
//! | `delivered` | `delivered_at` set          |
//! | `read`      | `read_at` set               |
//! | `failed`    | status `failed`             |
//!
//! The incremental path adds one for every timestamp a transition newly sets
//! (plus one `failed` when the message fails), inside the same commit as the
//! transition. Recompute counts the same columns from scratch. Since each
//! timestamp is written at most once, both paths land on the same numbers
//! regardless of event order; reconciliation recomputes periodically to
//! correct any drift.

use crate::error::Result;
use crate::models::{CampaignCounters, Message};
use crate::state_machine::{MessageStatus, TransitionDecision, TransitionKind};
use crate::store::{DeliveryStore, TimestampUpdates};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Timestamps an applied decision writes, limited to those still unset
pub fn plan_timestamps(
    message: &Message,
    decision: &TransitionDecision,
    at: DateTime<Utc>,
) -> TimestampUpdates {
    let mut updates = TimestampUpdates::default();
    if !decision.apply {
        return updates;
    }

    match decision.new_status {
        MessageStatus::Sent => updates.sent_at = Some(at),
        MessageStatus::Delivered => updates.delivered_at = Some(at),
        MessageStatus::Read => {
            updates.read_at = Some(at);
            if decision.backfills_delivery {
                updates.delivered_at = Some(at);
            }
        }
        MessageStatus::Failed => updates.failed_at = Some(at),
        MessageStatus::Queued => {}
    }

    if message.sent_at.is_some() {
        updates.sent_at = None;
    }
    if message.delivered_at.is_some() {
        updates.delivered_at = None;
    }
    if message.read_at.is_some() {
        updates.read_at = None;
    }
    if message.failed_at.is_some() {
        updates.failed_at = None;
    }
    updates
}

/// Counter change for one applied transition
pub fn counter_delta(
    message: &Message,
    decision: &TransitionDecision,
    updates: &TimestampUpdates,
) -> CampaignCounters {
    let newly_failed = decision.apply
        && decision.kind == TransitionKind::Fail
        && message.status != MessageStatus::Failed;

    CampaignCounters {
        sent: i64::from(updates.sent_at.is_some()),
        delivered: i64::from(updates.delivered_at.is_some()),
        read: i64::from(updates.read_at.is_some()),
        failed: i64::from(newly_failed),
    }
}

/// Counters rebuilt from a set of messages
pub fn counters_from_messages<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
) -> CampaignCounters {
    messages
        .into_iter()
        .fold(CampaignCounters::default(), |mut acc, m| {
            acc.sent += i64::from(m.sent_at.is_some());
            acc.delivered += i64::from(m.delivered_at.is_some());
            acc.read += i64::from(m.read_at.is_some());
            acc.failed += i64::from(m.status == MessageStatus::Failed);
            acc
        })
}

/// Full recomputation against the store
#[derive(Clone)]
pub struct CampaignAggregator {
    store: Arc<dyn DeliveryStore>,
}

impl CampaignAggregator {
    pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
        Self { store }
    }

    /// Overwrite a campaign's counters from its messages, logging any drift
    #[instrument(skip(self))]
    pub async fn recompute(&self, campaign_id: i64) -> Result<CampaignCounters> {
        let before = self
            .store
            .get_campaign(campaign_id)
            .await?
            .map(|c| c.counters);
        let after = self.store.recompute_campaign(campaign_id).await?;

        match before {
            Some(before) if before != after => info!(
                campaign_id,
                ?before,
                ?after,
                "Campaign counters corrected by recompute"
            ),
            _ => debug!(campaign_id, ?after, "Campaign counters recomputed"),
        }
        Ok(after)
    }
}

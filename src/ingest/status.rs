//! # Status Pipeline
//!
//! Applies provider status events to messages with compare-and-apply:
//!
//! 1. read the message by external id
//! 2. decide with [`next_status`]
//! 3. commit the transition conditioned on the status that was read
//!
//! If another worker changed the message in between, the commit reports a
//! conflict and the event is re-decided against the fresh row. Two workers can
//! therefore handle events for the same message concurrently without either
//! overwriting the other's progress.

use crate::billing::{log_debit_outcome, BillingPolicy};
use crate::campaign::{counter_delta, plan_timestamps};
use crate::constants::events::MESSAGE_STATUS;
use crate::error::{DeliveryError, Result};
use crate::events::NotificationBridge;
use crate::models::{DebitOutcome, Message};
use crate::payload::StatusEvent;
use crate::state_machine::{next_status, MessageStatus, TransitionDecision, TransitionKind};
use crate::store::{CommitOutcome, DeliveryStore, PlannedTransition};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Result of applying one status event
#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    Applied {
        message: Message,
        decision: TransitionDecision,
        debit: DebitOutcome,
    },
    /// Duplicate, regressive or absorbed; expected under out-of-order delivery
    Discarded {
        message_id: i64,
        kind: TransitionKind,
    },
    /// No message carries this external id; nothing is created
    UnknownMessage { external_id: String },
}

/// Counts for one batch of status events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub applied: usize,
    pub discarded: usize,
    pub unknown: Vec<String>,
}

pub struct StatusPipeline {
    store: Arc<dyn DeliveryStore>,
    notifier: Arc<dyn NotificationBridge>,
    billing: BillingPolicy,
    max_attempts: u32,
}

impl StatusPipeline {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        notifier: Arc<dyn NotificationBridge>,
        billing: BillingPolicy,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            notifier,
            billing,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Apply every status of a batch
    ///
    /// Resolvable statuses are applied even when others in the batch reference
    /// unknown messages; the batch then fails permanently naming the unknown
    /// ids. Store errors abort the batch so the job is retried; statuses that
    /// were already applied come back as no-ops on the retry.
    pub async fn process_batch(&self, statuses: &[StatusEvent]) -> Result<StatusReport> {
        let mut report = StatusReport::default();

        for event in statuses {
            match self.apply(event).await? {
                StatusOutcome::Applied { .. } => report.applied += 1,
                StatusOutcome::Discarded { .. } => report.discarded += 1,
                StatusOutcome::UnknownMessage { external_id } => report.unknown.push(external_id),
            }
        }

        if !report.unknown.is_empty() {
            return Err(DeliveryError::UnknownMessage {
                external_ids: report.unknown,
            });
        }
        Ok(report)
    }

    #[instrument(
        skip(self, event),
        fields(external_id = %event.external_id, incoming = %event.status)
    )]
    pub async fn apply(&self, event: &StatusEvent) -> Result<StatusOutcome> {
        for attempt in 1..=self.max_attempts {
            let Some(message) = self
                .store
                .find_message_by_external_id(&event.external_id)
                .await?
            else {
                info!("Status event references an unknown message; discarded");
                return Ok(StatusOutcome::UnknownMessage {
                    external_id: event.external_id.clone(),
                });
            };

            let decision = next_status(message.status, event.status);
            if !decision.apply {
                debug!(
                    message_id = message.id,
                    current = %message.status,
                    kind = ?decision.kind,
                    "Status event discarded"
                );
                return Ok(StatusOutcome::Discarded {
                    message_id: message.id,
                    kind: decision.kind,
                });
            }

            let plan = self.plan(&message, &decision, event);
            match self.store.commit_transition(plan).await? {
                CommitOutcome::Committed { message, debit } => {
                    if let Some(external_id) = message.external_id.as_deref() {
                        if !matches!(debit, DebitOutcome::Skipped) {
                            log_debit_outcome(message.user_id, external_id, &debit);
                        }
                    }
                    info!(
                        message_id = message.id,
                        status = %message.status,
                        backfilled_delivery = decision.backfills_delivery,
                        "Status transition applied"
                    );
                    self.notify(&message).await;
                    return Ok(StatusOutcome::Applied {
                        message,
                        decision,
                        debit,
                    });
                }
                CommitOutcome::Conflict { current_status } => {
                    debug!(
                        message_id = message.id,
                        expected = %message.status,
                        current = %current_status,
                        attempt,
                        "Message changed concurrently; re-deciding"
                    );
                }
            }
        }

        Err(DeliveryError::ContentionExhausted {
            external_id: event.external_id.clone(),
            attempts: self.max_attempts,
        })
    }

    fn plan(
        &self,
        message: &Message,
        decision: &TransitionDecision,
        event: &StatusEvent,
    ) -> PlannedTransition {
        let timestamps = plan_timestamps(message, decision, event.timestamp);
        let counter_delta = counter_delta(message, decision, &timestamps);
        let failure = event
            .error
            .as_ref()
            .filter(|_| decision.new_status == MessageStatus::Failed);

        PlannedTransition {
            message_id: message.id,
            expected_status: message.status,
            new_status: decision.new_status,
            timestamps,
            error_code: failure.map(|e| e.code.clone()),
            error_message: failure.map(|e| e.message.clone()),
            campaign_id: message.campaign_id,
            counter_delta,
            debit: self
                .billing
                .debit_for(message, decision, event.pricing.as_ref()),
        }
    }

    async fn notify(&self, message: &Message) {
        self.notifier
            .publish(
                MESSAGE_STATUS,
                json!({
                    "message_id": message.id,
                    "external_id": message.external_id,
                    "user_id": message.user_id,
                    "campaign_id": message.campaign_id,
                    "status": message.status,
                    "error_code": message.error_code,
                    "error_message": message.error_message,
                }),
            )
            .await;
    }
}

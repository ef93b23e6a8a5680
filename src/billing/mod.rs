//! # Billing
//!
//! Decides when a status transition costs money and how much, and wraps the
//! wallet ledger for direct callers.
//!
//! A message is billed exactly once: the first time an outgoing message
//! leaves `queued` for an acknowledged status (`sent`, `delivered` or `read`).
//! The message's external id is the idempotency key, so redelivered or
//! concurrent status events collapse onto one ledger row.

use crate::config::BillingConfig;
use crate::models::{DebitOutcome, DebitRequest, DeclineReason, Message};
use crate::payload::Pricing;
use crate::state_machine::{MessageStatus, TransitionDecision};
use crate::store::DeliveryStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pricing rules resolved from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BillingPolicy {
    pub default_message_cost: f64,
    pub category_costs: HashMap<String, f64>,
    pub allow_overdraft: bool,
}

impl BillingPolicy {
    pub fn from_config(config: &BillingConfig) -> Self {
        Self {
            default_message_cost: config.default_message_cost,
            category_costs: config.category_costs.clone(),
            allow_overdraft: config.allow_overdraft,
        }
    }

    /// Cost of one message; `None` when the provider marked it non-billable
    pub fn price(&self, pricing: Option<&Pricing>) -> Option<f64> {
        match pricing {
            Some(p) if !p.billable => None,
            Some(p) => Some(
                p.category
                    .as_deref()
                    .and_then(|category| self.category_costs.get(&category.to_ascii_lowercase()))
                    .copied()
                    .unwrap_or(self.default_message_cost),
            ),
            None => Some(self.default_message_cost),
        }
    }

    /// The debit owed for applying `decision` to `message`, if any
    pub fn debit_for(
        &self,
        message: &Message,
        decision: &TransitionDecision,
        pricing: Option<&Pricing>,
    ) -> Option<DebitRequest> {
        if !triggers_debit(message, decision) {
            return None;
        }
        let external_id = message.external_id.as_deref()?;
        let amount = self.price(pricing)?;
        Some(
            DebitRequest::new(message.user_id, amount, external_id)
                .with_overdraft(self.allow_overdraft),
        )
    }
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self::from_config(&BillingConfig::default())
    }
}

/// First acknowledgement of an outgoing message
pub fn triggers_debit(message: &Message, decision: &TransitionDecision) -> bool {
    message.is_outgoing()
        && decision.apply
        && message.status == MessageStatus::Queued
        && decision.new_status.is_acknowledged()
}

/// Ledger access for callers outside the status pipeline
///
/// Backend failures are logged and reported as a declined debit, never as an
/// error, so billing can't block delivery tracking.
pub struct BillingService {
    store: Arc<dyn DeliveryStore>,
    policy: BillingPolicy,
}

impl BillingService {
    pub fn new(store: Arc<dyn DeliveryStore>, policy: BillingPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &BillingPolicy {
        &self.policy
    }

    pub async fn debit(&self, user_id: i64, amount: f64, idempotency_key: &str) -> DebitOutcome {
        let request = DebitRequest::new(user_id, amount, idempotency_key)
            .with_overdraft(self.policy.allow_overdraft);

        let outcome = match self.store.debit(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(user_id, idempotency_key, error = %e, "Wallet debit failed");
                DebitOutcome::Declined {
                    reason: DeclineReason::Backend {
                        message: e.to_string(),
                    },
                }
            }
        };
        log_debit_outcome(user_id, idempotency_key, &outcome);
        outcome
    }

    pub async fn topup(&self, user_id: i64, amount: f64, idempotency_key: &str) -> DebitOutcome {
        let request = DebitRequest::new(user_id, amount, idempotency_key);
        match self.store.topup(&request).await {
            Ok(outcome) => {
                info!(user_id, idempotency_key, applied = outcome.applied(), "Wallet top-up");
                outcome
            }
            Err(e) => {
                warn!(user_id, idempotency_key, error = %e, "Wallet top-up failed");
                DebitOutcome::Declined {
                    reason: DeclineReason::Backend {
                        message: e.to_string(),
                    },
                }
            }
        }
    }
}

/// Declines are business outcomes and stay below `warn`
pub fn log_debit_outcome(user_id: i64, idempotency_key: &str, outcome: &DebitOutcome) {
    match outcome {
        DebitOutcome::Applied {
            transaction_id,
            balance_after,
        } => info!(
            user_id,
            idempotency_key,
            transaction_id,
            balance_after,
            "Wallet debited"
        ),
        DebitOutcome::AlreadyApplied { transaction_id } => debug!(
            user_id,
            idempotency_key,
            transaction_id,
            "Debit already applied for idempotency key"
        ),
        DebitOutcome::Declined {
            reason: DeclineReason::Backend { message },
        } => warn!(user_id, idempotency_key, error = %message, "Debit rolled back"),
        DebitOutcome::Declined { reason } => {
            info!(user_id, idempotency_key, reason = %reason, "Debit declined")
        }
        DebitOutcome::Skipped => debug!(user_id, idempotency_key, "Debit skipped"),
    }
}

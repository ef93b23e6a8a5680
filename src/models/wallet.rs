//! # Wallet Ledger Model
//!
//! Debit/top-up rows keyed by `(user_id, idempotency_key)`. The pair is unique
//! in every backend, so repeated or concurrent debits for the same trigger
//! collapse to one row and one balance change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Debit,
    Topup,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "DEBIT",
            Self::Topup => "TOPUP",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(Self::Debit),
            "TOPUP" => Ok(Self::Topup),
            _ => Err(format!("Invalid transaction type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub transaction_type: TransactionType,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Arguments of a debit or top-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebitRequest {
    pub user_id: i64,
    pub amount: f64,
    pub idempotency_key: String,
    /// Let a debit take the balance below zero
    #[serde(default)]
    pub allow_overdraft: bool,
}

impl DebitRequest {
    pub fn new(user_id: i64, amount: f64, idempotency_key: impl Into<String>) -> Self {
        Self {
            user_id,
            amount,
            idempotency_key: idempotency_key.into(),
            allow_overdraft: false,
        }
    }

    pub fn with_overdraft(mut self, allow_overdraft: bool) -> Self {
        self.allow_overdraft = allow_overdraft;
        self
    }

    /// Debits must be finite and non-negative
    pub fn amount_is_valid(&self) -> bool {
        self.amount.is_finite() && self.amount >= 0.0
    }

    /// Whether `balance` covers this debit under the overdraft policy
    pub fn is_covered_by(&self, balance: f64) -> bool {
        self.allow_overdraft || balance - self.amount >= 0.0
    }
}

/// Why a debit was not applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeclineReason {
    /// The user has no wallet
    NoBillingAccount,
    /// Applying the debit would take the balance below zero
    InsufficientBalance { balance: f64, amount: f64 },
    /// Amount was negative or not a number
    InvalidAmount { amount: f64 },
    /// The backend failed inside the debit; the savepoint was rolled back
    Backend { message: String },
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBillingAccount => write!(f, "no active billing account"),
            Self::InsufficientBalance { balance, amount } => {
                write!(f, "insufficient balance {balance} for debit of {amount}")
            }
            Self::InvalidAmount { amount } => write!(f, "invalid debit amount {amount}"),
            Self::Backend { message } => write!(f, "ledger backend error: {message}"),
        }
    }
}

/// Outcome of a ledger operation; declines are normal business outcomes, not errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DebitOutcome {
    Applied {
        transaction_id: i64,
        balance_after: f64,
    },
    /// A transaction with this idempotency key already exists
    AlreadyApplied { transaction_id: i64 },
    Declined { reason: DeclineReason },
    /// No debit was attempted (e.g. non-billable pricing)
    Skipped,
}

impl DebitOutcome {
    /// `true` only for the call that actually moved the balance
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn transaction_id(&self) -> Option<i64> {
        match self {
            Self::Applied { transaction_id, .. } | Self::AlreadyApplied { transaction_id } => {
                Some(*transaction_id)
            }
            Self::Declined { .. } | Self::Skipped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_applied_reports_applied() {
        let applied = DebitOutcome::Applied {
            transaction_id: 7,
            balance_after: 90.0,
        };
        let repeat = DebitOutcome::AlreadyApplied { transaction_id: 7 };
        let declined = DebitOutcome::Declined {
            reason: DeclineReason::NoBillingAccount,
        };

        assert!(applied.applied());
        assert!(!repeat.applied());
        assert!(!declined.applied());
        assert_eq!(applied.transaction_id(), repeat.transaction_id());
        assert_eq!(declined.transaction_id(), None);
    }

    #[test]
    fn test_decline_reason_display() {
        let reason = DeclineReason::InsufficientBalance {
            balance: 5.0,
            amount: 10.0,
        };
        assert_eq!(reason.to_string(), "insufficient balance 5 for debit of 10");
    }
}

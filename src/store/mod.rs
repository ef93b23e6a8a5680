//! # Durable Store
//!
//! Storage seams for the delivery core. Every component talks to the store
//! through the traits below, so the pipeline runs unchanged against Postgres
//! ([`postgres::PgStore`]) or the in-process [`memory::MemoryStore`].
//!
//! ## Atomicity contract
//!
//! Both backends guarantee the same atomic units:
//!
//! - **Enqueue**: at most one job per dedup key (unique constraint).
//! - **Claim**: a job is handed to at most one worker until its lock expires,
//!   and to no worker once its attempts are used up.
//! - **Debit / top-up**: the `(user_id, idempotency_key)` pair is unique; the
//!   transaction row and the balance change commit together or not at all.
//! - **Transition commit**: message status, timestamps, error fields and the
//!   campaign counter delta commit together, conditioned on the status the
//!   decision was made from. An attached debit runs in a nested unit so a
//!   declined or failed debit never undoes the status change.

use crate::models::{
    Account, Campaign, CampaignCounters, Contact, Conversation, DebitOutcome, DebitRequest,
    EnqueueOutcome, EventLogRecord, EventLogStatus, Message, NewInboundMessage, NewJob,
    NewOutboundMessage, QueueJob, RetryOutcome, WalletTransaction,
};
use crate::state_machine::MessageStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Every store trait, for callers holding a concrete backend
///
/// Importing [`DeliveryStore`] alone does not bring the methods of its
/// component traits into scope.
pub mod prelude {
    pub use super::{
        AccountDirectory, CampaignStore, ContactDirectory, ConversationDirectory, DeliveryStore,
        EventLogStore, JobQueue, MessageStore, WalletLedger,
    };
}

/// Backend failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached or the connection dropped
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back to a domain value
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// A uniqueness constraint fired where the caller did not expect one
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether retrying the same operation later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Database(_))
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_) => Self::Unavailable(err.to_string()),
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                id: "?".to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Corrupt(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Self::Constraint(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Timestamps a transition sets; each is only written when currently unset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampUpdates {
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl TimestampUpdates {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything one accepted status transition writes, committed as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTransition {
    pub message_id: i64,
    /// Status the decision was made from; the commit fails with
    /// [`CommitOutcome::Conflict`] if the row no longer holds it
    pub expected_status: MessageStatus,
    pub new_status: MessageStatus,
    pub timestamps: TimestampUpdates,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub campaign_id: Option<i64>,
    pub counter_delta: CampaignCounters,
    pub debit: Option<DebitRequest>,
}

/// Result of [`MessageStore::commit_transition`]
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed {
        message: Message,
        /// `Skipped` when no debit was attached
        debit: DebitOutcome,
    },
    /// The message status changed since it was read
    Conflict { current_status: MessageStatus },
}

/// Result of inserting an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundInsert {
    Inserted(Message),
    /// A message with the same external id already exists
    Existing(Message),
}

impl InboundInsert {
    pub fn message(&self) -> &Message {
        match self {
            Self::Inserted(m) | Self::Existing(m) => m,
        }
    }
}

/// Append-only log of accepted raw payloads
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Insert a record in `PENDING`
    async fn insert_event_log(&self, payload: &Value, dedup_key: &str)
        -> StoreResult<EventLogRecord>;

    async fn get_event_log(&self, id: i64) -> StoreResult<Option<EventLogRecord>>;

    /// Move a record to `PROCESSING`; `false` when it is already `PROCESSED`
    async fn mark_processing(&self, id: i64) -> StoreResult<bool>;

    /// Move a record to `PROCESSED`, with an optional note kept in `error`
    async fn mark_processed(&self, id: i64, note: Option<&str>) -> StoreResult<()>;

    /// Move a record to `FAILED`; a `PROCESSED` record is left untouched
    async fn mark_failed(&self, id: i64, error: &str) -> StoreResult<()>;

    /// `PENDING` records created before `older_than`, oldest first
    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<EventLogRecord>>;

    async fn count_event_logs(&self, status: EventLogStatus) -> StoreResult<i64>;
}

/// Deduplicating work queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job unless one with the same dedup key already exists
    async fn enqueue(&self, job: NewJob, max_attempts: u32) -> StoreResult<EnqueueOutcome>;

    /// Claim the next available job and lock it for `visibility_timeout`
    ///
    /// A running job whose lock expired is claimable again only while it has
    /// attempts left.
    async fn claim(&self, visibility_timeout: Duration) -> StoreResult<Option<QueueJob>>;

    /// Running jobs whose lock expired after their last allowed attempt
    ///
    /// Their worker never settled them, so nothing else will; reconciliation
    /// fails their records and abandons them.
    async fn exhausted_locks(&self, limit: i64) -> StoreResult<Vec<QueueJob>>;

    /// Mark a job completed
    async fn ack(&self, job_id: i64) -> StoreResult<()>;

    /// Requeue after `delay`, or abandon when the job is out of attempts
    async fn retry(&self, job_id: i64, delay: Duration, error: &str) -> StoreResult<RetryOutcome>;

    /// Give up on a job without further attempts
    async fn abandon(&self, job_id: i64, error: &str) -> StoreResult<()>;

    /// Delete completed and abandoned jobs last touched before `older_than`
    async fn purge_finished(&self, older_than: DateTime<Utc>) -> StoreResult<u64>;
}

/// Message rows and the atomic transition commit
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get_message(&self, id: i64) -> StoreResult<Option<Message>>;

    async fn find_message_by_external_id(&self, external_id: &str)
        -> StoreResult<Option<Message>>;

    /// Record an outbound message in `queued`, as the send path does
    async fn record_outbound(&self, message: NewOutboundMessage) -> StoreResult<Message>;

    /// Insert an inbound message and bump its conversation, unless the
    /// external id is already stored
    async fn insert_inbound(&self, message: NewInboundMessage) -> StoreResult<InboundInsert>;

    async fn commit_transition(&self, transition: PlannedTransition) -> StoreResult<CommitOutcome>;
}

/// Idempotent debit/top-up primitive
#[async_trait]
pub trait WalletLedger: Send + Sync {
    /// Open a wallet; an existing wallet is left unchanged
    async fn open_wallet(&self, user_id: i64, opening_balance: f64) -> StoreResult<()>;

    async fn balance(&self, user_id: i64) -> StoreResult<Option<f64>>;

    async fn debit(&self, request: &DebitRequest) -> StoreResult<DebitOutcome>;

    async fn topup(&self, request: &DebitRequest) -> StoreResult<DebitOutcome>;

    async fn transactions(&self, user_id: i64) -> StoreResult<Vec<WalletTransaction>>;
}

/// Campaign counters
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn create_campaign(&self, user_id: i64, name: &str) -> StoreResult<Campaign>;

    async fn get_campaign(&self, id: i64) -> StoreResult<Option<Campaign>>;

    /// Rebuild all four counters from the campaign's messages and overwrite them
    async fn recompute_campaign(&self, id: i64) -> StoreResult<CampaignCounters>;

    /// Campaigns with a message updated at or after `since`
    async fn campaigns_touched_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<i64>>;
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// Find or create the contact with these phone digits; fills a missing name
    async fn upsert_contact(
        &self,
        user_id: i64,
        phone: &str,
        name: Option<&str>,
    ) -> StoreResult<Contact>;
}

#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    /// Find or create the conversation for `(user_id, contact_id)`
    async fn upsert_conversation(
        &self,
        user_id: i64,
        contact_id: i64,
        phone: &str,
    ) -> StoreResult<Conversation>;

    async fn get_conversation(&self, id: i64) -> StoreResult<Option<Conversation>>;
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn register_account(&self, account: Account) -> StoreResult<()>;

    async fn find_account(&self, phone_number_id: &str) -> StoreResult<Option<Account>>;
}

/// Everything the delivery core needs from one backend
pub trait DeliveryStore:
    EventLogStore
    + JobQueue
    + MessageStore
    + WalletLedger
    + CampaignStore
    + ContactDirectory
    + ConversationDirectory
    + AccountDirectory
{
}

impl<T> DeliveryStore for T where
    T: EventLogStore
        + JobQueue
        + MessageStore
        + WalletLedger
        + CampaignStore
        + ContactDirectory
        + ConversationDirectory
        + AccountDirectory
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_transience() {
        assert!(StoreError::Unavailable("refused".into()).is_transient());
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Corrupt("bad".into()).is_transient());
        assert!(!StoreError::not_found("message", 3).is_transient());
        assert_eq!(
            StoreError::not_found("message", 3).to_string(),
            "message 3 not found"
        );
    }
}

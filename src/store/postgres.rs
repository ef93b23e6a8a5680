//! # Postgres Store
//!
//! [`DeliveryStore`](super::DeliveryStore) on PostgreSQL via `sqlx`.
//!
//! ## Guarantees
//!
//! - **Dedup queue**: `delivery_jobs.dedup_key` is unique and enqueue is
//!   `INSERT .. ON CONFLICT DO NOTHING`. Claims use `FOR UPDATE SKIP LOCKED`
//!   and set `locked_until`; an expired lock makes the job claimable again.
//! - **Wallet ledger**: `(user_id, idempotency_key)` is unique. The debit
//!   inserts the transaction row first and only then moves the balance, all
//!   inside one savepoint. Concurrent callers with the same key serialize on
//!   the unique index; the losers observe the conflict and report
//!   `AlreadyApplied`. No explicit locks are taken.
//! - **Transitions**: the message update is conditioned on the expected
//!   status (`WHERE status = $expected`) and commits together with the
//!   campaign delta. The debit runs in a nested savepoint, so its failure
//!   rolls back only the ledger rows.

use super::{
    AccountDirectory, CampaignStore, CommitOutcome, ContactDirectory, ConversationDirectory,
    EventLogStore, InboundInsert, JobQueue, MessageStore, PlannedTransition, StoreError,
    StoreResult, WalletLedger,
};
use crate::config::DatabaseConfig;
use crate::models::{
    Account, Campaign, CampaignCounters, Contact, Conversation, DebitOutcome, DebitRequest,
    DeclineReason, EnqueueOutcome, EventLogRecord, EventLogStatus, JobStatus, Message,
    NewInboundMessage, NewJob, NewOutboundMessage, QueueJob, RetryOutcome, WalletTransaction,
};
use crate::state_machine::MessageStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, FromRow, PgConnection, PgPool};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Schema migrations shipped with the crate
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const MESSAGE_COLUMNS: &str = "id, external_id, direction, status, user_id, contact_id, \
     conversation_id, campaign_id, message_type, content, sent_at, delivered_at, read_at, \
     failed_at, error_code, error_message, created_at, updated_at";

const EVENT_LOG_COLUMNS: &str = "id, payload, status, dedup_key, error, created_at, processed_at";

#[derive(Debug, FromRow)]
struct EventLogRow {
    id: i64,
    payload: Value,
    status: String,
    dedup_key: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<EventLogRow> for EventLogRecord {
    type Error = StoreError;

    fn try_from(row: EventLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            payload: row.payload,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            dedup_key: row.dedup_key,
            error: row.error,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    external_id: Option<String>,
    direction: String,
    status: String,
    user_id: i64,
    contact_id: Option<i64>,
    conversation_id: Option<i64>,
    campaign_id: Option<i64>,
    message_type: String,
    content: Value,
    sent_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    error_code: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            external_id: row.external_id,
            direction: row.direction.parse().map_err(StoreError::Corrupt)?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            user_id: row.user_id,
            contact_id: row.contact_id,
            conversation_id: row.conversation_id,
            campaign_id: row.campaign_id,
            message_type: row.message_type,
            content: row.content,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            read_at: row.read_at,
            failed_at: row.failed_at,
            error_code: row.error_code,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    dedup_key: String,
    event_log_id: i64,
    attempts: i32,
    max_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
}

impl From<JobRow> for QueueJob {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            dedup_key: row.dedup_key,
            event_log_id: row.event_log_id,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(0),
            locked_until: row.locked_until,
        }
    }
}

#[derive(Debug, FromRow)]
struct CampaignRow {
    id: i64,
    user_id: i64,
    name: String,
    sent_count: i64,
    delivered_count: i64,
    read_count: i64,
    failed_count: i64,
}

impl From<CampaignRow> for Campaign {
    fn from(row: CampaignRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            counters: CampaignCounters {
                sent: row.sent_count,
                delivered: row.delivered_count,
                read: row.read_count,
                failed: row.failed_count,
            },
        }
    }
}

#[derive(Debug, FromRow)]
struct WalletTransactionRow {
    id: i64,
    user_id: i64,
    amount: f64,
    transaction_type: String,
    idempotency_key: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<WalletTransactionRow> for WalletTransaction {
    type Error = StoreError;

    fn try_from(row: WalletTransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            transaction_type: row.transaction_type.parse().map_err(StoreError::Corrupt)?,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ContactRow {
    id: i64,
    user_id: i64,
    phone: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: i64,
    user_id: i64,
    contact_id: i64,
    phone: String,
    last_message_at: Option<DateTime<Utc>>,
    unread_count: i64,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            contact_id: row.contact_id,
            phone: row.phone,
            last_message_at: row.last_message_at,
            unread_count: row.unread_count,
        }
    }
}

fn seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

/// Postgres-backed implementation of every store trait
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let url = config.database_url().ok_or_else(|| {
            StoreError::Unavailable(
                "no database url configured (database.url or DATABASE_URL)".to_string(),
            )
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&url)
            .await?;

        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> StoreResult<bool> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    async fn event_log_exists(&self, id: i64) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM delivery_event_logs WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Finish a non-processed record; a processed record is left alone
    async fn finish_event_log(
        &self,
        id: i64,
        status: EventLogStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_event_logs
            SET status = $2, error = $3, processed_at = NOW()
            WHERE id = $1 AND status <> 'PROCESSED'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && !self.event_log_exists(id).await? {
            return Err(StoreError::not_found("event log", id));
        }
        Ok(())
    }
}

/// Debit inside a savepoint of `conn`'s current transaction
async fn apply_debit(
    conn: &mut PgConnection,
    request: &DebitRequest,
) -> Result<DebitOutcome, sqlx::Error> {
    if !request.amount_is_valid() {
        return Ok(DebitOutcome::Declined {
            reason: DeclineReason::InvalidAmount {
                amount: request.amount,
            },
        });
    }

    let mut savepoint = conn.begin().await?;

    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO wallet_transactions (user_id, amount, transaction_type, idempotency_key)
        SELECT $1, $2, 'DEBIT', $3
        WHERE EXISTS (SELECT 1 FROM wallets WHERE user_id = $1)
        ON CONFLICT (user_id, idempotency_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(request.user_id)
    .bind(request.amount)
    .bind(&request.idempotency_key)
    .fetch_optional(&mut *savepoint)
    .await?;

    let Some(transaction_id) = inserted else {
        savepoint.rollback().await?;
        return existing_or_no_account(conn, request).await;
    };

    let balance_after: Option<f64> = sqlx::query_scalar(
        r#"
        UPDATE wallets
        SET balance = balance - $2
        WHERE user_id = $1 AND ($3 OR balance - $2 >= 0)
        RETURNING balance
        "#,
    )
    .bind(request.user_id)
    .bind(request.amount)
    .bind(request.allow_overdraft)
    .fetch_optional(&mut *savepoint)
    .await?;

    match balance_after {
        Some(balance_after) => {
            savepoint.commit().await?;
            Ok(DebitOutcome::Applied {
                transaction_id,
                balance_after,
            })
        }
        None => {
            let balance: f64 = sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1")
                .bind(request.user_id)
                .fetch_one(&mut *savepoint)
                .await?;
            savepoint.rollback().await?;
            Ok(DebitOutcome::Declined {
                reason: DeclineReason::InsufficientBalance {
                    balance,
                    amount: request.amount,
                },
            })
        }
    }
}

/// The insert did nothing: either the key exists or the user has no wallet
async fn existing_or_no_account(
    conn: &mut PgConnection,
    request: &DebitRequest,
) -> Result<DebitOutcome, sqlx::Error> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM wallet_transactions WHERE user_id = $1 AND idempotency_key = $2",
    )
    .bind(request.user_id)
    .bind(&request.idempotency_key)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(match existing {
        Some(transaction_id) => DebitOutcome::AlreadyApplied { transaction_id },
        None => DebitOutcome::Declined {
            reason: DeclineReason::NoBillingAccount,
        },
    })
}

#[async_trait]
impl EventLogStore for PgStore {
    async fn insert_event_log(
        &self,
        payload: &Value,
        dedup_key: &str,
    ) -> StoreResult<EventLogRecord> {
        let row: EventLogRow = sqlx::query_as(&format!(
            "INSERT INTO delivery_event_logs (payload, dedup_key) VALUES ($1, $2) \
             RETURNING {EVENT_LOG_COLUMNS}"
        ))
        .bind(payload)
        .bind(dedup_key)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_event_log(&self, id: i64) -> StoreResult<Option<EventLogRecord>> {
        let row: Option<EventLogRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_LOG_COLUMNS} FROM delivery_event_logs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn mark_processing(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_event_logs
            SET status = 'PROCESSING'
            WHERE id = $1 AND status <> 'PROCESSED'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.event_log_exists(id).await? {
            Ok(false)
        } else {
            Err(StoreError::not_found("event log", id))
        }
    }

    async fn mark_processed(&self, id: i64, note: Option<&str>) -> StoreResult<()> {
        self.finish_event_log(id, EventLogStatus::Processed, note).await
    }

    async fn mark_failed(&self, id: i64, error: &str) -> StoreResult<()> {
        self.finish_event_log(id, EventLogStatus::Failed, Some(error))
            .await
    }

    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<EventLogRecord>> {
        let rows: Vec<EventLogRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_LOG_COLUMNS} FROM delivery_event_logs \
             WHERE status = 'PENDING' AND created_at <= $1 \
             ORDER BY created_at, id LIMIT $2"
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_event_logs(&self, status: EventLogStatus) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_event_logs WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[async_trait]
impl JobQueue for PgStore {
    #[instrument(
        skip(self, job),
        fields(dedup_key = %job.dedup_key, event_log_id = job.event_log_id)
    )]
    async fn enqueue(&self, job: NewJob, max_attempts: u32) -> StoreResult<EnqueueOutcome> {
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO delivery_jobs (dedup_key, event_log_id, max_attempts)
            VALUES ($1, $2, $3)
            ON CONFLICT (dedup_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&job.dedup_key)
        .bind(job.event_log_id)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(job_id) = inserted {
            return Ok(EnqueueOutcome::Enqueued { job_id });
        }

        let existing: Option<(i64, i64)> =
            sqlx::query_as("SELECT id, event_log_id FROM delivery_jobs WHERE dedup_key = $1")
                .bind(&job.dedup_key)
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            Some((existing_job_id, existing_event_log_id)) => {
                debug!(existing_job_id, "Dedup key already queued");
                Ok(EnqueueOutcome::Duplicate {
                    existing_job_id,
                    existing_event_log_id,
                })
            }
            // Purged between the insert and the lookup; the caller retries
            None => Err(StoreError::Database(format!(
                "job for dedup key {} vanished during enqueue",
                job.dedup_key
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn claim(&self, visibility_timeout: Duration) -> StoreResult<Option<QueueJob>> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE delivery_jobs
            SET status = 'running',
                attempts = attempts + 1,
                locked_until = NOW() + make_interval(secs => $1),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM delivery_jobs
                WHERE (status = 'queued' AND available_at <= NOW())
                   OR (status = 'running' AND locked_until <= NOW() AND attempts < max_attempts)
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, dedup_key, event_log_id, attempts, max_attempts, locked_until
            "#,
        )
        .bind(seconds(visibility_timeout))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(QueueJob::from))
    }

    async fn exhausted_locks(&self, limit: i64) -> StoreResult<Vec<QueueJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT id, dedup_key, event_log_id, attempts, max_attempts, locked_until
            FROM delivery_jobs
            WHERE status = 'running' AND locked_until <= NOW() AND attempts >= max_attempts
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(QueueJob::from).collect())
    }

    async fn ack(&self, job_id: i64) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_jobs
            SET status = 'completed', locked_until = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("job", job_id));
        }
        Ok(())
    }

    async fn retry(&self, job_id: i64, delay: Duration, error: &str) -> StoreResult<RetryOutcome> {
        let row: Option<(String, i32, DateTime<Utc>)> = sqlx::query_as(
            r#"
            UPDATE delivery_jobs
            SET status = CASE WHEN attempts >= max_attempts THEN 'abandoned' ELSE 'queued' END,
                available_at = CASE WHEN attempts >= max_attempts THEN available_at
                                    ELSE NOW() + make_interval(secs => $2) END,
                locked_until = NULL,
                last_error = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING status, attempts, available_at
            "#,
        )
        .bind(job_id)
        .bind(seconds(delay))
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        let (status, attempts, available_at) =
            row.ok_or_else(|| StoreError::not_found("job", job_id))?;
        let attempts = u32::try_from(attempts).unwrap_or(0);

        match status.parse::<JobStatus>().map_err(StoreError::Corrupt)? {
            JobStatus::Abandoned => Ok(RetryOutcome::Abandoned { attempts }),
            _ => Ok(RetryOutcome::Requeued {
                attempts,
                available_at,
            }),
        }
    }

    async fn abandon(&self, job_id: i64, error: &str) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_jobs
            SET status = 'abandoned', locked_until = NULL, last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("job", job_id));
        }
        Ok(())
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM delivery_jobs
            WHERE status IN ('completed', 'abandoned') AND updated_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn get_message(&self, id: i64) -> StoreResult<Option<Message>> {
        let row: Option<MessageRow> =
            sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_message_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn record_outbound(&self, message: NewOutboundMessage) -> StoreResult<Message> {
        let row: MessageRow = sqlx::query_as(&format!(
            "INSERT INTO messages \
             (external_id, direction, status, user_id, contact_id, conversation_id, campaign_id, \
              message_type, content) \
             VALUES ($1, 'outgoing', 'queued', $2, $3, $4, $5, $6, $7) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(&message.external_id)
        .bind(message.user_id)
        .bind(message.contact_id)
        .bind(message.conversation_id)
        .bind(message.campaign_id)
        .bind(&message.message_type)
        .bind(&message.content)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn insert_inbound(&self, message: NewInboundMessage) -> StoreResult<InboundInsert> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<MessageRow> = sqlx::query_as(&format!(
            "INSERT INTO messages \
             (external_id, direction, status, user_id, contact_id, conversation_id, \
              message_type, content, delivered_at) \
             VALUES ($1, 'incoming', 'delivered', $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (external_id) DO NOTHING \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(&message.external_id)
        .bind(message.user_id)
        .bind(message.contact_id)
        .bind(message.conversation_id)
        .bind(&message.message_type)
        .bind(&message.content)
        .bind(message.received_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = inserted else {
            tx.rollback().await?;
            let existing = self
                .find_message_by_external_id(&message.external_id)
                .await?
                .ok_or_else(|| StoreError::not_found("message", &message.external_id))?;
            return Ok(InboundInsert::Existing(existing));
        };

        let bumped = sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_at = GREATEST(last_message_at, $2),
                unread_count = unread_count + 1
            WHERE id = $1
            "#,
        )
        .bind(message.conversation_id)
        .bind(message.received_at)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::not_found("conversation", message.conversation_id));
        }

        tx.commit().await?;
        Ok(InboundInsert::Inserted(row.try_into()?))
    }

    #[instrument(
        skip(self, transition),
        fields(message_id = transition.message_id, new_status = %transition.new_status)
    )]
    async fn commit_transition(&self, transition: PlannedTransition) -> StoreResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;
        let ts = transition.timestamps;

        let updated: Option<MessageRow> = sqlx::query_as(&format!(
            "UPDATE messages SET \
                 status = $2, \
                 sent_at = COALESCE(sent_at, $3), \
                 delivered_at = COALESCE(delivered_at, $4), \
                 read_at = COALESCE(read_at, $5), \
                 failed_at = COALESCE(failed_at, $6), \
                 error_code = COALESCE($7, error_code), \
                 error_message = COALESCE($8, error_message), \
                 updated_at = NOW() \
             WHERE id = $1 AND status = $9 \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(transition.message_id)
        .bind(transition.new_status.as_str())
        .bind(ts.sent_at)
        .bind(ts.delivered_at)
        .bind(ts.read_at)
        .bind(ts.failed_at)
        .bind(&transition.error_code)
        .bind(&transition.error_message)
        .bind(transition.expected_status.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            tx.rollback().await?;
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM messages WHERE id = $1")
                    .bind(transition.message_id)
                    .fetch_optional(&self.pool)
                    .await?;
            let current =
                current.ok_or_else(|| StoreError::not_found("message", transition.message_id))?;
            return Ok(CommitOutcome::Conflict {
                current_status: current.parse::<MessageStatus>().map_err(StoreError::Corrupt)?,
            });
        };

        if let Some(campaign_id) = transition.campaign_id {
            let delta = transition.counter_delta;
            if !delta.is_zero() {
                sqlx::query(
                    r#"
                    UPDATE campaigns
                    SET sent_count = sent_count + $2,
                        delivered_count = delivered_count + $3,
                        read_count = read_count + $4,
                        failed_count = failed_count + $5
                    WHERE id = $1
                    "#,
                )
                .bind(campaign_id)
                .bind(delta.sent)
                .bind(delta.delivered)
                .bind(delta.read)
                .bind(delta.failed)
                .execute(&mut *tx)
                .await?;
            }
        }

        let debit = match &transition.debit {
            Some(request) => match apply_debit(&mut tx, request).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        user_id = request.user_id,
                        idempotency_key = %request.idempotency_key,
                        error = %e,
                        "Debit failed inside transition; status change kept"
                    );
                    DebitOutcome::Declined {
                        reason: DeclineReason::Backend {
                            message: e.to_string(),
                        },
                    }
                }
            },
            None => DebitOutcome::Skipped,
        };

        tx.commit().await?;

        Ok(CommitOutcome::Committed {
            message: row.try_into()?,
            debit,
        })
    }
}

#[async_trait]
impl WalletLedger for PgStore {
    async fn open_wallet(&self, user_id: i64, opening_balance: f64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, balance) VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(opening_balance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn balance(&self, user_id: i64) -> StoreResult<Option<f64>> {
        let balance: Option<f64> =
            sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(balance)
    }

    #[instrument(
        skip(self, request),
        fields(user_id = request.user_id, idempotency_key = %request.idempotency_key)
    )]
    async fn debit(&self, request: &DebitRequest) -> StoreResult<DebitOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = apply_debit(&mut tx, request).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn topup(&self, request: &DebitRequest) -> StoreResult<DebitOutcome> {
        if !request.amount_is_valid() {
            return Ok(DebitOutcome::Declined {
                reason: DeclineReason::InvalidAmount {
                    amount: request.amount,
                },
            });
        }

        let mut tx = self.pool.begin().await?;
        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO wallet_transactions (user_id, amount, transaction_type, idempotency_key)
            SELECT $1, $2, 'TOPUP', $3
            WHERE EXISTS (SELECT 1 FROM wallets WHERE user_id = $1)
            ON CONFLICT (user_id, idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(request.user_id)
        .bind(request.amount)
        .bind(&request.idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(transaction_id) = inserted else {
            let outcome = existing_or_no_account(&mut tx, request).await?;
            tx.rollback().await?;
            return Ok(outcome);
        };

        let balance_after: f64 = sqlx::query_scalar(
            "UPDATE wallets SET balance = balance + $2 WHERE user_id = $1 RETURNING balance",
        )
        .bind(request.user_id)
        .bind(request.amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(DebitOutcome::Applied {
            transaction_id,
            balance_after,
        })
    }

    async fn transactions(&self, user_id: i64) -> StoreResult<Vec<WalletTransaction>> {
        let rows: Vec<WalletTransactionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, amount, transaction_type, idempotency_key, created_at
            FROM wallet_transactions
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl CampaignStore for PgStore {
    async fn create_campaign(&self, user_id: i64, name: &str) -> StoreResult<Campaign> {
        let row: CampaignRow = sqlx::query_as(
            r#"
            INSERT INTO campaigns (user_id, name) VALUES ($1, $2)
            RETURNING id, user_id, name, sent_count, delivered_count, read_count, failed_count
            "#,
        )
        .bind(user_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_campaign(&self, id: i64) -> StoreResult<Option<Campaign>> {
        let row: Option<CampaignRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, name, sent_count, delivered_count, read_count, failed_count
            FROM campaigns WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Campaign::from))
    }

    #[instrument(skip(self))]
    async fn recompute_campaign(&self, id: i64) -> StoreResult<CampaignCounters> {
        let mut tx = self.pool.begin().await?;

        // Lock first so the aggregate below sees every committed increment
        let locked: Option<i64> =
            sqlx::query_scalar("SELECT id FROM campaigns WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            tx.rollback().await?;
            return Err(StoreError::not_found("campaign", id));
        }

        let (sent, delivered, read, failed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            UPDATE campaigns c
            SET sent_count = s.sent,
                delivered_count = s.delivered,
                read_count = s.read,
                failed_count = s.failed
            FROM (
                SELECT COUNT(*) FILTER (WHERE sent_at IS NOT NULL) AS sent,
                       COUNT(*) FILTER (WHERE delivered_at IS NOT NULL) AS delivered,
                       COUNT(*) FILTER (WHERE read_at IS NOT NULL) AS read,
                       COUNT(*) FILTER (WHERE status = 'failed') AS failed
                FROM messages
                WHERE campaign_id = $1
            ) s
            WHERE c.id = $1
            RETURNING c.sent_count, c.delivered_count, c.read_count, c.failed_count
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CampaignCounters {
            sent,
            delivered,
            read,
            failed,
        })
    }

    async fn campaigns_touched_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT campaign_id FROM messages
            WHERE campaign_id IS NOT NULL AND updated_at >= $1
            ORDER BY campaign_id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl ContactDirectory for PgStore {
    async fn upsert_contact(
        &self,
        user_id: i64,
        phone: &str,
        name: Option<&str>,
    ) -> StoreResult<Contact> {
        let row: ContactRow = sqlx::query_as(
            r#"
            INSERT INTO contacts (user_id, phone, name) VALUES ($1, $2, $3)
            ON CONFLICT (user_id, phone)
            DO UPDATE SET name = COALESCE(contacts.name, EXCLUDED.name)
            RETURNING id, user_id, phone, name, created_at
            "#,
        )
        .bind(user_id)
        .bind(phone)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Contact {
            id: row.id,
            user_id: row.user_id,
            phone: row.phone,
            name: row.name,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl ConversationDirectory for PgStore {
    async fn upsert_conversation(
        &self,
        user_id: i64,
        contact_id: i64,
        phone: &str,
    ) -> StoreResult<Conversation> {
        let row: ConversationRow = sqlx::query_as(
            r#"
            INSERT INTO conversations (user_id, contact_id, phone) VALUES ($1, $2, $3)
            ON CONFLICT (user_id, contact_id) DO UPDATE SET phone = conversations.phone
            RETURNING id, user_id, contact_id, phone, last_message_at, unread_count
            "#,
        )
        .bind(user_id)
        .bind(contact_id)
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_conversation(&self, id: i64) -> StoreResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, contact_id, phone, last_message_at, unread_count
            FROM conversations WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Conversation::from))
    }
}

#[async_trait]
impl AccountDirectory for PgStore {
    async fn register_account(&self, account: Account) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, phone_number_id, display_phone_number)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET phone_number_id = EXCLUDED.phone_number_id,
                display_phone_number = EXCLUDED.display_phone_number
            "#,
        )
        .bind(account.user_id)
        .bind(&account.phone_number_id)
        .bind(&account.display_phone_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_account(&self, phone_number_id: &str) -> StoreResult<Option<Account>> {
        let row: Option<(i64, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT user_id, phone_number_id, display_phone_number
            FROM accounts WHERE phone_number_id = $1
            "#,
        )
        .bind(phone_number_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, phone_number_id, display_phone_number)| Account {
            user_id,
            phone_number_id,
            display_phone_number,
        }))
    }
}

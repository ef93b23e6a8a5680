//! # In-Process Store
//!
//! [`DeliveryStore`](super::DeliveryStore) backed by process memory. Each
//! atomic unit of the store contract runs inside one critical section, which
//! gives the same guarantees the Postgres backend gets from unique indexes
//! and row locks. Used by the test suites and for embedding the core without
//! a database.

use super::{
    AccountDirectory, CampaignStore, CommitOutcome, ContactDirectory, ConversationDirectory,
    EventLogStore, InboundInsert, JobQueue, MessageStore, PlannedTransition, StoreError,
    StoreResult, WalletLedger,
};
use crate::campaign::counters_from_messages;
use crate::models::{
    Account, Campaign, CampaignCounters, Contact, Conversation, DebitOutcome, DebitRequest,
    DeclineReason, EnqueueOutcome, EventLogRecord, EventLogStatus, JobStatus, Message,
    NewInboundMessage, NewJob, NewOutboundMessage, QueueJob, RetryOutcome, TransactionType,
    WalletTransaction,
};
use crate::state_machine::{MessageDirection, MessageStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct JobRow {
    id: i64,
    dedup_key: String,
    event_log_id: i64,
    status: JobStatus,
    attempts: u32,
    max_attempts: u32,
    available_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Queued => self.available_at <= now,
            JobStatus::Running => self.lock_expired(now) && self.attempts < self.max_attempts,
            JobStatus::Completed | JobStatus::Abandoned => false,
        }
    }

    fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until <= now)
    }

    fn to_job(&self) -> QueueJob {
        QueueJob {
            id: self.id,
            dedup_key: self.dedup_key.clone(),
            event_log_id: self.event_log_id,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            locked_until: self.locked_until,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: BTreeMap<i64, JobRow>,
    by_key: HashMap<String, i64>,
}

#[derive(Debug, Clone)]
struct Wallet {
    balance: f64,
}

/// Rows that change together inside one transition commit
#[derive(Debug, Default)]
struct Tables {
    messages: BTreeMap<i64, Message>,
    by_external_id: HashMap<String, i64>,
    conversations: BTreeMap<i64, Conversation>,
    conversation_keys: HashMap<(i64, i64), i64>,
    campaigns: BTreeMap<i64, Campaign>,
    wallets: HashMap<i64, Wallet>,
    transactions: Vec<WalletTransaction>,
}

/// In-memory implementation of every store trait
#[derive(Debug, Default)]
pub struct MemoryStore {
    event_logs: Mutex<BTreeMap<i64, EventLogRecord>>,
    queue: Mutex<QueueState>,
    tables: Mutex<Tables>,
    contacts: DashMap<(i64, String), Contact>,
    accounts: DashMap<String, Account>,
    next_id: AtomicI64,
    queue_outage: AtomicBool,
    message_outage: AtomicBool,
    event_log_outage: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make `enqueue` fail as if the queue backend were down
    pub fn set_queue_outage(&self, down: bool) {
        self.queue_outage.store(down, Ordering::SeqCst);
    }

    /// Make message reads and transition commits fail as if the backend were down
    pub fn set_message_outage(&self, down: bool) {
        self.message_outage.store(down, Ordering::SeqCst);
    }

    /// Make event log status updates fail as if the backend were down
    pub fn set_event_log_outage(&self, down: bool) {
        self.event_log_outage.store(down, Ordering::SeqCst);
    }

    fn check_outage(flag: &AtomicBool, what: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{what} backend is down")));
        }
        Ok(())
    }

    /// Status and attempt count of the job holding `dedup_key`
    pub fn job_state(&self, dedup_key: &str) -> Option<(JobStatus, u32)> {
        let queue = self.queue.lock();
        let id = queue.by_key.get(dedup_key)?;
        queue.jobs.get(id).map(|job| (job.status, job.attempts))
    }

    /// Number of jobs in the queue table, finished ones included
    pub fn job_count(&self) -> usize {
        self.queue.lock().jobs.len()
    }

    /// Make every queued job available and every lock expired immediately
    pub fn expire_delays(&self) {
        let now = Utc::now();
        let mut queue = self.queue.lock();
        for job in queue.jobs.values_mut() {
            match job.status {
                JobStatus::Queued => job.available_at = now,
                JobStatus::Running => job.locked_until = Some(now),
                JobStatus::Completed | JobStatus::Abandoned => {}
            }
        }
    }

    /// Move a message's `updated_at`; lets tests place edits outside a lookback window
    pub fn set_message_updated_at(&self, message_id: i64, at: DateTime<Utc>) {
        if let Some(message) = self.tables.lock().messages.get_mut(&message_id) {
            message.updated_at = at;
        }
    }

    /// Move a record's `created_at`; lets tests age pending records
    pub fn set_event_log_created_at(&self, id: i64, at: DateTime<Utc>) {
        if let Some(record) = self.event_logs.lock().get_mut(&id) {
            record.created_at = at;
        }
    }

    /// Overwrite a campaign's counters without touching its messages
    pub fn set_campaign_counters(&self, id: i64, counters: CampaignCounters) {
        if let Some(campaign) = self.tables.lock().campaigns.get_mut(&id) {
            campaign.counters = counters;
        }
    }
}

/// Shared by `debit` and the debit nested in a transition commit
fn apply_debit(tables: &mut Tables, request: &DebitRequest, transaction_id: i64) -> DebitOutcome {
    if !request.amount_is_valid() {
        return DebitOutcome::Declined {
            reason: DeclineReason::InvalidAmount {
                amount: request.amount,
            },
        };
    }

    if let Some(existing) = tables
        .transactions
        .iter()
        .find(|t| t.user_id == request.user_id && t.idempotency_key == request.idempotency_key)
    {
        return DebitOutcome::AlreadyApplied {
            transaction_id: existing.id,
        };
    }

    let Some(wallet) = tables.wallets.get_mut(&request.user_id) else {
        return DebitOutcome::Declined {
            reason: DeclineReason::NoBillingAccount,
        };
    };

    if !request.is_covered_by(wallet.balance) {
        return DebitOutcome::Declined {
            reason: DeclineReason::InsufficientBalance {
                balance: wallet.balance,
                amount: request.amount,
            },
        };
    }

    wallet.balance -= request.amount;
    let balance_after = wallet.balance;
    tables.transactions.push(WalletTransaction {
        id: transaction_id,
        user_id: request.user_id,
        amount: request.amount,
        transaction_type: TransactionType::Debit,
        idempotency_key: request.idempotency_key.clone(),
        created_at: Utc::now(),
    });

    DebitOutcome::Applied {
        transaction_id,
        balance_after,
    }
}

fn counters_for(tables: &Tables, campaign_id: i64) -> CampaignCounters {
    counters_from_messages(
        tables
            .messages
            .values()
            .filter(|m| m.campaign_id == Some(campaign_id)),
    )
}

#[async_trait]
impl EventLogStore for MemoryStore {
    async fn insert_event_log(
        &self,
        payload: &Value,
        dedup_key: &str,
    ) -> StoreResult<EventLogRecord> {
        let record = EventLogRecord {
            id: self.next_id(),
            payload: payload.clone(),
            status: EventLogStatus::Pending,
            dedup_key: dedup_key.to_string(),
            error: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        self.event_logs.lock().insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_event_log(&self, id: i64) -> StoreResult<Option<EventLogRecord>> {
        Ok(self.event_logs.lock().get(&id).cloned())
    }

    async fn mark_processing(&self, id: i64) -> StoreResult<bool> {
        Self::check_outage(&self.event_log_outage, "event log")?;
        let mut logs = self.event_logs.lock();
        let record = logs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("event log", id))?;
        if record.status.is_final() {
            return Ok(false);
        }
        record.status = EventLogStatus::Processing;
        Ok(true)
    }

    async fn mark_processed(&self, id: i64, note: Option<&str>) -> StoreResult<()> {
        Self::check_outage(&self.event_log_outage, "event log")?;
        let mut logs = self.event_logs.lock();
        let record = logs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("event log", id))?;
        if record.status.is_final() {
            return Ok(());
        }
        record.status = EventLogStatus::Processed;
        record.error = note.map(str::to_string);
        record.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> StoreResult<()> {
        Self::check_outage(&self.event_log_outage, "event log")?;
        let mut logs = self.event_logs.lock();
        let record = logs
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("event log", id))?;
        if record.status.is_final() {
            return Ok(());
        }
        record.status = EventLogStatus::Failed;
        record.error = Some(error.to_string());
        record.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<EventLogRecord>> {
        let logs = self.event_logs.lock();
        let mut stale: Vec<EventLogRecord> = logs
            .values()
            .filter(|r| r.status == EventLogStatus::Pending && r.created_at <= older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|r| (r.created_at, r.id));
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }

    async fn count_event_logs(&self, status: EventLogStatus) -> StoreResult<i64> {
        let logs = self.event_logs.lock();
        Ok(logs.values().filter(|r| r.status == status).count() as i64)
    }
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn enqueue(&self, job: NewJob, max_attempts: u32) -> StoreResult<EnqueueOutcome> {
        Self::check_outage(&self.queue_outage, "queue")?;
        let mut queue = self.queue.lock();
        if let Some(existing) = queue.by_key.get(&job.dedup_key).and_then(|id| queue.jobs.get(id))
        {
            return Ok(EnqueueOutcome::Duplicate {
                existing_job_id: existing.id,
                existing_event_log_id: existing.event_log_id,
            });
        }

        let now = Utc::now();
        let id = self.next_id();
        queue.by_key.insert(job.dedup_key.clone(), id);
        queue.jobs.insert(
            id,
            JobRow {
                id,
                dedup_key: job.dedup_key,
                event_log_id: job.event_log_id,
                status: JobStatus::Queued,
                attempts: 0,
                max_attempts,
                available_at: now,
                locked_until: None,
                last_error: None,
                updated_at: now,
            },
        );
        Ok(EnqueueOutcome::Enqueued { job_id: id })
    }

    async fn claim(&self, visibility_timeout: Duration) -> StoreResult<Option<QueueJob>> {
        let now = Utc::now();
        let lock_for = chrono::Duration::from_std(visibility_timeout)
            .map_err(|e| StoreError::Database(format!("invalid visibility timeout: {e}")))?;

        let mut queue = self.queue.lock();
        let Some(job) = queue.jobs.values_mut().find(|job| job.claimable(now)) else {
            return Ok(None);
        };

        job.status = JobStatus::Running;
        job.attempts += 1;
        job.locked_until = Some(now + lock_for);
        job.updated_at = now;

        Ok(Some(job.to_job()))
    }

    async fn exhausted_locks(&self, limit: i64) -> StoreResult<Vec<QueueJob>> {
        let now = Utc::now();
        let queue = self.queue.lock();
        Ok(queue
            .jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Running
                    && job.lock_expired(now)
                    && job.attempts >= job.max_attempts
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .map(JobRow::to_job)
            .collect())
    }

    async fn ack(&self, job_id: i64) -> StoreResult<()> {
        let mut queue = self.queue.lock();
        let job = queue
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::not_found("job", job_id))?;
        job.status = JobStatus::Completed;
        job.locked_until = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn retry(&self, job_id: i64, delay: Duration, error: &str) -> StoreResult<RetryOutcome> {
        let now = Utc::now();
        let mut queue = self.queue.lock();
        let job = queue
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::not_found("job", job_id))?;

        job.locked_until = None;
        job.last_error = Some(error.to_string());
        job.updated_at = now;

        if job.attempts >= job.max_attempts {
            job.status = JobStatus::Abandoned;
            return Ok(RetryOutcome::Abandoned {
                attempts: job.attempts,
            });
        }

        let available_at =
            now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        job.status = JobStatus::Queued;
        job.available_at = available_at;
        Ok(RetryOutcome::Requeued {
            attempts: job.attempts,
            available_at,
        })
    }

    async fn abandon(&self, job_id: i64, error: &str) -> StoreResult<()> {
        let mut queue = self.queue.lock();
        let job = queue
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::not_found("job", job_id))?;
        job.status = JobStatus::Abandoned;
        job.locked_until = None;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let mut queue = self.queue.lock();
        let purged: Vec<(i64, String)> = queue
            .jobs
            .values()
            .filter(|job| {
                matches!(job.status, JobStatus::Completed | JobStatus::Abandoned)
                    && job.updated_at < older_than
            })
            .map(|job| (job.id, job.dedup_key.clone()))
            .collect();

        for (id, key) in &purged {
            queue.jobs.remove(id);
            queue.by_key.remove(key);
        }
        Ok(purged.len() as u64)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn get_message(&self, id: i64) -> StoreResult<Option<Message>> {
        Ok(self.tables.lock().messages.get(&id).cloned())
    }

    async fn find_message_by_external_id(
        &self,
        external_id: &str,
    ) -> StoreResult<Option<Message>> {
        Self::check_outage(&self.message_outage, "message")?;
        let tables = self.tables.lock();
        Ok(tables
            .by_external_id
            .get(external_id)
            .and_then(|id| tables.messages.get(id))
            .cloned())
    }

    async fn record_outbound(&self, message: NewOutboundMessage) -> StoreResult<Message> {
        let mut tables = self.tables.lock();
        if let Some(external_id) = &message.external_id {
            if tables.by_external_id.contains_key(external_id) {
                return Err(StoreError::Constraint(format!(
                    "duplicate message external_id {external_id}"
                )));
            }
        }

        let now = Utc::now();
        let stored = Message {
            id: self.next_id(),
            external_id: message.external_id,
            direction: MessageDirection::Outgoing,
            status: MessageStatus::Queued,
            user_id: message.user_id,
            contact_id: message.contact_id,
            conversation_id: message.conversation_id,
            campaign_id: message.campaign_id,
            message_type: message.message_type,
            content: message.content,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            failed_at: None,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        if let Some(external_id) = &stored.external_id {
            tables.by_external_id.insert(external_id.clone(), stored.id);
        }
        tables.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn insert_inbound(&self, message: NewInboundMessage) -> StoreResult<InboundInsert> {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables
            .by_external_id
            .get(&message.external_id)
            .and_then(|id| tables.messages.get(id))
        {
            return Ok(InboundInsert::Existing(existing.clone()));
        }

        let conversation = tables
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| StoreError::not_found("conversation", message.conversation_id))?;
        conversation.last_message_at = Some(
            conversation
                .last_message_at
                .map_or(message.received_at, |at| at.max(message.received_at)),
        );
        conversation.unread_count += 1;

        let now = Utc::now();
        let stored = Message {
            id: self.next_id(),
            external_id: Some(message.external_id.clone()),
            direction: MessageDirection::Incoming,
            status: MessageStatus::Delivered,
            user_id: message.user_id,
            contact_id: Some(message.contact_id),
            conversation_id: Some(message.conversation_id),
            campaign_id: None,
            message_type: message.message_type,
            content: message.content,
            sent_at: None,
            delivered_at: Some(message.received_at),
            read_at: None,
            failed_at: None,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        tables.by_external_id.insert(message.external_id, stored.id);
        tables.messages.insert(stored.id, stored.clone());
        Ok(InboundInsert::Inserted(stored))
    }

    async fn commit_transition(&self, transition: PlannedTransition) -> StoreResult<CommitOutcome> {
        Self::check_outage(&self.message_outage, "message")?;
        let debit_id = self.next_id();
        let mut tables = self.tables.lock();

        let message = tables
            .messages
            .get_mut(&transition.message_id)
            .ok_or_else(|| StoreError::not_found("message", transition.message_id))?;

        if message.status != transition.expected_status {
            return Ok(CommitOutcome::Conflict {
                current_status: message.status,
            });
        }

        let ts = transition.timestamps;
        message.status = transition.new_status;
        message.sent_at = message.sent_at.or(ts.sent_at);
        message.delivered_at = message.delivered_at.or(ts.delivered_at);
        message.read_at = message.read_at.or(ts.read_at);
        message.failed_at = message.failed_at.or(ts.failed_at);
        if transition.error_code.is_some() {
            message.error_code = transition.error_code.clone();
        }
        if transition.error_message.is_some() {
            message.error_message = transition.error_message.clone();
        }
        message.updated_at = Utc::now();
        let committed = message.clone();

        if let Some(campaign_id) = transition.campaign_id {
            if let Some(campaign) = tables.campaigns.get_mut(&campaign_id) {
                campaign.counters += transition.counter_delta;
            }
        }

        let debit = match &transition.debit {
            Some(request) => apply_debit(&mut tables, request, debit_id),
            None => DebitOutcome::Skipped,
        };

        Ok(CommitOutcome::Committed {
            message: committed,
            debit,
        })
    }
}

#[async_trait]
impl WalletLedger for MemoryStore {
    async fn open_wallet(&self, user_id: i64, opening_balance: f64) -> StoreResult<()> {
        self.tables
            .lock()
            .wallets
            .entry(user_id)
            .or_insert(Wallet {
                balance: opening_balance,
            });
        Ok(())
    }

    async fn balance(&self, user_id: i64) -> StoreResult<Option<f64>> {
        Ok(self.tables.lock().wallets.get(&user_id).map(|w| w.balance))
    }

    async fn debit(&self, request: &DebitRequest) -> StoreResult<DebitOutcome> {
        let id = self.next_id();
        let mut tables = self.tables.lock();
        Ok(apply_debit(&mut tables, request, id))
    }

    async fn topup(&self, request: &DebitRequest) -> StoreResult<DebitOutcome> {
        if !request.amount_is_valid() {
            return Ok(DebitOutcome::Declined {
                reason: DeclineReason::InvalidAmount {
                    amount: request.amount,
                },
            });
        }

        let id = self.next_id();
        let mut tables = self.tables.lock();
        if let Some(existing) = tables
            .transactions
            .iter()
            .find(|t| t.user_id == request.user_id && t.idempotency_key == request.idempotency_key)
        {
            return Ok(DebitOutcome::AlreadyApplied {
                transaction_id: existing.id,
            });
        }

        let Some(wallet) = tables.wallets.get_mut(&request.user_id) else {
            return Ok(DebitOutcome::Declined {
                reason: DeclineReason::NoBillingAccount,
            });
        };
        wallet.balance += request.amount;
        let balance_after = wallet.balance;

        tables.transactions.push(WalletTransaction {
            id,
            user_id: request.user_id,
            amount: request.amount,
            transaction_type: TransactionType::Topup,
            idempotency_key: request.idempotency_key.clone(),
            created_at: Utc::now(),
        });
        Ok(DebitOutcome::Applied {
            transaction_id: id,
            balance_after,
        })
    }

    async fn transactions(&self, user_id: i64) -> StoreResult<Vec<WalletTransaction>> {
        let tables = self.tables.lock();
        Ok(tables
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn create_campaign(&self, user_id: i64, name: &str) -> StoreResult<Campaign> {
        let campaign = Campaign {
            id: self.next_id(),
            user_id,
            name: name.to_string(),
            counters: CampaignCounters::default(),
        };
        self.tables
            .lock()
            .campaigns
            .insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get_campaign(&self, id: i64) -> StoreResult<Option<Campaign>> {
        Ok(self.tables.lock().campaigns.get(&id).cloned())
    }

    async fn recompute_campaign(&self, id: i64) -> StoreResult<CampaignCounters> {
        let mut tables = self.tables.lock();
        let counters = counters_for(&tables, id);
        let campaign = tables
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("campaign", id))?;
        campaign.counters = counters;
        Ok(counters)
    }

    async fn campaigns_touched_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<i64>> {
        let tables = self.tables.lock();
        let mut ids: Vec<i64> = tables
            .messages
            .values()
            .filter(|m| m.updated_at >= since)
            .filter_map(|m| m.campaign_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

#[async_trait]
impl ContactDirectory for MemoryStore {
    async fn upsert_contact(
        &self,
        user_id: i64,
        phone: &str,
        name: Option<&str>,
    ) -> StoreResult<Contact> {
        let mut entry = self
            .contacts
            .entry((user_id, phone.to_string()))
            .or_insert_with(|| Contact {
                id: self.next_id(),
                user_id,
                phone: phone.to_string(),
                name: None,
                created_at: Utc::now(),
            });
        if entry.name.is_none() {
            entry.name = name.map(str::to_string);
        }
        Ok(entry.clone())
    }
}

#[async_trait]
impl ConversationDirectory for MemoryStore {
    async fn upsert_conversation(
        &self,
        user_id: i64,
        contact_id: i64,
        phone: &str,
    ) -> StoreResult<Conversation> {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables
            .conversation_keys
            .get(&(user_id, contact_id))
            .and_then(|id| tables.conversations.get(id))
        {
            return Ok(existing.clone());
        }

        let conversation = Conversation {
            id: self.next_id(),
            user_id,
            contact_id,
            phone: phone.to_string(),
            last_message_at: None,
            unread_count: 0,
        };
        tables
            .conversation_keys
            .insert((user_id, contact_id), conversation.id);
        tables
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: i64) -> StoreResult<Option<Conversation>> {
        Ok(self.tables.lock().conversations.get(&id).cloned())
    }
}

#[async_trait]
impl AccountDirectory for MemoryStore {
    async fn register_account(&self, account: Account) -> StoreResult<()> {
        self.accounts
            .insert(account.phone_number_id.clone(), account);
        Ok(())
    }

    async fn find_account(&self, phone_number_id: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .accounts
            .get(phone_number_id)
            .map(|entry| entry.value().clone()))
    }
}

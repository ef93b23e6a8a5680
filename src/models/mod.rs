//! # Data Models
//!
//! Domain records shared by the store backends and the processing pipeline.

pub mod account;
pub mod campaign;
pub mod contact;
pub mod event_log;
pub mod job;
pub mod message;
pub mod wallet;

// Re-export core models for easy access
pub use account::Account;
pub use campaign::{Campaign, CampaignCounters};
pub use contact::{Contact, Conversation};
pub use event_log::{EventLogRecord, EventLogStatus};
pub use job::{EnqueueOutcome, JobStatus, NewJob, QueueJob, RetryOutcome};
pub use message::{Message, NewInboundMessage, NewOutboundMessage};
pub use wallet::{DebitOutcome, DebitRequest, DeclineReason, TransactionType, WalletTransaction};

#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Delivery Core
//!
//! Event-processing core for messaging-provider webhooks.
//!
//! ## Overview
//!
//! The provider pushes delivery-status updates and inbound messages to a
//! webhook. This crate takes each raw payload from the moment the front door
//! has acknowledged it: it records the payload durably, deduplicates
//! redelivered events, and has a pool of workers apply the events to the
//! message store with strong ordering and billing guarantees.
//!
//! ## Architecture
//!
//! ```text
//! payload ─▶ DeliveryCore::accept ─▶ event log (PENDING) ─▶ dedup queue
//!                                                               │
//!                                     WorkerPool ◀──── claim ───┘
//!                                         │
//!                    ┌────────────────────┴───────────────────┐
//!              StatusPipeline                          InboundIngestor
//!   state machine ▸ wallet debit ▸ campaign delta   contact ▸ conversation ▸ message
//! ```
//!
//! Every status transition commits in one store transaction together with
//! its timestamp, campaign counter delta and (for the first billable
//! transition) wallet debit. A reconciliation sweeper repairs what the hot
//! path can leave behind.
//!
//! ## Module Organization
//!
//! - [`ingest`] - Ingress, status pipeline, inbound ingestor
//! - [`worker`] - Worker pool, event processor, retry backoff
//! - [`state_machine`] - Message status ordering and transition rules
//! - [`billing`] - Pricing policy and wallet debits
//! - [`campaign`] - Campaign counter deltas and recomputation
//! - [`reconciliation`] - Periodic repair sweep
//! - [`store`] - Store traits with in-memory and PostgreSQL backends
//! - [`payload`] - Provider payload decoding and dedup keys
//! - [`events`] - Notification bridge for real-time observers
//! - [`config`] - Layered TOML + environment configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use delivery_core::config::DeliveryConfig;
//! use delivery_core::events::NoopBridge;
//! use delivery_core::store::MemoryStore;
//! use delivery_core::worker::EventProcessor;
//! use delivery_core::DeliveryCore;
//! use std::sync::Arc;
//!
//! # async fn example(payload: serde_json::Value) -> delivery_core::Result<()> {
//! let core = DeliveryCore::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(NoopBridge),
//!     DeliveryConfig::default(),
//! );
//!
//! let receipt = core.accept(&payload).await?;
//! println!("accepted as {:?}", receipt.disposition);
//!
//! EventProcessor::new(&core).drain().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib                  # Unit tests
//! cargo test                        # Unit + in-memory integration tests
//! cargo test -- --ignored           # PostgreSQL tests (needs DATABASE_URL)
//! ```

pub mod billing;
pub mod campaign;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod payload;
pub mod reconciliation;
pub mod state_machine;
pub mod store;
pub mod worker;

pub use billing::{BillingPolicy, BillingService};
pub use campaign::CampaignAggregator;
pub use config::{
    BackoffConfig, BillingConfig, ConfigManager, DatabaseConfig, DeliveryConfig, QueueConfig,
    ReconciliationConfig, WorkerConfig,
};
pub use error::{DeliveryError, ErrorClass, Result};
pub use events::{EventPublisher, NoopBridge, NotificationBridge};
pub use ingest::{AcceptReceipt, DeliveryCore, Disposition, InboundIngestor, StatusPipeline};
pub use models::{
    Account, Campaign, CampaignCounters, DebitOutcome, DebitRequest, EventLogRecord,
    EventLogStatus, Message,
};
pub use reconciliation::{ReconciliationSweeper, SweepReport};
pub use state_machine::{next_status, MessageDirection, MessageStatus, TransitionDecision};
pub use store::{DeliveryStore, MemoryStore, StoreError};
#[cfg(feature = "postgres")]
pub use store::PgStore;
pub use worker::{EventProcessor, JobOutcome, WorkerPool};

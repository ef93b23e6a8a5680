//! # Ingestion
//!
//! Ingress of raw provider payloads and the two processing branches a
//! decoded event takes: status transitions and inbound messages.

pub mod inbound;
pub mod ingress;
pub mod status;

pub use inbound::{normalize_phone, InboundIngestor};
pub use ingress::{AcceptReceipt, DeliveryCore, Disposition};
pub use status::{StatusOutcome, StatusPipeline, StatusReport};

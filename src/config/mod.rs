//! # Delivery Core Configuration
//!
//! Layered configuration for the event-processing core. Values come from
//! built-in defaults, `config/delivery.toml`, an optional
//! `config/<environment>.toml` override and finally `DELIVERY__*`
//! environment variables (see [`loader::ConfigManager`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use delivery_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let concurrency = manager.config().worker.concurrency;
//! let max_attempts = manager.config().queue.max_attempts;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/delivery.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Database connection and pooling configuration
    pub database: DatabaseConfig,

    /// Dedup queue behaviour
    pub queue: QueueConfig,

    /// Retry backoff schedule
    pub backoff: BackoffConfig,

    /// Worker pool sizing and timeouts
    pub worker: WorkerConfig,

    /// Wallet debit pricing and policy
    pub billing: BillingConfig,

    /// Periodic reconciliation sweep
    pub reconciliation: ReconciliationConfig,

    /// Notification bridge settings
    pub events: EventsConfig,
}

/// Database connection and pooling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; `DATABASE_URL` is used when unset
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
            acquire_timeout_seconds: 10,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the effective database URL
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Dedup queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a claimed job stays invisible before another worker may take it
    pub visibility_timeout_seconds: u64,
    /// Attempts before a job is abandoned
    pub max_attempts: u32,
    /// How long a finished job keeps absorbing duplicate enqueues
    pub dedup_window_seconds: u64,
    /// Idle wait between empty claims
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_seconds: 300,
            max_attempts: 3,
            dedup_window_seconds: 24 * 60 * 60,
            poll_interval_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Backoff and retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Explicit delays for the first attempts, in seconds
    pub default_backoff_seconds: Vec<u64>,
    /// Growth factor applied past the end of the explicit list
    pub backoff_multiplier: f64,
    pub max_backoff_seconds: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            default_backoff_seconds: vec![1, 5, 30],
            backoff_multiplier: 2.0,
            max_backoff_seconds: 300,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    pub concurrency: usize,
    /// A job running longer than this is treated as a transient failure
    pub processing_timeout_seconds: u64,
    /// Bounded wait for in-flight jobs on shutdown
    pub shutdown_timeout_seconds: u64,
    /// Re-read attempts when a message row changes under a compare-and-apply
    pub max_transition_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            processing_timeout_seconds: 30,
            shutdown_timeout_seconds: 30,
            max_transition_attempts: 5,
        }
    }
}

impl WorkerConfig {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// Wallet debit configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Cost debited per billable message when no category price matches
    pub default_message_cost: f64,
    /// Per pricing-category cost (`marketing`, `utility`, `authentication`, `service`)
    pub category_costs: HashMap<String, f64>,
    /// Let debits drive the balance below zero
    pub allow_overdraft: bool,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_message_cost: 1.0,
            category_costs: HashMap::new(),
            allow_overdraft: false,
        }
    }
}

/// Reconciliation sweep configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// PENDING records older than this are re-enqueued
    pub pending_threshold_seconds: u64,
    /// Campaigns with message changes inside this window are recomputed
    pub campaign_lookback_seconds: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            pending_threshold_seconds: 300,
            campaign_lookback_seconds: 3600,
        }
    }
}

impl ReconciliationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn pending_threshold(&self) -> Duration {
        Duration::from_secs(self.pending_threshold_seconds)
    }

    pub fn campaign_lookback(&self) -> Duration {
        Duration::from_secs(self.campaign_lookback_seconds)
    }
}

/// Notification bridge configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity for real-time observers
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}

impl DeliveryConfig {
    /// Validate the merged configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "at least one connection is required",
            ));
        }

        if self.worker.concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.concurrency",
                "0",
                "at least one worker is required",
            ));
        }

        if self.worker.processing_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.processing_timeout_seconds",
                "0",
                "processing timeout must be positive",
            ));
        }

        if self.worker.max_transition_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.max_transition_attempts",
                "0",
                "at least one compare-and-apply attempt is required",
            ));
        }

        if self.queue.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue.max_attempts",
                "0",
                "jobs need at least one attempt",
            ));
        }

        // A job whose lock expires before the processing timeout could run twice at once
        if self.queue.visibility_timeout_seconds < self.worker.processing_timeout_seconds {
            return Err(ConfigurationError::invalid_value(
                "queue.visibility_timeout_seconds",
                self.queue.visibility_timeout_seconds.to_string(),
                format!(
                    "must be at least worker.processing_timeout_seconds ({})",
                    self.worker.processing_timeout_seconds
                ),
            ));
        }

        if self.backoff.default_backoff_seconds.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "default_backoff_seconds",
                "backoff",
            ));
        }

        if self.backoff.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.backoff_multiplier",
                self.backoff.backoff_multiplier.to_string(),
                "multiplier must be >= 1.0",
            ));
        }

        if !self.billing.default_message_cost.is_finite() || self.billing.default_message_cost < 0.0
        {
            return Err(ConfigurationError::invalid_value(
                "billing.default_message_cost",
                self.billing.default_message_cost.to_string(),
                "cost must be a non-negative number",
            ));
        }

        for (category, cost) in &self.billing.category_costs {
            if !cost.is_finite() || *cost < 0.0 {
                return Err(ConfigurationError::invalid_value(
                    format!("billing.category_costs.{category}"),
                    cost.to_string(),
                    "cost must be a non-negative number",
                ));
            }
        }

        if self.reconciliation.enabled && self.reconciliation.interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "reconciliation.interval_seconds",
                "0",
                "sweep interval must be positive when reconciliation is enabled",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "broadcast channel needs capacity",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DeliveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.concurrency, 10);
        assert_eq!(config.queue.max_attempts, 3);
        assert!(!config.billing.allow_overdraft);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = DeliveryConfig::default();
        config.worker.concurrency = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("worker.concurrency"));
    }

    #[test]
    fn test_visibility_shorter_than_processing_timeout_rejected() {
        let mut config = DeliveryConfig::default();
        config.queue.visibility_timeout_seconds = 10;
        config.worker.processing_timeout_seconds = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_category_cost_rejected() {
        let mut config = DeliveryConfig::default();
        config
            .billing
            .category_costs
            .insert("marketing".to_string(), -0.5);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("billing.category_costs.marketing"));
    }

    #[test]
    fn test_empty_backoff_rejected() {
        let mut config = DeliveryConfig::default();
        config.backoff.default_backoff_seconds.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }
}

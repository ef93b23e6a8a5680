use serde::{Deserialize, Serialize};
use std::fmt;

/// Message delivery status as tracked for every outbound and inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Recorded locally, not yet acknowledged by the provider
    Queued,
    /// Accepted by the provider
    Sent,
    /// Reached the recipient device
    Delivered,
    /// Opened by the recipient
    Read,
    /// Provider reported a delivery failure
    Failed,
}

impl MessageStatus {
    /// Position in the forward progression; `None` for the absorbing failed state
    pub fn rank(&self) -> Option<u8> {
        match self {
            Self::Queued => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Whether reaching this status implies the message reached the device
    pub fn implies_delivery(&self) -> bool {
        matches!(self, Self::Delivered | Self::Read)
    }

    /// Whether the provider has acknowledged the message in any way
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Read)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid message status: {s}")),
        }
    }
}

/// Default state for new outbound messages
impl Default for MessageStatus {
    fn default() -> Self {
        Self::Queued
    }
}

/// Which way a message travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" => Ok(Self::Incoming),
            "outgoing" => Ok(Self::Outgoing),
            _ => Err(format!("Invalid message direction: {s}")),
        }
    }
}

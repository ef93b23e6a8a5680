use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contact of one user, matched by normalized phone digits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub user_id: i64,
    /// Digits only
    pub phone: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A conversation thread, keyed by `(user_id, contact_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub contact_id: i64,
    pub phone: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

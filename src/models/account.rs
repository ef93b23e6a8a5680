use serde::{Deserialize, Serialize};

/// A business account linked to one provider phone number
///
/// Routing metadata on every provider payload carries the `phone_number_id`;
/// it is how an event finds the user that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: i64,
    pub phone_number_id: String,
    pub display_phone_number: Option<String>,
}

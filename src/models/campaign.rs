//! # Campaign Model
//!
//! Campaign delivery counters are derived state. They can always be rebuilt
//! from the messages of the campaign, which is what reconciliation does.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// The four derived counters of a campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub sent: i64,
    pub delivered: i64,
    pub read: i64,
    pub failed: i64,
}

impl CampaignCounters {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for CampaignCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.sent += rhs.sent;
        self.delivered += rhs.delivered;
        self.read += rhs.read;
        self.failed += rhs.failed;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub counters: CampaignCounters,
}

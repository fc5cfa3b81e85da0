//! Account model
//!
//! Spendable balance, cumulative spend and the single-hop referral link of a user.
//! All amounts are integer minor units.

use super::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Spend tier of a payer, derived from cumulative spend
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Below the first threshold
    #[default]
    Basic,
    /// First threshold reached
    Silver,
    /// Second threshold reached
    Gold,
    /// Third threshold reached
    Platinum,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Basic => write!(f, "basic"),
            Tier::Silver => write!(f, "silver"),
            Tier::Gold => write!(f, "gold"),
            Tier::Platinum => write!(f, "platinum"),
        }
    }
}

impl Tier {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "basic" => Some(Tier::Basic),
            "silver" => Some(Tier::Silver),
            "gold" => Some(Tier::Gold),
            "platinum" => Some(Tier::Platinum),
            _ => None,
        }
    }

    /// Tier for a cumulative spend against ascending thresholds
    /// `[silver, gold, platinum]`
    pub fn for_spend(cumulative_spend: i64, thresholds: &[i64; 3]) -> Self {
        if cumulative_spend >= thresholds[2] {
            Tier::Platinum
        } else if cumulative_spend >= thresholds[1] {
            Tier::Gold
        } else if cumulative_spend >= thresholds[0] {
            Tier::Silver
        } else {
            Tier::Basic
        }
    }
}

/// Account entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Owning user
    pub user_id: UserId,

    /// Spendable balance in minor units, never negative
    pub balance: i64,

    /// Total ever charged to this account as payer
    pub cumulative_spend: i64,

    /// User who referred this account (one hop)
    pub referrer_id: Option<UserId>,

    /// Current spend tier
    pub tier: Tier,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a fresh account with an opening balance
    pub fn new(user_id: UserId, balance: i64, referrer_id: Option<UserId>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance,
            cumulative_spend: 0,
            referrer_id,
            tier: Tier::Basic,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the account can cover a charge
    #[inline]
    pub fn can_cover(&self, amount: i64) -> bool {
        self.balance >= amount
    }

    /// Referrer, ignoring self-referral
    pub fn effective_referrer(&self) -> Option<UserId> {
        self.referrer_id.filter(|id| *id != self.user_id)
    }
}

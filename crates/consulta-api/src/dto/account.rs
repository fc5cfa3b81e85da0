//! Account DTOs

use chrono::{DateTime, Utc};
use consulta_core::models::{Account, Tier, UserId};
use serde::Serialize;

/// Balance, spend and tier of the caller
#[derive(Debug, Clone, Serialize)]
pub struct AccountResponse {
    pub user_id: UserId,
    pub balance: i64,
    pub cumulative_spend: i64,
    pub tier: Tier,
    pub referrer_id: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            user_id: account.user_id,
            balance: account.balance,
            cumulative_spend: account.cumulative_spend,
            tier: account.tier,
            referrer_id: account.referrer_id,
            updated_at: account.updated_at,
        }
    }
}

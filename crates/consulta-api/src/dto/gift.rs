//! Gift DTOs

use consulta_core::models::{SessionId, Tier, UserId};
use consulta_services::GiftReceipt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Send a gift to the counselor on the call
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendGiftRequest {
    /// Gift amount in minor units
    #[validate(range(min = 1, message = "Gift amount must be positive"))]
    pub amount: i64,
}

/// Settled gift
#[derive(Debug, Clone, Serialize)]
pub struct GiftResponse {
    pub gift_id: Uuid,
    pub session_id: SessionId,
    pub worker_id: UserId,
    pub amount: i64,
    pub worker_share: i64,
    /// Sender balance after the gift
    pub balance: i64,
    pub tier: Tier,
}

impl From<GiftReceipt> for GiftResponse {
    fn from(receipt: GiftReceipt) -> Self {
        Self {
            gift_id: receipt.gift_id,
            session_id: receipt.session_id,
            worker_id: receipt.worker_id,
            amount: receipt.outcome.charged,
            worker_share: receipt.outcome.plan.payee,
            balance: receipt.outcome.payer_balance,
            tier: receipt.outcome.payer_tier,
        }
    }
}

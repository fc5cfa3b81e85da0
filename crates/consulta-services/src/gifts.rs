//! Gifts sent by a requester to the counselor of their live call

use consulta_core::models::{ChargeKind, Notification, SessionId, SessionStatus, UserId};
use consulta_core::traits::{NotificationChannel, Store, StoreTx};
use consulta_core::{AppError, AppResult};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::settlement::{ChargePolicy, SettlementLedger, SettlementOutcome, SettlementRequest};

/// A settled gift
#[derive(Debug, Clone)]
pub struct GiftReceipt {
    pub gift_id: Uuid,
    pub session_id: SessionId,
    pub worker_id: UserId,
    pub outcome: SettlementOutcome,
}

pub struct GiftService {
    store: Arc<dyn Store>,
    settlement: Arc<SettlementLedger>,
    notifier: Arc<dyn NotificationChannel>,
}

impl GiftService {
    pub fn new(
        store: Arc<dyn Store>,
        settlement: Arc<SettlementLedger>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            store,
            settlement,
            notifier,
        }
    }

    /// Charge a gift to the sender and split it like any other charge
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` for a non-positive amount
    /// - `AppError::SessionNotFound`, or `AppError::InvalidStateTransition` when
    ///   the call is not ACTIVE
    /// - `AppError::Forbidden` when the sender is not the session's requester
    /// - `AppError::InsufficientFunds` when the balance cannot cover the gift
    #[instrument(skip(self))]
    pub async fn send_gift(
        &self,
        sender_id: UserId,
        session_id: SessionId,
        amount: i64,
    ) -> AppResult<GiftReceipt> {
        if amount <= 0 {
            return Err(AppError::Validation(format!(
                "gift amount must be positive, got {}",
                amount
            )));
        }

        let mut tx = self.store.begin().await?;
        let receipt = match self.send_in(tx.as_mut(), sender_id, session_id, amount).await {
            Ok(receipt) => receipt,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back gift");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        info!(
            gift_id = %receipt.gift_id,
            %session_id,
            sender_id,
            worker_id = receipt.worker_id,
            amount,
            "Gift settled"
        );
        self.notifier.publish(Notification::GiftReceived {
            session_id,
            gift_id: receipt.gift_id,
            sender_id,
            worker_id: receipt.worker_id,
            amount,
        });
        Ok(receipt)
    }

    async fn send_in(
        &self,
        tx: &mut dyn StoreTx,
        sender_id: UserId,
        session_id: SessionId,
        amount: i64,
    ) -> AppResult<GiftReceipt> {
        let session = tx
            .lock_session(session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        if session.status() != SessionStatus::Active {
            return Err(AppError::InvalidStateTransition(format!(
                "gifts need an active call, session {} is {}",
                session_id,
                session.status()
            )));
        }
        if session.requester_id != sender_id {
            return Err(AppError::Forbidden);
        }
        let worker_id = session.worker_id().ok_or_else(|| {
            AppError::Internal(format!("active session {} has no worker", session_id))
        })?;

        let gift_id = Uuid::now_v7();
        let outcome = self
            .settlement
            .settle_in(
                tx,
                &SettlementRequest {
                    transaction_id: gift_id,
                    session_id,
                    kind: ChargeKind::Gift,
                    payer_id: sender_id,
                    payee_id: worker_id,
                    amount,
                    policy: ChargePolicy::Exact,
                },
            )
            .await?;

        Ok(GiftReceipt {
            gift_id,
            session_id,
            worker_id,
            outcome,
        })
    }
}

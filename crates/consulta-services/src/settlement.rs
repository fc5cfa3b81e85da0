//! Settlement ledger
//!
//! Splits one charge between the payee, the platform and up to two referrers,
//! and applies the split atomically:
//! - Debit the payer and grow their cumulative spend
//! - Credit the payee and each referrer present
//! - Write one ledger entry per non-zero share
//! - Recompute the payer's tier
//!
//! Every share is `floor(amount × rate)`; the platform keeps the remainder, so
//! the entries of one settlement always sum to the charged amount.

use consulta_core::config::SettlementConfig;
use consulta_core::models::{
    Account, ChargeKind, LedgerEntry, SessionId, ShareKind, Tier, UserId,
};
use consulta_core::traits::{Store, StoreTx};
use consulta_core::{AppError, AppResult, Clock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// How to treat a payer who cannot cover the full amount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargePolicy {
    /// Refuse with `InsufficientFunds`
    Exact,
    /// Charge what the balance allows and report the shortfall
    UpToBalance,
}

/// Share amounts of one charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SplitPlan {
    pub amount: i64,
    pub payee: i64,
    pub payer_referrer: i64,
    pub payee_referrer: i64,
    pub platform: i64,
}

impl SplitPlan {
    pub fn total(&self) -> i64 {
        self.payee + self.payer_referrer + self.payee_referrer + self.platform
    }
}

/// One charge to settle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRequest {
    /// Session id for consultation minutes, gift id for gifts
    pub transaction_id: Uuid,
    pub session_id: SessionId,
    pub kind: ChargeKind,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub amount: i64,
    pub policy: ChargePolicy,
}

/// What a settlement did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub transaction_id: Uuid,
    /// Amount actually taken from the payer
    pub charged: i64,
    /// Part of the requested amount the balance could not cover
    pub shortfall: i64,
    pub plan: SplitPlan,
    pub entries: Vec<LedgerEntry>,
    pub payer_balance: i64,
    pub payer_tier: Tier,
}

impl SettlementOutcome {
    fn empty(request: &SettlementRequest, payer: &Account) -> Self {
        Self {
            transaction_id: request.transaction_id,
            charged: 0,
            shortfall: request.amount,
            plan: SplitPlan::default(),
            entries: Vec::new(),
            payer_balance: payer.balance,
            payer_tier: payer.tier,
        }
    }
}

fn share(amount: i64, rate: Decimal) -> i64 {
    (Decimal::from(amount) * rate)
        .floor()
        .to_i64()
        .unwrap_or_default()
}

/// Multi-party settlement over a [`Store`]
pub struct SettlementLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: SettlementConfig,
}

impl SettlementLedger {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: SettlementConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn payee_rate(&self, kind: ChargeKind) -> Decimal {
        match kind {
            ChargeKind::Consultation => self.config.consultation_payee_rate,
            ChargeKind::Gift => self.config.gift_payee_rate,
        }
    }

    /// Compute the shares of a charge
    ///
    /// # Examples
    ///
    /// ```
    /// use consulta_core::config::SettlementConfig;
    /// use consulta_core::models::ChargeKind;
    /// use consulta_core::ManualClock;
    /// use consulta_db::MemoryStore;
    /// use consulta_services::SettlementLedger;
    /// use std::sync::Arc;
    ///
    /// let ledger = SettlementLedger::new(
    ///     Arc::new(MemoryStore::new()),
    ///     Arc::new(ManualClock::deterministic()),
    ///     SettlementConfig::default(),
    /// );
    /// let plan = ledger.split(42_000, ChargeKind::Consultation, false, false);
    /// assert_eq!(plan.payee, 25_200);
    /// assert_eq!(plan.platform, 16_800);
    /// ```
    pub fn split(
        &self,
        amount: i64,
        kind: ChargeKind,
        payer_has_referrer: bool,
        payee_has_referrer: bool,
    ) -> SplitPlan {
        let amount = amount.max(0);
        let payee = share(amount, self.payee_rate(kind));
        let referral = share(amount, self.config.referrer_rate);
        let payer_referrer = if payer_has_referrer { referral } else { 0 };
        let payee_referrer = if payee_has_referrer { referral } else { 0 };

        SplitPlan {
            amount,
            payee,
            payer_referrer,
            payee_referrer,
            platform: amount - payee - payer_referrer - payee_referrer,
        }
    }

    /// Referrer of an account if it exists in the store
    async fn resolve_referrer(
        &self,
        tx: &mut dyn StoreTx,
        accounts: &mut BTreeMap<UserId, Account>,
        account_id: UserId,
    ) -> AppResult<Option<UserId>> {
        let Some(referrer_id) = accounts
            .get(&account_id)
            .and_then(Account::effective_referrer)
        else {
            return Ok(None);
        };

        if accounts.contains_key(&referrer_id) {
            return Ok(Some(referrer_id));
        }

        match tx.lock_account(referrer_id).await? {
            Some(referrer) => {
                accounts.insert(referrer_id, referrer);
                Ok(Some(referrer_id))
            }
            None => {
                warn!(account_id, referrer_id, "Referrer account not found, share goes to platform");
                Ok(None)
            }
        }
    }

    /// Settle a charge inside the caller's transaction
    ///
    /// Nothing is committed here; on error the caller must roll back.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidInput` for a negative amount or a self-payment
    /// - `AppError::AccountNotFound` if payer or payee is missing
    /// - `AppError::InsufficientFunds` under [`ChargePolicy::Exact`]
    /// - store errors
    #[instrument(skip(self, tx), fields(transaction_id = %request.transaction_id, kind = %request.kind))]
    pub async fn settle_in(
        &self,
        tx: &mut dyn StoreTx,
        request: &SettlementRequest,
    ) -> AppResult<SettlementOutcome> {
        if request.amount < 0 {
            return Err(AppError::InvalidInput(format!(
                "charge amount must not be negative, got {}",
                request.amount
            )));
        }
        if request.payer_id == request.payee_id {
            return Err(AppError::InvalidInput(format!(
                "user {} cannot pay themselves",
                request.payer_id
            )));
        }

        let payer = tx
            .lock_account(request.payer_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(request.payer_id.to_string()))?;
        let payee = tx
            .lock_account(request.payee_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(request.payee_id.to_string()))?;

        let charged = match request.policy {
            ChargePolicy::Exact if !payer.can_cover(request.amount) => {
                warn!(
                    payer_id = payer.user_id,
                    required = request.amount,
                    available = payer.balance,
                    "Insufficient balance for charge"
                );
                return Err(AppError::InsufficientFunds {
                    required: request.amount,
                    available: payer.balance,
                });
            }
            ChargePolicy::Exact => request.amount,
            ChargePolicy::UpToBalance => request.amount.min(payer.balance.max(0)),
        };

        if charged == 0 {
            debug!(payer_id = payer.user_id, "Nothing to charge");
            return Ok(SettlementOutcome::empty(request, &payer));
        }

        let mut accounts = BTreeMap::new();
        accounts.insert(payer.user_id, payer);
        accounts.insert(payee.user_id, payee);

        let payer_referrer = self
            .resolve_referrer(tx, &mut accounts, request.payer_id)
            .await?;
        let payee_referrer = self
            .resolve_referrer(tx, &mut accounts, request.payee_id)
            .await?;

        let plan = self.split(
            charged,
            request.kind,
            payer_referrer.is_some(),
            payee_referrer.is_some(),
        );

        // Credits per user; one user may hold several roles
        let mut credits: BTreeMap<UserId, i64> = BTreeMap::new();
        *credits.entry(request.payee_id).or_default() += plan.payee;
        if let Some(id) = payer_referrer {
            *credits.entry(id).or_default() += plan.payer_referrer;
        }
        if let Some(id) = payee_referrer {
            *credits.entry(id).or_default() += plan.payee_referrer;
        }

        let now = self.clock.now();
        let thresholds = self.config.tier_thresholds();

        let payer_tier = {
            let payer = accounts
                .get_mut(&request.payer_id)
                .ok_or_else(|| AppError::Internal("payer vanished from settlement".into()))?;
            payer.balance -= charged;
            payer.cumulative_spend += charged;
            let tier = Tier::for_spend(payer.cumulative_spend, &thresholds);
            if tier != payer.tier {
                info!(
                    user_id = payer.user_id,
                    from = %payer.tier,
                    to = %tier,
                    cumulative_spend = payer.cumulative_spend,
                    "Payer tier changed"
                );
                payer.tier = tier;
            }
            tier
        };

        for (user_id, credit) in &credits {
            if let Some(account) = accounts.get_mut(user_id) {
                account.balance += credit;
            }
        }

        for account in accounts.values_mut() {
            account.updated_at = now;
            tx.save_account(account).await?;
        }

        let shares = [
            (ShareKind::Worker, Some(request.payee_id), plan.payee),
            (ShareKind::Platform, None, plan.platform),
            (ShareKind::ReferrerOfPayer, payer_referrer, plan.payer_referrer),
            (ShareKind::ReferrerOfPayee, payee_referrer, plan.payee_referrer),
        ];

        let mut entries = Vec::with_capacity(shares.len());
        for (share_kind, beneficiary_id, amount) in shares {
            if amount <= 0 {
                continue;
            }
            let entry = LedgerEntry {
                id: Uuid::now_v7(),
                transaction_id: request.transaction_id,
                session_id: request.session_id,
                charge_kind: request.kind,
                beneficiary_id,
                share_kind,
                amount,
                settled_at: now,
            };
            tx.insert_ledger_entry(&entry).await?;
            entries.push(entry);
        }

        let payer_balance = accounts
            .get(&request.payer_id)
            .map(|a| a.balance)
            .unwrap_or_default();

        info!(
            payer_id = request.payer_id,
            payee_id = request.payee_id,
            charged,
            shortfall = request.amount - charged,
            payee_share = plan.payee,
            platform_share = plan.platform,
            "Charge settled"
        );

        Ok(SettlementOutcome {
            transaction_id: request.transaction_id,
            charged,
            shortfall: request.amount - charged,
            plan,
            entries,
            payer_balance,
            payer_tier,
        })
    }

    /// Settle a charge in its own transaction
    #[instrument(skip(self), fields(transaction_id = %request.transaction_id))]
    pub async fn settle(&self, request: &SettlementRequest) -> AppResult<SettlementOutcome> {
        let mut tx = self.store.begin().await?;

        match self.settle_in(tx.as_mut(), request).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back settlement");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consulta_core::ManualClock;
    use consulta_db::MemoryStore;
    use rust_decimal_macros::dec;

    fn ledger(store: MemoryStore) -> SettlementLedger {
        SettlementLedger::new(
            Arc::new(store),
            Arc::new(ManualClock::deterministic()),
            SettlementConfig::default(),
        )
    }

    async fn seed(store: &MemoryStore, id: UserId, balance: i64, referrer: Option<UserId>) {
        let now = ManualClock::deterministic().now();
        store
            .upsert_account(&Account::new(id, balance, referrer, now))
            .await
            .unwrap();
    }

    fn request(payer: UserId, payee: UserId, amount: i64, policy: ChargePolicy) -> SettlementRequest {
        let id = Uuid::now_v7();
        SettlementRequest {
            transaction_id: id,
            session_id: id,
            kind: ChargeKind::Consultation,
            payer_id: payer,
            payee_id: payee,
            amount,
            policy,
        }
    }

    #[test]
    fn test_split_floors_and_platform_takes_remainder() {
        let ledger = ledger(MemoryStore::new());

        let plan = ledger.split(42_000, ChargeKind::Consultation, true, true);
        assert_eq!(plan.payee, 25_200);
        assert_eq!(plan.payer_referrer, 2_100);
        assert_eq!(plan.payee_referrer, 2_100);
        assert_eq!(plan.platform, 12_600);

        let plan = ledger.split(33, ChargeKind::Gift, true, false);
        assert_eq!(plan.payee, 19);
        assert_eq!(plan.payer_referrer, 1);
        assert_eq!(plan.payee_referrer, 0);
        assert_eq!(plan.platform, 13);
        assert_eq!(plan.total(), 33);
    }

    #[test]
    fn test_split_uses_rate_per_kind() {
        let mut config = SettlementConfig::default();
        config.gift_payee_rate = dec!(0.8);
        let ledger = SettlementLedger::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::deterministic()),
            config,
        );

        assert_eq!(ledger.split(1_000, ChargeKind::Gift, false, false).payee, 800);
        assert_eq!(ledger.split(1_000, ChargeKind::Consultation, false, false).payee, 600);
    }

    #[tokio::test]
    async fn test_exact_policy_rejects_and_leaves_balances() {
        let store = MemoryStore::new();
        seed(&store, 1, 500, None).await;
        seed(&store, 2, 0, None).await;
        let ledger = ledger(store.clone());

        let result = ledger.settle(&request(1, 2, 501, ChargePolicy::Exact)).await;
        assert!(matches!(
            result,
            Err(AppError::InsufficientFunds {
                required: 501,
                available: 500
            })
        ));
        assert_eq!(store.get_account(1).await.unwrap().unwrap().balance, 500);
        assert!(store.all_ledger_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_up_to_balance_reports_shortfall() {
        let store = MemoryStore::new();
        seed(&store, 1, 10_000, None).await;
        seed(&store, 2, 0, None).await;
        let ledger = ledger(store.clone());

        let outcome = ledger
            .settle(&request(1, 2, 14_000, ChargePolicy::UpToBalance))
            .await
            .unwrap();
        assert_eq!(outcome.charged, 10_000);
        assert_eq!(outcome.shortfall, 4_000);
        assert_eq!(outcome.payer_balance, 0);
        assert_eq!(store.get_account(2).await.unwrap().unwrap().balance, 6_000);
    }

    #[tokio::test]
    async fn test_referrer_holding_two_roles_is_credited_twice() {
        let store = MemoryStore::new();
        // user 9 referred both parties
        seed(&store, 1, 10_000, Some(9)).await;
        seed(&store, 2, 0, Some(9)).await;
        seed(&store, 9, 0, None).await;
        let ledger = ledger(store.clone());

        let outcome = ledger
            .settle(&request(1, 2, 1_000, ChargePolicy::Exact))
            .await
            .unwrap();
        assert_eq!(outcome.entries.len(), 4);
        assert_eq!(store.get_account(9).await.unwrap().unwrap().balance, 100);
        assert_eq!(store.total_balance().await + outcome.plan.platform, 10_000);
    }

    #[tokio::test]
    async fn test_payee_referred_by_payer() {
        let store = MemoryStore::new();
        seed(&store, 1, 10_000, None).await;
        seed(&store, 2, 0, Some(1)).await;
        let ledger = ledger(store.clone());

        ledger
            .settle(&request(1, 2, 1_000, ChargePolicy::Exact))
            .await
            .unwrap();
        // payer pays 1000 and earns the 50 referral on the payee's side
        assert_eq!(store.get_account(1).await.unwrap().unwrap().balance, 9_050);
        assert_eq!(store.get_account(2).await.unwrap().unwrap().balance, 600);
    }

    #[tokio::test]
    async fn test_dangling_referrer_counts_as_absent() {
        let store = MemoryStore::new();
        seed(&store, 1, 10_000, Some(404)).await;
        seed(&store, 2, 0, None).await;
        let ledger = ledger(store.clone());

        let outcome = ledger
            .settle(&request(1, 2, 1_000, ChargePolicy::Exact))
            .await
            .unwrap();
        assert_eq!(outcome.plan.payer_referrer, 0);
        assert_eq!(outcome.plan.platform, 400);
    }

    #[tokio::test]
    async fn test_self_payment_rejected() {
        let store = MemoryStore::new();
        seed(&store, 1, 10_000, None).await;
        let ledger = ledger(store);

        assert!(matches!(
            ledger.settle(&request(1, 1, 100, ChargePolicy::Exact)).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}

//! In-process store
//!
//! A transaction holds the whole store exclusively, so transactions are
//! serializable. Writes are staged on the transaction and applied on commit.

use async_trait::async_trait;
use consulta_core::models::{
    Account, CallSession, LedgerEntry, SessionId, SessionStatus, UserId,
};
use consulta_core::traits::{Store, StoreTx};
use consulta_core::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<UserId, Account>,
    sessions: HashMap<SessionId, CallSession>,
    ledger: Vec<LedgerEntry>,
}

/// Store backed by process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with `StoreUnavailable`
    ///
    /// A failed commit discards the transaction's writes.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Sum of all balances, for conservation checks
    pub async fn total_balance(&self) -> i64 {
        let state = self.state.lock().await;
        state.accounts.values().map(|a| a.balance).sum()
    }

    /// Every ledger entry ever committed
    pub async fn all_ledger_entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.ledger.clone()
    }

    fn take_commit_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryStoreTx {
            guard,
            store: self.clone(),
            accounts: HashMap::new(),
            sessions: HashMap::new(),
            ledger: Vec::new(),
        }))
    }

    async fn get_account(&self, user_id: UserId) -> AppResult<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(&user_id).cloned())
    }

    async fn upsert_account(&self, account: &Account) -> AppResult<()> {
        self.state
            .lock()
            .await
            .accounts
            .insert(account.user_id, account.clone());
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> AppResult<Option<CallSession>> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn upsert_session(&self, session: &CallSession) -> AppResult<()> {
        self.state
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn find_open_session(&self, requester_id: UserId) -> AppResult<Option<CallSession>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.requester_id == requester_id && s.status().is_open())
            .cloned())
    }

    async fn list_sessions(&self, status: SessionStatus) -> AppResult<Vec<CallSession>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<CallSession> = state
            .sessions
            .values()
            .filter(|s| s.status() == status)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn ledger_entries(&self, transaction_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}

/// Transaction over [`MemoryStore`]
struct MemoryStoreTx {
    guard: OwnedMutexGuard<MemoryState>,
    store: MemoryStore,
    accounts: HashMap<UserId, Account>,
    sessions: HashMap<SessionId, CallSession>,
    ledger: Vec<LedgerEntry>,
}

#[async_trait]
impl StoreTx for MemoryStoreTx {
    async fn lock_account(&mut self, user_id: UserId) -> AppResult<Option<Account>> {
        Ok(self
            .accounts
            .get(&user_id)
            .or_else(|| self.guard.accounts.get(&user_id))
            .cloned())
    }

    async fn save_account(&mut self, account: &Account) -> AppResult<()> {
        if account.balance < 0 {
            return Err(AppError::Database(format!(
                "balance of account {} would become negative",
                account.user_id
            )));
        }
        self.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    async fn lock_session(&mut self, id: SessionId) -> AppResult<Option<CallSession>> {
        Ok(self
            .sessions
            .get(&id)
            .or_else(|| self.guard.sessions.get(&id))
            .cloned())
    }

    async fn save_session(&mut self, session: &CallSession) -> AppResult<()> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> AppResult<()> {
        if entry.amount <= 0 {
            return Err(AppError::Database(format!(
                "ledger entry {} has non-positive amount {}",
                entry.id, entry.amount
            )));
        }
        self.ledger.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryStoreTx {
            mut guard,
            store,
            accounts,
            sessions,
            ledger,
        } = *self;

        if store.take_commit_failure() {
            warn!("Injected commit failure, discarding staged writes");
            return Err(AppError::StoreUnavailable(
                "commit failed: store unavailable".to_string(),
            ));
        }

        debug!(
            accounts = accounts.len(),
            sessions = sessions.len(),
            ledger_entries = ledger.len(),
            "Committing memory transaction"
        );
        guard.accounts.extend(accounts);
        guard.sessions.extend(sessions);
        guard.ledger.extend(ledger);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}

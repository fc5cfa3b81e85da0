//! Boundary traits
//!
//! Abstractions over persistence, availability caching, notification delivery,
//! media credentials and relay failover. Services depend on these only.

use crate::error::AppError;
use crate::models::{
    Account, CallSession, LedgerEntry, MediaToken, Notification, QualityAssessment, SessionId,
    SessionStatus, UserId, WorkerAvailability,
};
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// One atomic unit of work against the persistent store
///
/// Rows read through `lock_*` stay locked until `commit` or `rollback`.
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    /// Read an account and lock it for update
    async fn lock_account(&mut self, user_id: UserId) -> Result<Option<Account>, AppError>;

    /// Write an account previously locked in this transaction
    async fn save_account(&mut self, account: &Account) -> Result<(), AppError>;

    /// Read a session and lock it for update
    async fn lock_session(&mut self, id: SessionId) -> Result<Option<CallSession>, AppError>;

    /// Insert or overwrite a session
    async fn save_session(&mut self, session: &CallSession) -> Result<(), AppError>;

    /// Append a ledger entry
    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), AppError>;

    /// Make every write visible atomically
    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    /// Discard every write
    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}

/// Persistent store for accounts, sessions and the ledger
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, AppError>;

    async fn upsert_account(&self, account: &Account) -> Result<(), AppError>;

    async fn get_session(&self, id: SessionId) -> Result<Option<CallSession>, AppError>;

    async fn upsert_session(&self, session: &CallSession) -> Result<(), AppError>;

    /// The requester's INITIATED, CONNECTING or ACTIVE session, if any
    async fn find_open_session(
        &self,
        requester_id: UserId,
    ) -> Result<Option<CallSession>, AppError>;

    async fn list_sessions(&self, status: SessionStatus) -> Result<Vec<CallSession>, AppError>;

    /// Entries written for one charge, in insertion order
    async fn ledger_entries(&self, transaction_id: Uuid) -> Result<Vec<LedgerEntry>, AppError>;

    /// Connectivity probe for health checks
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// TTL key/value storage for worker presence and quality assessments
#[async_trait]
pub trait AvailabilityCache: Send + Sync {
    /// Store a worker record; it disappears after `ttl`
    async fn set_worker(&self, record: &WorkerAvailability, ttl: Duration)
        -> Result<(), AppError>;

    async fn get_worker(&self, worker_id: UserId) -> Result<Option<WorkerAvailability>, AppError>;

    /// Returns whether a record existed
    async fn remove_worker(&self, worker_id: UserId) -> Result<bool, AppError>;

    /// Every record still held, live or stale
    async fn list_workers(&self) -> Result<Vec<WorkerAvailability>, AppError>;

    async fn set_quality(
        &self,
        assessment: &QualityAssessment,
        ttl: Duration,
    ) -> Result<(), AppError>;

    async fn get_quality(&self, worker_id: UserId)
        -> Result<Option<QualityAssessment>, AppError>;
}

/// Fire-and-forget event sink
pub trait NotificationChannel: Send + Sync {
    fn publish(&self, notification: Notification);
}

/// Issues media credentials once a session is connected
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_media_token(
        &self,
        session_id: SessionId,
        participant_id: UserId,
    ) -> Result<MediaToken, AppError>;
}

/// Called when the relay gives up on a session
#[async_trait]
pub trait FailoverHook: Send + Sync {
    async fn on_relay_exhausted(&self, session: &CallSession);
}

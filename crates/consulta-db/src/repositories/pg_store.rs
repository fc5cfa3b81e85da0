//! PostgreSQL store
//!
//! Transactions wrap a sqlx transaction; `lock_*` reads use `SELECT ... FOR UPDATE`
//! so concurrent billing steps on the same rows serialize in the database.

use super::rows::{
    insert_ledger_query, upsert_account_query, upsert_session_query, AccountRow, LedgerRow,
    SessionRow, ACCOUNT_COLUMNS, LEDGER_COLUMNS, SESSION_COLUMNS,
};
use async_trait::async_trait;
use consulta_core::models::{
    Account, CallSession, LedgerEntry, SessionId, SessionStatus, UserId,
};
use consulta_core::traits::{Store, StoreTx};
use consulta_core::{AppError, AppResult};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Map a sqlx error onto the store error taxonomy
pub(crate) fn map_sqlx_error(context: &str, e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => {
                AppError::ConcurrencyConflict(format!("{}: {}", context, e))
            }
            _ => AppError::Database(format!("{}: {}", context, e)),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            AppError::StoreUnavailable(format!("{}: {}", context, e))
        }
        _ => AppError::Database(format!("{}: {}", context, e)),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Store backed by PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations
    pub async fn migrate(&self) -> AppResult<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Migration failed: {}", e)))?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            map_sqlx_error("Failed to begin transaction", e)
        })?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    #[instrument(skip(self))]
    async fn get_account(&self, user_id: UserId) -> AppResult<Option<Account>> {
        let sql = format!("SELECT {} FROM accounts WHERE user_id = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query_as::<Postgres, AccountRow>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to find account", e))?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, account), fields(user_id = account.user_id))]
    async fn upsert_account(&self, account: &Account) -> AppResult<()> {
        upsert_account_query(account)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to save account", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_session(&self, id: SessionId) -> AppResult<Option<CallSession>> {
        let sql = format!("SELECT {} FROM call_sessions WHERE id = $1", SESSION_COLUMNS);
        let row = sqlx::query_as::<Postgres, SessionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to find session", e))?;

        row.map(CallSession::try_from).transpose()
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn upsert_session(&self, session: &CallSession) -> AppResult<()> {
        upsert_session_query(session)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::SessionAlreadyOpen(session.requester_id.to_string())
                } else {
                    map_sqlx_error("Failed to save session", e)
                }
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_open_session(&self, requester_id: UserId) -> AppResult<Option<CallSession>> {
        let sql = format!(
            "SELECT {} FROM call_sessions \
             WHERE requester_id = $1 AND status IN ('initiated', 'connecting', 'active') \
             LIMIT 1",
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, SessionRow>(&sql)
            .bind(requester_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to find open session", e))?;

        row.map(CallSession::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_sessions(&self, status: SessionStatus) -> AppResult<Vec<CallSession>> {
        let sql = format!(
            "SELECT {} FROM call_sessions WHERE status = $1 ORDER BY created_at",
            SESSION_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, SessionRow>(&sql)
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to list sessions", e))?;

        debug!("Loaded {} {} sessions", rows.len(), status);
        rows.into_iter().map(CallSession::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn ledger_entries(&self, transaction_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE transaction_id = $1 ORDER BY settled_at, id",
            LEDGER_COLUMNS
        );
        let rows = sqlx::query_as::<Postgres, LedgerRow>(&sql)
            .bind(transaction_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to load ledger entries", e))?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Database health check failed", e))?;
        Ok(())
    }
}

/// Transaction over [`PgStore`]
struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn lock_account(&mut self, user_id: UserId) -> AppResult<Option<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE user_id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, AccountRow>(&sql)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to lock account", e))?;

        Ok(row.map(Into::into))
    }

    async fn save_account(&mut self, account: &Account) -> AppResult<()> {
        upsert_account_query(account)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to save account", e))?;
        Ok(())
    }

    async fn lock_session(&mut self, id: SessionId) -> AppResult<Option<CallSession>> {
        let sql = format!(
            "SELECT {} FROM call_sessions WHERE id = $1 FOR UPDATE",
            SESSION_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, SessionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to lock session", e))?;

        row.map(CallSession::try_from).transpose()
    }

    async fn save_session(&mut self, session: &CallSession) -> AppResult<()> {
        upsert_session_query(session)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::SessionAlreadyOpen(session.requester_id.to_string())
                } else {
                    map_sqlx_error("Failed to save session", e)
                }
            })?;
        Ok(())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> AppResult<()> {
        insert_ledger_query(entry)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to insert ledger entry", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            map_sqlx_error("Failed to commit transaction", e)
        })
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.tx.rollback().await.map_err(|e| {
            error!("Failed to roll back transaction: {}", e);
            AppError::Transaction(format!("Failed to roll back transaction: {}", e))
        })
    }
}

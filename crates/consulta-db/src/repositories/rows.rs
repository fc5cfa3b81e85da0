//! Row mappings between Postgres tables and domain models
//!
//! A session's tagged state is flattened into nullable columns on write and
//! rebuilt (and checked) on read.

use chrono::{DateTime, Utc};
use consulta_core::models::{
    Account, CallSession, CancelReason, ChargeKind, EndReason, LedgerEntry, SessionState,
    SessionStatus, ShareKind, Tier,
};
use consulta_core::{AppError, AppResult};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::Postgres;
use uuid::Uuid;

pub(crate) const ACCOUNT_COLUMNS: &str =
    "user_id, balance, cumulative_spend, referrer_id, tier, created_at, updated_at";

pub(crate) const SESSION_COLUMNS: &str = "id, requester_id, preferred_region, candidate_list, \
     rate_per_minute, status, candidate_index, cycle_count, relay_started_at, worker_id, \
     started_at, ended_at, billed_seconds, end_reason, created_at, updated_at";

pub(crate) const LEDGER_COLUMNS: &str = "id, transaction_id, session_id, charge_kind, \
     beneficiary_id, share_kind, amount, settled_at";

/// Account table row
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AccountRow {
    user_id: i64,
    balance: i64,
    cumulative_spend: i64,
    referrer_id: Option<i64>,
    tier: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            user_id: row.user_id,
            balance: row.balance,
            cumulative_spend: row.cumulative_spend,
            referrer_id: row.referrer_id,
            tier: Tier::from_str(&row.tier).unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub(crate) fn upsert_account_query(account: &Account) -> Query<'static, Postgres, PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO accounts (
            user_id, balance, cumulative_spend, referrer_id, tier, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id) DO UPDATE
        SET balance = EXCLUDED.balance,
            cumulative_spend = EXCLUDED.cumulative_spend,
            referrer_id = EXCLUDED.referrer_id,
            tier = EXCLUDED.tier,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(account.user_id)
    .bind(account.balance)
    .bind(account.cumulative_spend)
    .bind(account.referrer_id)
    .bind(account.tier.to_string())
    .bind(account.created_at)
    .bind(account.updated_at)
}

/// Session table row
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SessionRow {
    id: Uuid,
    requester_id: i64,
    preferred_region: Option<String>,
    candidate_list: Vec<i64>,
    rate_per_minute: i64,
    status: String,
    candidate_index: Option<i32>,
    cycle_count: Option<i32>,
    relay_started_at: Option<DateTime<Utc>>,
    worker_id: Option<i64>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    billed_seconds: i64,
    end_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn missing(id: Uuid, column: &str) -> AppError {
    AppError::Database(format!("session {} is missing column {}", id, column))
}

impl TryFrom<SessionRow> for CallSession {
    type Error = AppError;

    fn try_from(row: SessionRow) -> AppResult<Self> {
        let id = row.id;
        let status = SessionStatus::from_str(&row.status)
            .ok_or_else(|| AppError::Database(format!("session {} has status {}", id, row.status)))?;

        let state = match status {
            SessionStatus::Initiated => SessionState::Initiated,
            SessionStatus::Connecting => SessionState::Connecting {
                candidate_index: row
                    .candidate_index
                    .ok_or_else(|| missing(id, "candidate_index"))? as usize,
                cycle_count: row.cycle_count.ok_or_else(|| missing(id, "cycle_count"))? as u32,
                relay_started_at: row
                    .relay_started_at
                    .ok_or_else(|| missing(id, "relay_started_at"))?,
            },
            SessionStatus::Active => SessionState::Active {
                worker_id: row.worker_id.ok_or_else(|| missing(id, "worker_id"))?,
                started_at: row.started_at.ok_or_else(|| missing(id, "started_at"))?,
                billed_seconds: row.billed_seconds,
            },
            SessionStatus::Ended => SessionState::Ended {
                worker_id: row.worker_id.ok_or_else(|| missing(id, "worker_id"))?,
                started_at: row.started_at.ok_or_else(|| missing(id, "started_at"))?,
                ended_at: row.ended_at.ok_or_else(|| missing(id, "ended_at"))?,
                billed_seconds: row.billed_seconds,
                reason: row
                    .end_reason
                    .as_deref()
                    .and_then(EndReason::from_str)
                    .ok_or_else(|| missing(id, "end_reason"))?,
            },
            SessionStatus::Cancelled => SessionState::Cancelled {
                ended_at: row.ended_at.ok_or_else(|| missing(id, "ended_at"))?,
                reason: row
                    .end_reason
                    .as_deref()
                    .and_then(CancelReason::from_str)
                    .ok_or_else(|| missing(id, "end_reason"))?,
            },
        };

        Ok(CallSession {
            id,
            requester_id: row.requester_id,
            preferred_region: row.preferred_region,
            candidate_list: row.candidate_list,
            rate_per_minute: row.rate_per_minute,
            state,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Flattened state columns
struct StateColumns {
    candidate_index: Option<i32>,
    cycle_count: Option<i32>,
    relay_started_at: Option<DateTime<Utc>>,
    worker_id: Option<i64>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    billed_seconds: i64,
    end_reason: Option<String>,
}

impl From<&SessionState> for StateColumns {
    fn from(state: &SessionState) -> Self {
        let empty = StateColumns {
            candidate_index: None,
            cycle_count: None,
            relay_started_at: None,
            worker_id: None,
            started_at: None,
            ended_at: None,
            billed_seconds: 0,
            end_reason: None,
        };
        match state {
            SessionState::Initiated => empty,
            SessionState::Connecting {
                candidate_index,
                cycle_count,
                relay_started_at,
            } => StateColumns {
                candidate_index: Some(*candidate_index as i32),
                cycle_count: Some(*cycle_count as i32),
                relay_started_at: Some(*relay_started_at),
                ..empty
            },
            SessionState::Active {
                worker_id,
                started_at,
                billed_seconds,
            } => StateColumns {
                worker_id: Some(*worker_id),
                started_at: Some(*started_at),
                billed_seconds: *billed_seconds,
                ..empty
            },
            SessionState::Ended {
                worker_id,
                started_at,
                ended_at,
                billed_seconds,
                reason,
            } => StateColumns {
                worker_id: Some(*worker_id),
                started_at: Some(*started_at),
                ended_at: Some(*ended_at),
                billed_seconds: *billed_seconds,
                end_reason: Some(reason.to_string()),
                ..empty
            },
            SessionState::Cancelled { ended_at, reason } => StateColumns {
                ended_at: Some(*ended_at),
                end_reason: Some(reason.to_string()),
                ..empty
            },
        }
    }
}

pub(crate) fn upsert_session_query(session: &CallSession) -> Query<'static, Postgres, PgArguments> {
    let columns = StateColumns::from(&session.state);
    sqlx::query(
        r#"
        INSERT INTO call_sessions (
            id, requester_id, preferred_region, candidate_list, rate_per_minute, status,
            candidate_index, cycle_count, relay_started_at, worker_id, started_at, ended_at,
            billed_seconds, end_reason, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (id) DO UPDATE
        SET candidate_list = EXCLUDED.candidate_list,
            status = EXCLUDED.status,
            candidate_index = EXCLUDED.candidate_index,
            cycle_count = EXCLUDED.cycle_count,
            relay_started_at = EXCLUDED.relay_started_at,
            worker_id = EXCLUDED.worker_id,
            started_at = EXCLUDED.started_at,
            ended_at = EXCLUDED.ended_at,
            billed_seconds = EXCLUDED.billed_seconds,
            end_reason = EXCLUDED.end_reason,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(session.id)
    .bind(session.requester_id)
    .bind(session.preferred_region.clone())
    .bind(session.candidate_list.clone())
    .bind(session.rate_per_minute)
    .bind(session.status().to_string())
    .bind(columns.candidate_index)
    .bind(columns.cycle_count)
    .bind(columns.relay_started_at)
    .bind(columns.worker_id)
    .bind(columns.started_at)
    .bind(columns.ended_at)
    .bind(columns.billed_seconds)
    .bind(columns.end_reason)
    .bind(session.created_at)
    .bind(session.updated_at)
}

/// Ledger table row
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LedgerRow {
    id: Uuid,
    transaction_id: Uuid,
    session_id: Uuid,
    charge_kind: String,
    beneficiary_id: Option<i64>,
    share_kind: String,
    amount: i64,
    settled_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = AppError;

    fn try_from(row: LedgerRow) -> AppResult<Self> {
        Ok(LedgerEntry {
            id: row.id,
            transaction_id: row.transaction_id,
            session_id: row.session_id,
            charge_kind: ChargeKind::from_str(&row.charge_kind).ok_or_else(|| {
                AppError::Database(format!("ledger entry {} has kind {}", row.id, row.charge_kind))
            })?,
            beneficiary_id: row.beneficiary_id,
            share_kind: ShareKind::from_str(&row.share_kind).ok_or_else(|| {
                AppError::Database(format!("ledger entry {} has share {}", row.id, row.share_kind))
            })?,
            amount: row.amount,
            settled_at: row.settled_at,
        })
    }
}

pub(crate) fn insert_ledger_query(entry: &LedgerEntry) -> Query<'static, Postgres, PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (
            id, transaction_id, session_id, charge_kind, beneficiary_id, share_kind, amount,
            settled_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.transaction_id)
    .bind(entry.session_id)
    .bind(entry.charge_kind.to_string())
    .bind(entry.beneficiary_id)
    .bind(entry.share_kind.to_string())
    .bind(entry.amount)
    .bind(entry.settled_at)
}

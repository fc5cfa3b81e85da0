//! Billing sweep and ledger DTOs

use chrono::{DateTime, Utc};
use consulta_core::models::{ChargeKind, LedgerEntry, SessionId, ShareKind, UserId};
use consulta_services::SweepReport;
use serde::Serialize;
use uuid::Uuid;

/// Totals of a manual billing sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepResponse {
    pub scanned: usize,
    pub billed: usize,
    pub evicted: usize,
    pub idle: usize,
    pub contended: usize,
    pub failed: usize,
    pub charged: i64,
}

impl From<SweepReport> for SweepResponse {
    fn from(report: SweepReport) -> Self {
        Self {
            scanned: report.scanned,
            billed: report.billed,
            evicted: report.evicted,
            idle: report.idle,
            contended: report.contended,
            failed: report.failed,
            charged: report.charged,
        }
    }
}

/// One share of a settled charge
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntryResponse {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub session_id: SessionId,
    pub charge_kind: ChargeKind,
    /// `None` is the platform
    pub beneficiary_id: Option<UserId>,
    pub share_kind: ShareKind,
    pub amount: i64,
    pub settled_at: DateTime<Utc>,
}

impl From<LedgerEntry> for LedgerEntryResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id,
            transaction_id: entry.transaction_id,
            session_id: entry.session_id,
            charge_kind: entry.charge_kind,
            beneficiary_id: entry.beneficiary_id,
            share_kind: entry.share_kind,
            amount: entry.amount,
            settled_at: entry.settled_at,
        }
    }
}

/// Ledger of one transaction with its total
#[derive(Debug, Clone, Serialize)]
pub struct LedgerResponse {
    pub transaction_id: Uuid,
    pub total: i64,
    pub entries: Vec<LedgerEntryResponse>,
}

impl LedgerResponse {
    pub fn new(transaction_id: Uuid, entries: Vec<LedgerEntry>) -> Self {
        Self {
            transaction_id,
            total: entries.iter().map(|e| e.amount).sum(),
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }
}

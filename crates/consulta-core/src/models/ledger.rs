//! Ledger entry model
//!
//! One row per non-zero share of a settled charge.

use super::{SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What was charged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeKind {
    /// Metered call minutes
    Consultation,
    /// Ad-hoc gift during a call
    Gift,
}

impl fmt::Display for ChargeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChargeKind::Consultation => write!(f, "consultation"),
            ChargeKind::Gift => write!(f, "gift"),
        }
    }
}

impl ChargeKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "consultation" => Some(ChargeKind::Consultation),
            "gift" => Some(ChargeKind::Gift),
            _ => None,
        }
    }
}

/// Who a share goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareKind {
    Worker,
    Platform,
    ReferrerOfPayer,
    ReferrerOfPayee,
}

impl fmt::Display for ShareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareKind::Worker => write!(f, "WORKER"),
            ShareKind::Platform => write!(f, "PLATFORM"),
            ShareKind::ReferrerOfPayer => write!(f, "REFERRER_OF_PAYER"),
            ShareKind::ReferrerOfPayee => write!(f, "REFERRER_OF_PAYEE"),
        }
    }
}

impl ShareKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "WORKER" => Some(ShareKind::Worker),
            "PLATFORM" => Some(ShareKind::Platform),
            "REFERRER_OF_PAYER" => Some(ShareKind::ReferrerOfPayer),
            "REFERRER_OF_PAYEE" => Some(ShareKind::ReferrerOfPayee),
            _ => None,
        }
    }
}

/// Ledger entry entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,

    /// Session id for consultation charges, gift id for gifts
    pub transaction_id: Uuid,

    pub session_id: SessionId,

    pub charge_kind: ChargeKind,

    /// Credited user; `None` is the platform
    pub beneficiary_id: Option<UserId>,

    pub share_kind: ShareKind,

    /// Share in minor units, always positive
    pub amount: i64,

    pub settled_at: DateTime<Utc>,
}

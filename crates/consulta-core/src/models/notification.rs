//! Outbound notification events
//!
//! Published fire-and-forget; delivery belongs to whoever subscribes.

use super::network::{MediaToken, NetworkQuality};
use super::session::SessionStatus;
use super::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// The offer moved to a new candidate
    CandidateChanged {
        session_id: SessionId,
        requester_id: UserId,
        candidate_id: UserId,
        candidate_index: usize,
        cycle_count: u32,
    },
    /// A worker accepted; each party gets its own media token
    MatchAccepted {
        session_id: SessionId,
        requester_id: UserId,
        worker_id: UserId,
        requester_token: MediaToken,
        worker_token: MediaToken,
    },
    GiftReceived {
        session_id: SessionId,
        gift_id: Uuid,
        sender_id: UserId,
        worker_id: UserId,
        amount: i64,
    },
    /// A worker was refused availability because of its link
    NetworkGuidance {
        worker_id: UserId,
        quality: NetworkQuality,
        message: String,
    },
    SessionEnded {
        session_id: SessionId,
        requester_id: UserId,
        worker_id: Option<UserId>,
        status: SessionStatus,
        reason: String,
    },
}

impl Notification {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::CandidateChanged { .. } => "candidate_changed",
            Notification::MatchAccepted { .. } => "match_accepted",
            Notification::GiftReceived { .. } => "gift_received",
            Notification::NetworkGuidance { .. } => "network_guidance",
            Notification::SessionEnded { .. } => "session_ended",
        }
    }

    /// Users the event is addressed to
    pub fn recipients(&self) -> Vec<UserId> {
        match self {
            Notification::CandidateChanged {
                requester_id,
                candidate_id,
                ..
            } => vec![*requester_id, *candidate_id],
            Notification::MatchAccepted {
                requester_id,
                worker_id,
                ..
            } => vec![*requester_id, *worker_id],
            Notification::GiftReceived {
                sender_id,
                worker_id,
                ..
            } => vec![*sender_id, *worker_id],
            Notification::NetworkGuidance { worker_id, .. } => vec![*worker_id],
            Notification::SessionEnded {
                requester_id,
                worker_id,
                ..
            } => std::iter::once(*requester_id).chain(*worker_id).collect(),
        }
    }
}

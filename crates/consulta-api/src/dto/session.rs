//! Match and session DTOs

use chrono::{DateTime, Utc};
use consulta_core::models::{CallSession, MediaToken, SessionId, SessionState, SessionStatus, UserId};
use consulta_services::AcceptedMatch;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Start a match
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct StartMatchRequest {
    /// Region to fill the first candidate slots from
    #[validate(length(min = 1, max = 64, message = "Region must be 1-64 characters"))]
    pub preferred_region: Option<String>,
}

/// Session view
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: SessionId,
    pub requester_id: UserId,
    pub worker_id: Option<UserId>,
    pub status: SessionStatus,
    pub preferred_region: Option<String>,
    pub candidate_count: usize,
    pub current_candidate: Option<UserId>,
    pub cycle_count: Option<u32>,
    pub rate_per_minute: i64,
    pub billed_seconds: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CallSession> for SessionResponse {
    fn from(session: CallSession) -> Self {
        let reason = match &session.state {
            SessionState::Ended { reason, .. } => Some(reason.to_string()),
            SessionState::Cancelled { reason, .. } => Some(reason.to_string()),
            SessionState::Initiated
            | SessionState::Connecting { .. }
            | SessionState::Active { .. } => None,
        };

        Self {
            id: session.id,
            requester_id: session.requester_id,
            worker_id: session.worker_id(),
            status: session.status(),
            candidate_count: session.candidate_list.len(),
            current_candidate: session.current_candidate(),
            cycle_count: session.cycle_count(),
            rate_per_minute: session.rate_per_minute,
            billed_seconds: session.billed_seconds(),
            started_at: session.started_at(),
            ended_at: session.ended_at(),
            reason,
            created_at: session.created_at,
            preferred_region: session.preferred_region,
        }
    }
}

/// Media credential for one participant
#[derive(Debug, Clone, Serialize)]
pub struct MediaTokenResponse {
    pub session_id: SessionId,
    pub participant_id: UserId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<MediaToken> for MediaTokenResponse {
    fn from(token: MediaToken) -> Self {
        Self {
            session_id: token.session_id,
            participant_id: token.participant_id,
            token: token.token,
            expires_at: token.expires_at,
        }
    }
}

/// Accepted match as seen by the accepting counselor
///
/// The requester's token travels on the `match_accepted` notification.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptMatchResponse {
    pub session: SessionResponse,
    pub media_token: MediaTokenResponse,
}

impl From<AcceptedMatch> for AcceptMatchResponse {
    fn from(accepted: AcceptedMatch) -> Self {
        Self {
            session: accepted.session.into(),
            media_token: accepted.worker_token.into(),
        }
    }
}

//! Call session model
//!
//! A session moves INITIATED → CONNECTING → {ACTIVE, CANCELLED} and ACTIVE → ENDED.
//! ENDED and CANCELLED are terminal. Each transition is a method on [`CallSession`]
//! that matches the full state enum and rejects anything illegal.

use super::{SessionId, UserId};
use crate::error::AppError;
use crate::AppResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Flat session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiated,
    Connecting,
    Active,
    Ended,
    Cancelled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Initiated => write!(f, "initiated"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Ended => write!(f, "ended"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl SessionStatus {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "initiated" => Some(SessionStatus::Initiated),
            "connecting" => Some(SessionStatus::Connecting),
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    /// A requester may hold at most one open session
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SessionStatus::Initiated | SessionStatus::Connecting | SessionStatus::Active
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

/// Why an active session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A participant hung up
    Completed,
    /// Cancelled while connected
    Cancelled,
    /// Balance ran out during the call
    InsufficientFunds,
    /// Final settlement was rolled back
    SettlementFailed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Completed => write!(f, "completed"),
            EndReason::Cancelled => write!(f, "cancelled"),
            EndReason::InsufficientFunds => write!(f, "insufficient_funds"),
            EndReason::SettlementFailed => write!(f, "settlement_failed"),
        }
    }
}

impl EndReason {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(EndReason::Completed),
            "cancelled" => Some(EndReason::Cancelled),
            "insufficient_funds" => Some(EndReason::InsufficientFunds),
            "settlement_failed" => Some(EndReason::SettlementFailed),
            _ => None,
        }
    }
}

/// Why a session was cancelled before connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    RequesterCancelled,
    NoCounselorAvailable,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::RequesterCancelled => write!(f, "requester_cancelled"),
            CancelReason::NoCounselorAvailable => write!(f, "no_counselor_available"),
        }
    }
}

impl CancelReason {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "requester_cancelled" => Some(CancelReason::RequesterCancelled),
            "no_counselor_available" => Some(CancelReason::NoCounselorAvailable),
            _ => None,
        }
    }
}

/// Tagged session state; each variant carries only the data valid in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    Initiated,
    Connecting {
        candidate_index: usize,
        cycle_count: u32,
        relay_started_at: DateTime<Utc>,
    },
    Active {
        worker_id: UserId,
        started_at: DateTime<Utc>,
        billed_seconds: i64,
    },
    Ended {
        worker_id: UserId,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        billed_seconds: i64,
        reason: EndReason,
    },
    Cancelled {
        ended_at: DateTime<Utc>,
        reason: CancelReason,
    },
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Initiated => SessionStatus::Initiated,
            SessionState::Connecting { .. } => SessionStatus::Connecting,
            SessionState::Active { .. } => SessionStatus::Active,
            SessionState::Ended { .. } => SessionStatus::Ended,
            SessionState::Cancelled { .. } => SessionStatus::Cancelled,
        }
    }
}

/// Result of one relay step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStep {
    /// Current candidate still has time to accept
    Waiting,
    /// Offer moved to the next candidate
    Advanced { candidate: UserId, wrapped: bool },
    /// Candidate list cycled too many times; session cancelled
    Exhausted,
}

/// Call session entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSession {
    /// Session identifier (UUID v7)
    pub id: SessionId,

    /// User waiting for a counselor
    pub requester_id: UserId,

    /// Region the requester would rather be matched in
    pub preferred_region: Option<String>,

    /// Ordered candidates offered the call
    pub candidate_list: Vec<UserId>,

    /// Price per connected minute, captured at start
    pub rate_per_minute: i64,

    /// Lifecycle state
    pub state: SessionState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallSession {
    /// Create a session in INITIATED
    pub fn new(
        id: SessionId,
        requester_id: UserId,
        preferred_region: Option<String>,
        rate_per_minute: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            requester_id,
            preferred_region,
            candidate_list: Vec::new(),
            rate_per_minute,
            state: SessionState::Initiated,
            created_at: now,
            updated_at: now,
        }
    }

    // ==================== Accessors ====================

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Candidate currently offered the call while CONNECTING
    pub fn current_candidate(&self) -> Option<UserId> {
        match &self.state {
            SessionState::Connecting {
                candidate_index, ..
            } => self.candidate_list.get(*candidate_index).copied(),
            _ => None,
        }
    }

    /// Current candidate while CONNECTING, matched worker afterwards
    pub fn worker_id(&self) -> Option<UserId> {
        match &self.state {
            SessionState::Initiated | SessionState::Cancelled { .. } => None,
            SessionState::Connecting { .. } => self.current_candidate(),
            SessionState::Active { worker_id, .. } | SessionState::Ended { worker_id, .. } => {
                Some(*worker_id)
            }
        }
    }

    /// Worker that accepted the call; `None` until ACTIVE
    pub fn matched_worker(&self) -> Option<UserId> {
        match &self.state {
            SessionState::Active { worker_id, .. } | SessionState::Ended { worker_id, .. } => {
                Some(*worker_id)
            }
            SessionState::Initiated
            | SessionState::Connecting { .. }
            | SessionState::Cancelled { .. } => None,
        }
    }

    pub fn candidate_index(&self) -> Option<usize> {
        match &self.state {
            SessionState::Connecting {
                candidate_index, ..
            } => Some(*candidate_index),
            _ => None,
        }
    }

    pub fn cycle_count(&self) -> Option<u32> {
        match &self.state {
            SessionState::Connecting { cycle_count, .. } => Some(*cycle_count),
            _ => None,
        }
    }

    pub fn relay_started_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            SessionState::Connecting {
                relay_started_at, ..
            } => Some(*relay_started_at),
            _ => None,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            SessionState::Active { started_at, .. } | SessionState::Ended { started_at, .. } => {
                Some(*started_at)
            }
            _ => None,
        }
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            SessionState::Ended { ended_at, .. } | SessionState::Cancelled { ended_at, .. } => {
                Some(*ended_at)
            }
            _ => None,
        }
    }

    pub fn billed_seconds(&self) -> i64 {
        match &self.state {
            SessionState::Active { billed_seconds, .. }
            | SessionState::Ended { billed_seconds, .. } => *billed_seconds,
            _ => 0,
        }
    }

    /// Whole seconds connected so far; zero unless ACTIVE
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        match &self.state {
            SessionState::Active { started_at, .. } => (now - *started_at).num_seconds().max(0),
            _ => 0,
        }
    }

    /// Requester, or the matched worker once connected
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.requester_id == user_id || self.matched_worker() == Some(user_id)
    }

    // ==================== Transitions ====================

    /// INITIATED → CONNECTING at the first candidate
    pub fn begin_relay(&mut self, candidates: Vec<UserId>, now: DateTime<Utc>) -> AppResult<()> {
        match &self.state {
            SessionState::Initiated if !candidates.is_empty() => {
                self.candidate_list = candidates;
                self.state = SessionState::Connecting {
                    candidate_index: 0,
                    cycle_count: 0,
                    relay_started_at: now,
                };
                self.updated_at = now;
                Ok(())
            }
            SessionState::Initiated => Err(AppError::NoAvailableCounselor),
            SessionState::Connecting { .. }
            | SessionState::Active { .. }
            | SessionState::Ended { .. }
            | SessionState::Cancelled { .. } => Err(self.illegal("begin relay")),
        }
    }

    /// Move the offer on once the relay timeout has passed
    ///
    /// Wrapping past the last candidate counts a cycle; reaching `max_cycles`
    /// cancels the session.
    pub fn advance_relay(
        &mut self,
        now: DateTime<Utc>,
        relay_timeout: Duration,
        max_cycles: u32,
    ) -> AppResult<RelayStep> {
        match &self.state {
            SessionState::Connecting {
                candidate_index,
                cycle_count,
                relay_started_at,
            } => {
                if now - *relay_started_at < relay_timeout {
                    return Ok(RelayStep::Waiting);
                }

                let len = self.candidate_list.len().max(1);
                let next = (candidate_index + 1) % len;
                let wrapped = next == 0;
                let cycles = if wrapped { cycle_count + 1 } else { *cycle_count };

                self.updated_at = now;
                if cycles >= max_cycles {
                    self.state = SessionState::Cancelled {
                        ended_at: now,
                        reason: CancelReason::NoCounselorAvailable,
                    };
                    return Ok(RelayStep::Exhausted);
                }

                self.state = SessionState::Connecting {
                    candidate_index: next,
                    cycle_count: cycles,
                    relay_started_at: now,
                };
                let candidate = self
                    .candidate_list
                    .get(next)
                    .copied()
                    .ok_or_else(|| AppError::Internal("candidate index out of range".into()))?;
                Ok(RelayStep::Advanced { candidate, wrapped })
            }
            SessionState::Initiated
            | SessionState::Active { .. }
            | SessionState::Ended { .. }
            | SessionState::Cancelled { .. } => Err(self.illegal("advance relay")),
        }
    }

    /// CONNECTING → ACTIVE when the current candidate accepts
    pub fn accept(&mut self, worker_id: UserId, now: DateTime<Utc>) -> AppResult<()> {
        match &self.state {
            SessionState::Connecting { .. } => {
                if self.current_candidate() != Some(worker_id) {
                    return Err(AppError::InvalidStateTransition(format!(
                        "worker {} is not the current candidate of session {}",
                        worker_id, self.id
                    )));
                }
                self.state = SessionState::Active {
                    worker_id,
                    started_at: now,
                    billed_seconds: 0,
                };
                self.updated_at = now;
                Ok(())
            }
            SessionState::Initiated
            | SessionState::Active { .. }
            | SessionState::Ended { .. }
            | SessionState::Cancelled { .. } => Err(self.illegal("accept")),
        }
    }

    /// INITIATED/CONNECTING → CANCELLED
    pub fn cancel(&mut self, reason: CancelReason, now: DateTime<Utc>) -> AppResult<()> {
        match &self.state {
            SessionState::Initiated | SessionState::Connecting { .. } => {
                self.state = SessionState::Cancelled {
                    ended_at: now,
                    reason,
                };
                self.updated_at = now;
                Ok(())
            }
            SessionState::Active { .. }
            | SessionState::Ended { .. }
            | SessionState::Cancelled { .. } => Err(self.illegal("cancel")),
        }
    }

    /// Advance the billing checkpoint of an ACTIVE session
    pub fn record_billing(&mut self, billed_seconds: i64, now: DateTime<Utc>) -> AppResult<()> {
        let id = self.id;
        let status = self.status();
        match &mut self.state {
            SessionState::Active {
                billed_seconds: current,
                ..
            } => {
                if billed_seconds < *current {
                    return Err(AppError::InvalidStateTransition(format!(
                        "billing checkpoint of session {} cannot move back from {} to {}",
                        id, current, billed_seconds
                    )));
                }
                *current = billed_seconds;
                self.updated_at = now;
                Ok(())
            }
            SessionState::Initiated
            | SessionState::Connecting { .. }
            | SessionState::Ended { .. }
            | SessionState::Cancelled { .. } => Err(illegal(id, status, "record billing")),
        }
    }

    /// ACTIVE → ENDED with the final checkpoint
    pub fn end(
        &mut self,
        reason: EndReason,
        billed_seconds: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        match &self.state {
            SessionState::Active {
                worker_id,
                started_at,
                billed_seconds: current,
            } => {
                self.state = SessionState::Ended {
                    worker_id: *worker_id,
                    started_at: *started_at,
                    ended_at: now,
                    billed_seconds: billed_seconds.max(*current),
                    reason,
                };
                self.updated_at = now;
                Ok(())
            }
            SessionState::Initiated
            | SessionState::Connecting { .. }
            | SessionState::Ended { .. }
            | SessionState::Cancelled { .. } => Err(self.illegal("end")),
        }
    }

    fn illegal(&self, action: &str) -> AppError {
        illegal(self.id, self.status(), action)
    }
}

fn illegal(id: SessionId, status: SessionStatus, action: &str) -> AppError {
    AppError::InvalidStateTransition(format!(
        "cannot {} session {} in state {}",
        action, id, status
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use uuid::Uuid;

    fn connecting(candidates: Vec<UserId>, clock: &ManualClock) -> CallSession {
        let mut session = CallSession::new(Uuid::now_v7(), 1, None, 14_000, clock.now());
        session.begin_relay(candidates, clock.now()).unwrap();
        session
    }

    #[test]
    fn test_begin_relay_requires_candidates() {
        let clock = ManualClock::deterministic();
        let mut session = CallSession::new(Uuid::now_v7(), 1, None, 14_000, clock.now());
        assert!(matches!(
            session.begin_relay(vec![], clock.now()),
            Err(AppError::NoAvailableCounselor)
        ));
        assert_eq!(session.status(), SessionStatus::Initiated);
    }

    #[test]
    fn test_relay_waits_for_timeout() {
        let clock = ManualClock::deterministic();
        let mut session = connecting(vec![10, 11], &clock);

        clock.advance_secs(19);
        let step = session
            .advance_relay(clock.now(), Duration::seconds(20), 3)
            .unwrap();
        assert_eq!(step, RelayStep::Waiting);
        assert_eq!(session.current_candidate(), Some(10));

        clock.advance_secs(1);
        let step = session
            .advance_relay(clock.now(), Duration::seconds(20), 3)
            .unwrap();
        assert_eq!(
            step,
            RelayStep::Advanced {
                candidate: 11,
                wrapped: false
            }
        );
        assert_eq!(session.candidate_index(), Some(1));
    }

    #[test]
    fn test_relay_exhausts_after_max_cycles() {
        let clock = ManualClock::deterministic();
        let mut session = connecting(vec![10, 11], &clock);

        // 2 candidates x 3 cycles = 6 timeouts; the sixth cancels
        for i in 0..5 {
            clock.advance_secs(20);
            let step = session
                .advance_relay(clock.now(), Duration::seconds(20), 3)
                .unwrap();
            assert!(matches!(step, RelayStep::Advanced { .. }), "step {}", i);
        }
        assert_eq!(session.cycle_count(), Some(2));

        clock.advance_secs(20);
        let step = session
            .advance_relay(clock.now(), Duration::seconds(20), 3)
            .unwrap();
        assert_eq!(step, RelayStep::Exhausted);
        assert!(matches!(
            session.state,
            SessionState::Cancelled {
                reason: CancelReason::NoCounselorAvailable,
                ..
            }
        ));

        clock.advance_secs(20);
        assert!(session
            .advance_relay(clock.now(), Duration::seconds(20), 3)
            .is_err());
    }

    #[test]
    fn test_accept_only_current_candidate() {
        let clock = ManualClock::deterministic();
        let mut session = connecting(vec![10, 11], &clock);

        assert!(matches!(
            session.accept(11, clock.now()),
            Err(AppError::InvalidStateTransition(_))
        ));
        session.accept(10, clock.now()).unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.worker_id(), Some(10));
        assert_eq!(session.billed_seconds(), 0);

        assert!(session.accept(10, clock.now()).is_err());
    }

    #[test]
    fn test_offered_candidate_is_not_a_participant() {
        let clock = ManualClock::deterministic();
        let mut session = connecting(vec![10, 11], &clock);

        assert!(session.is_participant(1));
        assert!(!session.is_participant(10));
        assert_eq!(session.matched_worker(), None);

        session.accept(10, clock.now()).unwrap();
        assert!(session.is_participant(10));
        assert!(!session.is_participant(11));
    }

    #[test]
    fn test_billing_checkpoint_is_monotonic() {
        let clock = ManualClock::deterministic();
        let mut session = connecting(vec![10], &clock);
        session.accept(10, clock.now()).unwrap();

        session.record_billing(120, clock.now()).unwrap();
        assert!(session.record_billing(60, clock.now()).is_err());
        assert_eq!(session.billed_seconds(), 120);
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let clock = ManualClock::deterministic();
        let mut session = connecting(vec![10], &clock);
        session
            .cancel(CancelReason::RequesterCancelled, clock.now())
            .unwrap();

        assert!(session.cancel(CancelReason::RequesterCancelled, clock.now()).is_err());
        assert!(session.accept(10, clock.now()).is_err());
        assert!(session.end(EndReason::Completed, 0, clock.now()).is_err());
        assert!(session.status().is_terminal());
    }

    #[test]
    fn test_state_serializes_with_status_tag() {
        let clock = ManualClock::deterministic();
        let session = connecting(vec![10], &clock);
        let json = serde_json::to_value(&session.state).unwrap();
        assert_eq!(json["status"], "connecting");
        assert_eq!(json["candidate_index"], 0);
    }
}

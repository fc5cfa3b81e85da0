//! Matching scheduler
//!
//! Offers a waiting requester to one candidate at a time. The relay moves on
//! when a candidate lets the offer time out, and gives up after the candidate
//! list has been cycled `max_relay_cycles` times.

use consulta_core::config::MatchingConfig;
use consulta_core::models::{
    CallSession, CancelReason, EndReason, MediaToken, Notification, RelayStep, SessionId,
    SessionStatus, UserId, WorkerStatus,
};
use consulta_core::traits::{FailoverHook, NotificationChannel, Store, StoreTx, TokenIssuer};
use consulta_core::{AppError, AppResult, Clock};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::availability::AvailabilityDirectory;
use crate::billing_meter::BillingMeter;
use crate::constants::RELAY_CONCURRENCY;
use crate::session_guard::KeyedGuards;

/// Result of one relay step on one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Step(RelayStep),
    /// Session is no longer CONNECTING
    Inactive,
    /// Another task holds the session; skipped this round
    Contended,
}

/// Totals of one relay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub scanned: usize,
    pub waiting: usize,
    pub advanced: usize,
    pub exhausted: usize,
    pub contended: usize,
    pub failed: usize,
}

/// A connected call as seen by both parties
#[derive(Debug, Clone)]
pub struct AcceptedMatch {
    pub session: CallSession,
    pub requester_token: MediaToken,
    pub worker_token: MediaToken,
}

/// Relay of requests across candidates
pub struct MatchingScheduler {
    store: Arc<dyn Store>,
    directory: Arc<AvailabilityDirectory>,
    meter: Arc<BillingMeter>,
    tokens: Arc<dyn TokenIssuer>,
    notifier: Arc<dyn NotificationChannel>,
    failover: Arc<dyn FailoverHook>,
    guards: Arc<KeyedGuards<SessionId>>,
    requester_guards: KeyedGuards<UserId>,
    worker_guards: KeyedGuards<UserId>,
    clock: Arc<dyn Clock>,
    config: MatchingConfig,
}

impl MatchingScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<AvailabilityDirectory>,
        meter: Arc<BillingMeter>,
        tokens: Arc<dyn TokenIssuer>,
        notifier: Arc<dyn NotificationChannel>,
        failover: Arc<dyn FailoverHook>,
        guards: Arc<KeyedGuards<SessionId>>,
        clock: Arc<dyn Clock>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            store,
            directory,
            meter,
            tokens,
            notifier,
            failover,
            guards,
            requester_guards: KeyedGuards::new(),
            worker_guards: KeyedGuards::new(),
            clock,
            config,
        }
    }

    fn rate_per_minute(&self) -> i64 {
        self.meter.config().rate_per_minute
    }

    /// Read a session
    pub async fn get_session(&self, session_id: SessionId) -> AppResult<CallSession> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))
    }

    /// Open a session for a requester and offer it to the first candidate
    ///
    /// # Arguments
    ///
    /// * `requester_id` - User asking for a counselor
    /// * `preferred_region` - Region whose counselors lead the candidate list
    ///
    /// # Errors
    ///
    /// - `AppError::AccountNotFound` if the requester has no account
    /// - `AppError::InsufficientFunds` if the balance cannot cover the minimum start
    /// - `AppError::SessionAlreadyOpen` if the requester already has an open session
    /// - `AppError::NoAvailableCounselor` if nobody can be offered the call; no
    ///   session is created
    #[instrument(skip(self))]
    pub async fn start_match(
        &self,
        requester_id: UserId,
        preferred_region: Option<String>,
    ) -> AppResult<CallSession> {
        let guard = self.requester_guards.acquire(&requester_id).await;
        let result = self.start_locked(requester_id, preferred_region).await;
        drop(guard);
        self.requester_guards.release_idle(&requester_id);
        result
    }

    /// Requesters whose start is still tracked by a guard slot
    pub fn requesters_in_flight(&self) -> usize {
        self.requester_guards.len()
    }

    async fn start_locked(
        &self,
        requester_id: UserId,
        preferred_region: Option<String>,
    ) -> AppResult<CallSession> {
        let account = self
            .store
            .get_account(requester_id)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(requester_id.to_string()))?;

        let rate = self.rate_per_minute();
        let required = rate * self.config.min_start_balance_minutes;
        if !account.can_cover(required) {
            warn!(
                requester_id,
                required,
                available = account.balance,
                "Balance too low to start a consultation"
            );
            return Err(AppError::InsufficientFunds {
                required,
                available: account.balance,
            });
        }

        if let Some(open) = self.store.find_open_session(requester_id).await? {
            return Err(AppError::SessionAlreadyOpen(open.id.to_string()));
        }

        let candidates = self
            .directory
            .list_available(preferred_region.as_deref(), &[requester_id])
            .await?;

        let now = self.clock.now();
        let mut session = CallSession::new(Uuid::now_v7(), requester_id, preferred_region, rate, now);
        session.begin_relay(candidates, now)?;
        self.store.upsert_session(&session).await?;

        info!(
            session_id = %session.id,
            requester_id,
            candidates = session.candidate_list.len(),
            "Match started"
        );
        self.publish_candidate(&session);
        Ok(session)
    }

    fn publish_candidate(&self, session: &CallSession) {
        if let (Some(candidate_id), Some(candidate_index), Some(cycle_count)) = (
            session.current_candidate(),
            session.candidate_index(),
            session.cycle_count(),
        ) {
            self.notifier.publish(Notification::CandidateChanged {
                session_id: session.id,
                requester_id: session.requester_id,
                candidate_id,
                candidate_index,
                cycle_count,
            });
        }
    }

    /// Advance every CONNECTING session whose offer has timed out
    #[instrument(skip(self))]
    pub async fn advance_due(&self) -> AppResult<RelayReport> {
        let sessions = self.store.list_sessions(SessionStatus::Connecting).await?;

        let outcomes: Vec<AppResult<AdvanceOutcome>> = stream::iter(sessions)
            .map(|session| async move { self.advance_match(session.id).await })
            .buffer_unordered(RELAY_CONCURRENCY)
            .collect()
            .await;

        let mut report = RelayReport::default();
        for outcome in outcomes {
            report.scanned += 1;
            match outcome {
                Ok(AdvanceOutcome::Step(RelayStep::Waiting)) | Ok(AdvanceOutcome::Inactive) => {
                    report.waiting += 1
                }
                Ok(AdvanceOutcome::Step(RelayStep::Advanced { .. })) => report.advanced += 1,
                Ok(AdvanceOutcome::Step(RelayStep::Exhausted)) => report.exhausted += 1,
                Ok(AdvanceOutcome::Contended) => report.contended += 1,
                Err(e) => {
                    error!(error = %e, "Relay step failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Move one session's offer on if its timeout has passed
    #[instrument(skip(self))]
    pub async fn advance_match(&self, session_id: SessionId) -> AppResult<AdvanceOutcome> {
        let Some(_guard) = self.guards.try_acquire(&session_id) else {
            debug!(%session_id, "Session busy, skipping relay step");
            return Ok(AdvanceOutcome::Contended);
        };

        let mut tx = self.store.begin().await?;
        let mut session = match load(tx.as_mut(), session_id).await {
            Ok(session) => session,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };

        if session.status() != SessionStatus::Connecting {
            rollback(tx).await;
            return Ok(AdvanceOutcome::Inactive);
        }

        let now = self.clock.now();
        let step = match session.advance_relay(
            now,
            self.config.relay_timeout(),
            self.config.max_relay_cycles,
        ) {
            Ok(RelayStep::Waiting) => {
                rollback(tx).await;
                return Ok(AdvanceOutcome::Step(RelayStep::Waiting));
            }
            Ok(step) => step,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };

        if let Err(e) = tx.save_session(&session).await {
            rollback(tx).await;
            return Err(e);
        }
        tx.commit().await?;

        match step {
            RelayStep::Advanced { candidate, wrapped } => {
                debug!(%session_id, candidate, wrapped, "Offer moved to next candidate");
                self.publish_candidate(&session);
            }
            RelayStep::Exhausted => {
                warn!(%session_id, requester_id = session.requester_id, "No counselor accepted");
                self.publish_ended(&session, CancelReason::NoCounselorAvailable.to_string());
                self.failover.on_relay_exhausted(&session).await;
                self.guards.release(&session_id);
            }
            RelayStep::Waiting => {}
        }
        Ok(AdvanceOutcome::Step(step))
    }

    /// Connect the current candidate
    ///
    /// # Errors
    ///
    /// `AppError::InvalidStateTransition` when the session is not CONNECTING,
    /// the worker is not the current candidate, the worker is already BUSY on
    /// another call, or another operation on the session is in flight.
    #[instrument(skip(self))]
    pub async fn accept_match(
        &self,
        session_id: SessionId,
        worker_id: UserId,
    ) -> AppResult<AcceptedMatch> {
        let Some(_guard) = self.guards.try_acquire(&session_id) else {
            return Err(AppError::InvalidStateTransition(format!(
                "session {} is busy, accept rejected",
                session_id
            )));
        };

        // one accept per worker at a time
        let worker_guard = self.worker_guards.acquire(&worker_id).await;
        let result = self.accept_locked(session_id, worker_id).await;
        drop(worker_guard);
        self.worker_guards.release_idle(&worker_id);
        result
    }

    async fn accept_locked(
        &self,
        session_id: SessionId,
        worker_id: UserId,
    ) -> AppResult<AcceptedMatch> {
        if let Some(record) = self.directory.get(worker_id).await? {
            if record.status == WorkerStatus::Busy {
                warn!(%session_id, worker_id, "Busy worker tried to accept another call");
                return Err(AppError::InvalidStateTransition(format!(
                    "worker {} is already on a call, accept of session {} rejected",
                    worker_id, session_id
                )));
            }
        }

        let mut tx = self.store.begin().await?;
        let step = self.accept_in(tx.as_mut(), session_id, worker_id).await;
        let accepted = match step {
            Ok(accepted) => accepted,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;

        if let Err(e) = self.directory.mark_busy(worker_id).await {
            warn!(worker_id, error = %e, "Failed to mark worker busy");
        }

        info!(%session_id, worker_id, requester_id = accepted.session.requester_id, "Match accepted");
        self.notifier.publish(Notification::MatchAccepted {
            session_id,
            requester_id: accepted.session.requester_id,
            worker_id,
            requester_token: accepted.requester_token.clone(),
            worker_token: accepted.worker_token.clone(),
        });
        Ok(accepted)
    }

    async fn accept_in(
        &self,
        tx: &mut dyn StoreTx,
        session_id: SessionId,
        worker_id: UserId,
    ) -> AppResult<AcceptedMatch> {
        let mut session = load(tx, session_id).await?;
        session.accept(worker_id, self.clock.now())?;

        let requester_token = self
            .tokens
            .issue_media_token(session_id, session.requester_id)
            .await?;
        let worker_token = self.tokens.issue_media_token(session_id, worker_id).await?;

        tx.save_session(&session).await?;
        Ok(AcceptedMatch {
            session,
            requester_token,
            worker_token,
        })
    }

    /// Cancel a session
    ///
    /// A CONNECTING session is cancelled outright. An ACTIVE one is settled and
    /// ended as cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_match(&self, session_id: SessionId) -> AppResult<CallSession> {
        let _guard = self.guards.acquire(&session_id).await;

        let mut tx = self.store.begin().await?;
        let mut session = match load(tx.as_mut(), session_id).await {
            Ok(session) => session,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };

        match session.status() {
            SessionStatus::Active => {
                rollback(tx).await;
                self.meter.close_locked(session_id, EndReason::Cancelled).await
            }
            SessionStatus::Initiated | SessionStatus::Connecting => {
                let cancelled = session.cancel(CancelReason::RequesterCancelled, self.clock.now());
                if let Err(e) = cancelled {
                    rollback(tx).await;
                    return Err(e);
                }
                if let Err(e) = tx.save_session(&session).await {
                    rollback(tx).await;
                    return Err(e);
                }
                tx.commit().await?;

                info!(%session_id, "Match cancelled by requester");
                self.publish_ended(&session, CancelReason::RequesterCancelled.to_string());
                self.guards.release(&session_id);
                Ok(session)
            }
            SessionStatus::Ended | SessionStatus::Cancelled => {
                rollback(tx).await;
                Err(AppError::InvalidStateTransition(format!(
                    "cannot cancel session {} in state {}",
                    session_id,
                    session.status()
                )))
            }
        }
    }

    /// Issue a fresh media token to a participant of an ACTIVE session
    #[instrument(skip(self))]
    pub async fn issue_media_token(
        &self,
        session_id: SessionId,
        participant_id: UserId,
    ) -> AppResult<MediaToken> {
        let session = self.get_session(session_id).await?;
        if session.status() != SessionStatus::Active {
            return Err(AppError::InvalidStateTransition(format!(
                "session {} is {}, media tokens need an active call",
                session_id,
                session.status()
            )));
        }
        if !session.is_participant(participant_id) {
            return Err(AppError::Forbidden);
        }

        self.tokens.issue_media_token(session_id, participant_id).await
    }

    fn publish_ended(&self, session: &CallSession, reason: String) {
        self.notifier.publish(Notification::SessionEnded {
            session_id: session.id,
            requester_id: session.requester_id,
            worker_id: session.worker_id(),
            status: session.status(),
            reason,
        });
    }
}

async fn load(tx: &mut dyn StoreTx, session_id: SessionId) -> AppResult<CallSession> {
    tx.lock_session(session_id)
        .await?
        .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))
}

async fn rollback(tx: Box<dyn StoreTx>) {
    if let Err(e) = tx.rollback().await {
        error!(error = %e, "Failed to roll back transaction");
    }
}

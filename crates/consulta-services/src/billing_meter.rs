//! Billing meter
//!
//! Meters connected time of ACTIVE sessions in whole minutes:
//! - A sweep bills every minute completed since the last checkpoint
//! - A payer who cannot cover the next charge is evicted after paying what is left
//! - Ending a call settles the final partial minute
//!
//! Each billing step is one store transaction that settles the charge and moves
//! `billed_seconds` forward, so a repeated or concurrent step finds nothing left
//! to bill.

use consulta_core::config::BillingConfig;
use consulta_core::models::{
    CallSession, ChargeKind, EndReason, Notification, SessionId, SessionState, SessionStatus,
};
use consulta_core::traits::{NotificationChannel, Store, StoreTx};
use consulta_core::{AppError, AppResult, Clock};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::availability::AvailabilityDirectory;
use crate::constants::SECONDS_PER_MINUTE;
use crate::session_guard::KeyedGuards;
use crate::settlement::{ChargePolicy, SettlementLedger, SettlementOutcome, SettlementRequest};

/// Result of billing one session once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No whole minute completed since the last checkpoint
    Idle,
    /// Session is no longer ACTIVE
    Inactive,
    /// Minutes charged; session continues
    Billed { minutes: i64, charged: i64 },
    /// Balance ran out; the remainder was charged and the session ended
    Evicted { charged: i64 },
    /// Another task holds the session; skipped this round
    Contended,
}

/// Totals of one sweep over the ACTIVE sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub billed: usize,
    pub evicted: usize,
    pub idle: usize,
    pub contended: usize,
    pub failed: usize,
    /// Sum charged across the sweep, in minor units
    pub charged: i64,
}

impl SweepReport {
    fn record(&mut self, outcome: &AppResult<TickOutcome>) {
        self.scanned += 1;
        match outcome {
            Ok(TickOutcome::Billed { charged, .. }) => {
                self.billed += 1;
                self.charged += charged;
            }
            Ok(TickOutcome::Evicted { charged }) => {
                self.evicted += 1;
                self.charged += charged;
            }
            Ok(TickOutcome::Idle) | Ok(TickOutcome::Inactive) => self.idle += 1,
            Ok(TickOutcome::Contended) => self.contended += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Whole minutes due at a checkpoint
fn whole_minutes(seconds: i64) -> i64 {
    seconds.div_euclid(SECONDS_PER_MINUTE)
}

/// Minutes still to charge at the end of a call, and the final checkpoint
///
/// Calls shorter than the grace period are free. Otherwise the last partial
/// minute rounds up unless configured not to. The checkpoint never exceeds the
/// elapsed time.
fn final_charge(config: &BillingConfig, elapsed: i64, billed_seconds: i64) -> (i64, i64) {
    if elapsed < config.grace_period_secs {
        return (0, billed_seconds);
    }

    let total_minutes = if config.round_up_final_minute {
        (elapsed + SECONDS_PER_MINUTE - 1).div_euclid(SECONDS_PER_MINUTE)
    } else {
        whole_minutes(elapsed)
    };
    let minutes = (total_minutes - whole_minutes(billed_seconds)).max(0);
    let checkpoint = (total_minutes * SECONDS_PER_MINUTE)
        .min(elapsed)
        .max(billed_seconds);
    (minutes, checkpoint)
}

/// Meter for ACTIVE sessions
pub struct BillingMeter {
    store: Arc<dyn Store>,
    settlement: Arc<SettlementLedger>,
    directory: Arc<AvailabilityDirectory>,
    notifier: Arc<dyn NotificationChannel>,
    guards: Arc<KeyedGuards<SessionId>>,
    clock: Arc<dyn Clock>,
    config: BillingConfig,
}

impl BillingMeter {
    /// Create a new billing meter
    ///
    /// `guards` must be the same set the matching scheduler uses, so a session
    /// is never billed and cancelled at once.
    pub fn new(
        store: Arc<dyn Store>,
        settlement: Arc<SettlementLedger>,
        directory: Arc<AvailabilityDirectory>,
        notifier: Arc<dyn NotificationChannel>,
        guards: Arc<KeyedGuards<SessionId>>,
        clock: Arc<dyn Clock>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            settlement,
            directory,
            notifier,
            guards,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// Bill every ACTIVE session once
    ///
    /// Sessions run concurrently up to `sweep_concurrency`. Failures of single
    /// sessions are logged and counted; they do not stop the sweep.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> AppResult<SweepReport> {
        let sessions = self.store.list_sessions(SessionStatus::Active).await?;
        if sessions.is_empty() {
            return Ok(SweepReport::default());
        }

        let outcomes: Vec<(SessionId, AppResult<TickOutcome>)> = stream::iter(sessions)
            .map(|session| async move { (session.id, self.bill_session(session.id).await) })
            .buffer_unordered(self.config.sweep_concurrency.max(1))
            .collect()
            .await;

        let mut report = SweepReport::default();
        for (session_id, outcome) in &outcomes {
            if let Err(e) = outcome {
                error!(%session_id, error = %e, "Billing step failed");
            }
            report.record(outcome);
        }

        if report.billed + report.evicted + report.failed > 0 {
            info!(
                scanned = report.scanned,
                billed = report.billed,
                evicted = report.evicted,
                contended = report.contended,
                failed = report.failed,
                charged = report.charged,
                "Billing sweep finished"
            );
        }
        Ok(report)
    }

    /// Bill one session for the minutes completed since its checkpoint
    ///
    /// A busy session or a store serialization conflict yields
    /// [`TickOutcome::Contended`]; the next sweep picks it up again.
    #[instrument(skip(self))]
    pub async fn bill_session(&self, session_id: SessionId) -> AppResult<TickOutcome> {
        let Some(_guard) = self.guards.try_acquire(&session_id) else {
            debug!(%session_id, "Session busy, skipping billing step");
            return Ok(TickOutcome::Contended);
        };

        match self.bill_locked(session_id).await {
            Err(AppError::ConcurrencyConflict(reason)) => {
                debug!(%session_id, %reason, "Billing step lost a serialization race");
                Ok(TickOutcome::Contended)
            }
            other => other,
        }
    }

    async fn bill_locked(&self, session_id: SessionId) -> AppResult<TickOutcome> {
        let mut tx = self.store.begin().await?;

        let mut session = match tx.lock_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                rollback(tx).await;
                return Err(AppError::SessionNotFound(session_id.to_string()));
            }
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };

        if session.status() != SessionStatus::Active {
            rollback(tx).await;
            return Ok(TickOutcome::Inactive);
        }

        let now = self.clock.now();
        let elapsed = session.elapsed_seconds(now);
        let minutes = whole_minutes(elapsed) - whole_minutes(session.billed_seconds());
        if minutes <= 0 {
            rollback(tx).await;
            return Ok(TickOutcome::Idle);
        }

        let checkpoint = whole_minutes(elapsed) * SECONDS_PER_MINUTE;
        let step = self
            .charge_minutes(tx.as_mut(), &mut session, minutes, checkpoint, now)
            .await;

        let outcome = match step {
            Ok(outcome) => outcome,
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;

        if outcome.shortfall > 0 {
            warn!(
                %session_id,
                requester_id = session.requester_id,
                charged = outcome.charged,
                shortfall = outcome.shortfall,
                "Balance exhausted, session evicted"
            );
            self.after_end(&session).await;
            return Ok(TickOutcome::Evicted {
                charged: outcome.charged,
            });
        }

        debug!(%session_id, minutes, charged = outcome.charged, "Minutes billed");
        Ok(TickOutcome::Billed {
            minutes,
            charged: outcome.charged,
        })
    }

    /// Settle `minutes` and move the checkpoint; evicts when the balance falls short
    async fn charge_minutes(
        &self,
        tx: &mut dyn StoreTx,
        session: &mut CallSession,
        minutes: i64,
        checkpoint: i64,
        now: DateTime<Utc>,
    ) -> AppResult<SettlementOutcome> {
        let outcome = self
            .settle_minutes(tx, session, minutes)
            .await?;

        if outcome.shortfall > 0 {
            session.end(EndReason::InsufficientFunds, checkpoint, now)?;
        } else {
            session.record_billing(checkpoint, now)?;
        }
        tx.save_session(session).await?;
        Ok(outcome)
    }

    async fn settle_minutes(
        &self,
        tx: &mut dyn StoreTx,
        session: &CallSession,
        minutes: i64,
    ) -> AppResult<SettlementOutcome> {
        let worker_id = session.worker_id().ok_or_else(|| {
            AppError::Internal(format!("active session {} has no worker", session.id))
        })?;

        let request = SettlementRequest {
            transaction_id: session.id,
            session_id: session.id,
            kind: ChargeKind::Consultation,
            payer_id: session.requester_id,
            payee_id: worker_id,
            amount: minutes * session.rate_per_minute,
            policy: ChargePolicy::UpToBalance,
        };
        self.settlement.settle_in(tx, &request).await
    }

    /// End a call and settle its final partial minute
    ///
    /// # Errors
    ///
    /// - `AppError::SessionNotFound` / `AppError::InvalidStateTransition` when
    ///   the session is missing or not ACTIVE
    /// - the settlement or store error when the final charge could not be
    ///   committed; the session is still marked ENDED(`SettlementFailed`)
    #[instrument(skip(self))]
    pub async fn end_call(&self, session_id: SessionId) -> AppResult<CallSession> {
        let _guard = self.guards.acquire(&session_id).await;
        self.close_locked(session_id, EndReason::Completed).await
    }

    /// Final settlement and ACTIVE → ENDED; the caller holds the session guard
    pub(crate) async fn close_locked(
        &self,
        session_id: SessionId,
        reason: EndReason,
    ) -> AppResult<CallSession> {
        let mut tx = self.store.begin().await?;

        let mut session = match tx.lock_session(session_id).await {
            Ok(Some(session)) if session.status() == SessionStatus::Active => session,
            Ok(Some(session)) => {
                rollback(tx).await;
                return Err(AppError::InvalidStateTransition(format!(
                    "cannot end session {} in state {}",
                    session_id,
                    session.status()
                )));
            }
            Ok(None) => {
                rollback(tx).await;
                return Err(AppError::SessionNotFound(session_id.to_string()));
            }
            Err(e) => {
                rollback(tx).await;
                return Err(e);
            }
        };

        let now = self.clock.now();
        let elapsed = session.elapsed_seconds(now);
        let (minutes, checkpoint) = final_charge(&self.config, elapsed, session.billed_seconds());

        let step = self
            .finish_in(tx.as_mut(), &mut session, reason, minutes, checkpoint, now)
            .await;
        let committed = match step {
            Ok(charged) => tx.commit().await.map(|_| charged),
            Err(e) => {
                rollback(tx).await;
                Err(e)
            }
        };

        match committed {
            Ok(charged) => {
                info!(
                    %session_id,
                    reason = %reason,
                    elapsed_secs = elapsed,
                    final_minutes = minutes,
                    charged,
                    "Session ended"
                );
                self.after_end(&session).await;
                Ok(session)
            }
            Err(e) => {
                error!(%session_id, error = %e, "Final settlement failed, rolled back");
                if let Some(failed) = self.mark_settlement_failed(session_id, now).await {
                    self.after_end(&failed).await;
                }
                Err(e)
            }
        }
    }

    async fn finish_in(
        &self,
        tx: &mut dyn StoreTx,
        session: &mut CallSession,
        reason: EndReason,
        minutes: i64,
        checkpoint: i64,
        now: DateTime<Utc>,
    ) -> AppResult<i64> {
        let charged = if minutes > 0 {
            let outcome = self.settle_minutes(tx, session, minutes).await?;
            if outcome.shortfall > 0 {
                warn!(
                    session_id = %session.id,
                    shortfall = outcome.shortfall,
                    "Final charge capped at remaining balance"
                );
            }
            outcome.charged
        } else {
            0
        };

        session.end(reason, checkpoint, now)?;
        tx.save_session(session).await?;
        Ok(charged)
    }

    /// Close a session whose final settlement was rolled back
    async fn mark_settlement_failed(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Option<CallSession> {
        match self.end_without_charge(session_id, now).await {
            Ok(session) => session,
            Err(e) => {
                error!(%session_id, error = %e, "Could not mark session as settlement failed");
                None
            }
        }
    }

    async fn end_without_charge(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> AppResult<Option<CallSession>> {
        let mut tx = self.store.begin().await?;
        let mut session = match tx.lock_session(session_id).await? {
            Some(session) if session.status() == SessionStatus::Active => session,
            Some(_) | None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        let billed = session.billed_seconds();
        session.end(EndReason::SettlementFailed, billed, now)?;
        tx.save_session(&session).await?;
        tx.commit().await?;
        Ok(Some(session))
    }

    /// Side effects once a session reached ENDED
    pub(crate) async fn after_end(&self, session: &CallSession) {
        if let Some(worker_id) = session.worker_id() {
            if let Err(e) = self.directory.release_worker(worker_id).await {
                warn!(worker_id, error = %e, "Failed to release worker");
            }
        }

        let reason = match &session.state {
            SessionState::Ended { reason, .. } => reason.to_string(),
            other => other.status().to_string(),
        };
        self.notifier.publish(Notification::SessionEnded {
            session_id: session.id,
            requester_id: session.requester_id,
            worker_id: session.worker_id(),
            status: session.status(),
            reason,
        });
        self.guards.release(&session.id);
    }
}

async fn rollback(tx: Box<dyn StoreTx>) {
    if let Err(e) = tx.rollback().await {
        error!(error = %e, "Failed to roll back transaction");
    }
}

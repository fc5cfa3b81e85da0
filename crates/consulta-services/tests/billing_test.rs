//! Metering and final settlement of connected calls

mod common;

use common::{Harness, RATE};
use consulta_core::config::BillingConfig;
use consulta_core::models::{
    EndReason, Notification, SessionState, SessionStatus, ShareKind, Tier, WorkerStatus,
};
use consulta_core::traits::Store;
use consulta_core::AppError;
use consulta_services::TickOutcome;

const REQUESTER: i64 = 1;
const WORKER: i64 = 2;

#[tokio::test]
async fn test_three_minute_call_splits_revenue() {
    let h = Harness::new();
    h.account(REQUESTER, 100_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    for _ in 0..3 {
        h.advance(60);
        let report = h.meter.tick().await.unwrap();
        assert_eq!(report.billed, 1);
        assert_eq!(report.charged, RATE);
    }

    let session = h.meter.end_call(session_id).await.unwrap();
    assert_eq!(session.billed_seconds(), 180);
    assert!(matches!(
        session.state,
        SessionState::Ended {
            reason: EndReason::Completed,
            ..
        }
    ));

    assert_eq!(h.balance(REQUESTER).await, 58_000);
    assert_eq!(h.balance(WORKER).await, 25_200);

    let entries = h.ledger(session_id).await;
    let platform: i64 = entries
        .iter()
        .filter(|e| e.share_kind == ShareKind::Platform)
        .map(|e| e.amount)
        .sum();
    assert_eq!(platform, 16_800);
    assert_eq!(entries.iter().map(|e| e.amount).sum::<i64>(), 42_000);

    let worker = h.directory.get(WORKER).await.unwrap().unwrap();
    assert_eq!(worker.status, WorkerStatus::Idle);
}

#[tokio::test]
async fn test_eviction_charges_remaining_balance() {
    let mut h = Harness::new();
    h.account(REQUESTER, 10_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;
    h.drain();

    h.advance(60);
    let outcome = h.meter.bill_session(session_id).await.unwrap();
    assert_eq!(outcome, TickOutcome::Evicted { charged: 10_000 });

    assert_eq!(h.balance(REQUESTER).await, 0);
    assert_eq!(h.balance(WORKER).await, 6_000);
    let session = h.session(session_id).await;
    assert!(matches!(
        session.state,
        SessionState::Ended {
            reason: EndReason::InsufficientFunds,
            billed_seconds: 60,
            ..
        }
    ));
    let distributed: i64 = h.ledger(session_id).await.iter().map(|e| e.amount).sum();
    assert_eq!(distributed, 10_000);

    let ended = h
        .drain()
        .into_iter()
        .any(|n| matches!(n, Notification::SessionEnded { status: SessionStatus::Ended, .. }));
    assert!(ended);

    // nothing left to bill
    h.advance(60);
    assert_eq!(h.meter.tick().await.unwrap().scanned, 0);
}

#[tokio::test]
async fn test_grace_period_is_free() {
    let h = Harness::new();
    h.account(REQUESTER, 100_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    h.advance(14);
    let session = h.meter.end_call(session_id).await.unwrap();
    assert_eq!(session.billed_seconds(), 0);
    assert_eq!(h.balance(REQUESTER).await, 100_000);
    assert!(h.ledger(session_id).await.is_empty());
}

#[tokio::test]
async fn test_call_past_grace_rounds_up_to_one_minute() {
    let h = Harness::new();
    h.account(REQUESTER, 100_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    h.advance(16);
    let session = h.meter.end_call(session_id).await.unwrap();
    // checkpoint never passes the elapsed time
    assert_eq!(session.billed_seconds(), 16);
    assert_eq!(h.balance(REQUESTER).await, 100_000 - RATE);
}

#[tokio::test]
async fn test_final_minute_truncated_when_rounding_disabled() {
    let h = Harness::with_billing(BillingConfig {
        round_up_final_minute: false,
        ..BillingConfig::default()
    });
    h.account(REQUESTER, 100_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    h.advance(100);
    h.meter.end_call(session_id).await.unwrap();
    assert_eq!(h.balance(REQUESTER).await, 100_000 - RATE);
}

#[tokio::test]
async fn test_repeated_and_concurrent_ticks_bill_once() {
    let h = Harness::new();
    h.account(REQUESTER, 100_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    h.advance(65);
    let (a, b) = tokio::join!(h.meter.tick(), h.meter.tick());
    let charged = a.unwrap().charged + b.unwrap().charged;
    assert_eq!(charged, RATE);

    assert_eq!(
        h.meter.bill_session(session_id).await.unwrap(),
        TickOutcome::Idle
    );
    assert_eq!(h.balance(REQUESTER).await, 100_000 - RATE);
    assert_eq!(h.session(session_id).await.billed_seconds(), 60);
}

#[tokio::test]
async fn test_cancel_while_active_settles_and_ends() {
    let h = Harness::new();
    h.account(REQUESTER, 100_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    h.advance(61);
    let session = h.scheduler.cancel_match(session_id).await.unwrap();
    assert!(matches!(
        session.state,
        SessionState::Ended {
            reason: EndReason::Cancelled,
            ..
        }
    ));
    assert_eq!(h.balance(REQUESTER).await, 100_000 - 2 * RATE);

    assert!(matches!(
        h.meter.end_call(session_id).await,
        Err(AppError::InvalidStateTransition(_))
    ));
}

#[tokio::test]
async fn test_failed_final_settlement_rolls_back_and_ends() {
    let h = Harness::new();
    h.account(REQUESTER, 100_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    h.advance(90);
    h.store.fail_next_commits(1);
    let result = h.meter.end_call(session_id).await;
    assert!(matches!(result, Err(AppError::StoreUnavailable(_))));

    assert_eq!(h.balance(REQUESTER).await, 100_000);
    assert_eq!(h.balance(WORKER).await, 0);
    assert!(h.ledger(session_id).await.is_empty());

    let session = h.session(session_id).await;
    assert!(matches!(
        session.state,
        SessionState::Ended {
            reason: EndReason::SettlementFailed,
            billed_seconds: 0,
            ..
        }
    ));
}

#[tokio::test]
async fn test_spend_promotes_tier() {
    let h = Harness::new();
    h.account(REQUESTER, 1_000_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    h.advance(8 * 60);
    let outcome = h.meter.bill_session(session_id).await.unwrap();
    assert_eq!(
        outcome,
        TickOutcome::Billed {
            minutes: 8,
            charged: 112_000
        }
    );

    let account = h.store.get_account(REQUESTER).await.unwrap().unwrap();
    assert_eq!(account.cumulative_spend, 112_000);
    assert_eq!(account.tier, Tier::Gold);
}

#[tokio::test]
async fn test_conservation_across_call() {
    let h = Harness::new();
    h.account(REQUESTER, 50_000, Some(7)).await;
    h.account(7, 0, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;
    let before = h.store.total_balance().await;

    h.advance(150);
    h.meter.tick().await.unwrap();
    h.advance(20);
    h.meter.end_call(session_id).await.unwrap();

    let platform: i64 = h
        .ledger(session_id)
        .await
        .iter()
        .filter(|e| e.share_kind == ShareKind::Platform)
        .map(|e| e.amount)
        .sum();
    assert_eq!(h.store.total_balance().await + platform, before);
    assert_eq!(h.balance(7).await, 3 * RATE / 20);
}

#[tokio::test]
async fn test_held_session_is_skipped_by_billing() {
    let h = Harness::new();
    h.account(REQUESTER, 100_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    h.advance(65);
    let held = h.guards.try_acquire(&session_id).unwrap();

    assert_eq!(
        h.meter.bill_session(session_id).await.unwrap(),
        TickOutcome::Contended
    );
    let report = h.meter.tick().await.unwrap();
    assert_eq!(report.contended, 1);
    assert_eq!(report.charged, 0);
    assert_eq!(h.balance(REQUESTER).await, 100_000);
    assert_eq!(h.session(session_id).await.billed_seconds(), 0);

    drop(held);
    assert!(matches!(
        h.meter.bill_session(session_id).await.unwrap(),
        TickOutcome::Billed { .. }
    ));
    assert_eq!(h.balance(REQUESTER).await, 100_000 - RATE);
}

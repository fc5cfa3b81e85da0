//! Gifts during a live call

mod common;

use common::Harness;
use consulta_core::models::{ChargeKind, Notification, ShareKind};
use consulta_core::AppError;

const REQUESTER: i64 = 1;
const WORKER: i64 = 2;

#[tokio::test]
async fn test_gift_split_with_both_referrers() {
    let mut h = Harness::new();
    h.account(7, 0, None).await;
    h.account(8, 0, None).await;
    h.account(REQUESTER, 100_000, Some(7)).await;
    // referral link of the worker is set before they go available
    h.account(WORKER, 0, Some(8)).await;
    h.directory
        .set_status(WORKER, consulta_core::models::WorkerStatus::Idle, "lima")
        .await
        .unwrap();
    let session = h.scheduler.start_match(REQUESTER, None).await.unwrap();
    h.scheduler.accept_match(session.id, WORKER).await.unwrap();
    h.drain();

    let receipt = h.gifts.send_gift(REQUESTER, session.id, 1_000).await.unwrap();
    assert_eq!(receipt.worker_id, WORKER);
    assert_eq!(receipt.outcome.charged, 1_000);

    assert_eq!(h.balance(REQUESTER).await, 99_000);
    assert_eq!(h.balance(WORKER).await, 600);
    assert_eq!(h.balance(7).await, 50);
    assert_eq!(h.balance(8).await, 50);

    let entries = h.ledger(receipt.gift_id).await;
    assert_eq!(entries.len(), 4);
    assert!(entries.iter().all(|e| e.charge_kind == ChargeKind::Gift));
    assert!(entries.iter().all(|e| e.session_id == session.id));
    let platform = entries
        .iter()
        .find(|e| e.share_kind == ShareKind::Platform)
        .unwrap();
    assert_eq!(platform.amount, 300);
    assert_eq!(platform.beneficiary_id, None);

    assert!(h.drain().iter().any(|n| matches!(
        n,
        Notification::GiftReceived {
            amount: 1_000,
            worker_id: WORKER,
            ..
        }
    )));
}

#[tokio::test]
async fn test_gift_needs_full_balance() {
    let h = Harness::new();
    h.account(REQUESTER, 20_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    let result = h.gifts.send_gift(REQUESTER, session_id, 20_001).await;
    assert!(matches!(
        result,
        Err(AppError::InsufficientFunds {
            required: 20_001,
            available: 20_000
        })
    ));
    assert_eq!(h.balance(REQUESTER).await, 20_000);
    assert_eq!(h.balance(WORKER).await, 0);
}

#[tokio::test]
async fn test_gift_rules() {
    let h = Harness::new();
    h.account(REQUESTER, 100_000, None).await;
    let session_id = h.connect(REQUESTER, WORKER).await;

    assert!(matches!(
        h.gifts.send_gift(REQUESTER, session_id, 0).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.gifts.send_gift(WORKER, session_id, 500).await,
        Err(AppError::Forbidden)
    ));

    h.meter.end_call(session_id).await.unwrap();
    assert!(matches!(
        h.gifts.send_gift(REQUESTER, session_id, 500).await,
        Err(AppError::InvalidStateTransition(_))
    ));
}

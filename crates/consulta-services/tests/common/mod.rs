//! Shared wiring for service integration tests
#![allow(dead_code)]

use consulta_auth::JwtMediaTokenIssuer;
use consulta_cache::MemoryAvailabilityCache;
use consulta_core::config::{
    AvailabilityConfig, BillingConfig, MatchingConfig, NetworkConfig, SettlementConfig,
};
use consulta_core::models::{
    Account, CallSession, LedgerEntry, Notification, SessionId, UserId, WorkerStatus,
};
use consulta_core::traits::Store;
use consulta_core::{Clock, ManualClock};
use consulta_db::MemoryStore;
use consulta_services::{
    AvailabilityDirectory, BillingMeter, BroadcastNotifier, GiftService, KeyedGuards,
    LoggingFailover, MatchingScheduler, NetworkQualityGate, PresenceService, SettlementLedger,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const RATE: i64 = 14_000;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: MemoryStore,
    pub notifier: Arc<BroadcastNotifier>,
    pub events: broadcast::Receiver<Notification>,
    pub tokens: Arc<JwtMediaTokenIssuer>,
    pub directory: Arc<AvailabilityDirectory>,
    pub settlement: Arc<SettlementLedger>,
    pub guards: Arc<KeyedGuards<SessionId>>,
    pub meter: Arc<BillingMeter>,
    pub scheduler: Arc<MatchingScheduler>,
    pub gifts: GiftService,
    pub presence: PresenceService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_billing(BillingConfig::default())
    }

    pub fn with_billing(billing: BillingConfig) -> Self {
        let clock = Arc::new(ManualClock::deterministic());
        let store = MemoryStore::new();
        let cache = Arc::new(MemoryAvailabilityCache::new(clock.clone()));
        let notifier = Arc::new(BroadcastNotifier::new());
        let events = notifier.subscribe();
        let tokens = Arc::new(JwtMediaTokenIssuer::new(
            "test-media-secret",
            300,
            clock.clone(),
        ));
        let guards = Arc::new(KeyedGuards::new());

        let directory = Arc::new(AvailabilityDirectory::with_seed(
            cache.clone(),
            clock.clone(),
            AvailabilityConfig::default(),
            11,
        ));
        let gate = Arc::new(NetworkQualityGate::new(
            cache,
            notifier.clone(),
            clock.clone(),
            NetworkConfig::default(),
        ));
        let settlement = Arc::new(SettlementLedger::new(
            Arc::new(store.clone()),
            clock.clone(),
            SettlementConfig::default(),
        ));
        let meter = Arc::new(BillingMeter::new(
            Arc::new(store.clone()),
            settlement.clone(),
            directory.clone(),
            notifier.clone(),
            guards.clone(),
            clock.clone(),
            billing,
        ));
        let scheduler = Arc::new(MatchingScheduler::new(
            Arc::new(store.clone()),
            directory.clone(),
            meter.clone(),
            tokens.clone(),
            notifier.clone(),
            Arc::new(LoggingFailover),
            guards.clone(),
            clock.clone(),
            MatchingConfig::default(),
        ));
        let gifts = GiftService::new(
            Arc::new(store.clone()),
            settlement.clone(),
            notifier.clone(),
        );
        let presence = PresenceService::new(directory.clone(), gate);

        Self {
            clock,
            store,
            notifier,
            events,
            tokens,
            directory,
            settlement,
            guards,
            meter,
            scheduler,
            gifts,
            presence,
        }
    }

    pub async fn account(&self, user_id: UserId, balance: i64, referrer: Option<UserId>) {
        self.store
            .upsert_account(&Account::new(user_id, balance, referrer, self.clock.now()))
            .await
            .unwrap();
    }

    pub async fn counselor(&self, worker_id: UserId, region: &str) {
        self.account(worker_id, 0, None).await;
        self.directory
            .set_status(worker_id, WorkerStatus::Idle, region)
            .await
            .unwrap();
    }

    pub async fn balance(&self, user_id: UserId) -> i64 {
        self.store
            .get_account(user_id)
            .await
            .unwrap()
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    pub async fn session(&self, session_id: SessionId) -> CallSession {
        self.store.get_session(session_id).await.unwrap().unwrap()
    }

    pub async fn ledger(&self, transaction_id: Uuid) -> Vec<LedgerEntry> {
        self.store.ledger_entries(transaction_id).await.unwrap()
    }

    /// Requester `requester_id` connected to a single idle counselor `worker_id`
    pub async fn connect(&self, requester_id: UserId, worker_id: UserId) -> SessionId {
        self.counselor(worker_id, "default").await;
        let session = self
            .scheduler
            .start_match(requester_id, None)
            .await
            .unwrap();
        assert_eq!(session.current_candidate(), Some(worker_id));
        self.scheduler
            .accept_match(session.id, worker_id)
            .await
            .unwrap();
        session.id
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance_secs(secs);
    }

    /// Everything published since the last drain
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

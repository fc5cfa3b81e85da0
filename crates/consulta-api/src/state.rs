//! Shared application state
//!
//! Wires the services once per process; every HTTP worker holds a clone.

use consulta_auth::{JwtMediaTokenIssuer, JwtService};
use consulta_core::config::AppConfig;
use consulta_core::traits::{AvailabilityCache, NotificationChannel, Store};
use consulta_core::Clock;
use consulta_services::{
    AvailabilityDirectory, BillingMeter, GiftService, KeyedGuards, LoggingFailover,
    MatchingScheduler, NetworkQualityGate, PresenceService, SettlementLedger,
};
use std::sync::Arc;

/// Services reachable from handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub scheduler: Arc<MatchingScheduler>,
    pub meter: Arc<BillingMeter>,
    pub gifts: Arc<GiftService>,
    pub presence: Arc<PresenceService>,
    pub jwt: Arc<JwtService>,
}

impl AppState {
    /// Build every service from configuration and the chosen backends
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn Store>,
        cache: Arc<dyn AvailabilityCache>,
        notifier: Arc<dyn NotificationChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let auth = &config.auth;
        let jwt = Arc::new(JwtService::new(
            &auth.jwt_secret,
            auth.jwt_expiration_minutes * 60,
        ));
        let tokens = Arc::new(JwtMediaTokenIssuer::new(
            auth.media_token_secret
                .as_deref()
                .unwrap_or(&auth.jwt_secret),
            auth.media_token_ttl_secs,
            clock.clone(),
        ));

        let directory = Arc::new(AvailabilityDirectory::new(
            cache.clone(),
            clock.clone(),
            config.availability.clone(),
        ));
        let gate = Arc::new(NetworkQualityGate::new(
            cache,
            notifier.clone(),
            clock.clone(),
            config.network.clone(),
        ));
        let settlement = Arc::new(SettlementLedger::new(
            store.clone(),
            clock.clone(),
            config.settlement.clone(),
        ));

        // billing and relay share one guard per session
        let guards = Arc::new(KeyedGuards::new());
        let meter = Arc::new(BillingMeter::new(
            store.clone(),
            settlement.clone(),
            directory.clone(),
            notifier.clone(),
            guards.clone(),
            clock.clone(),
            config.billing.clone(),
        ));
        let scheduler = Arc::new(MatchingScheduler::new(
            store.clone(),
            directory.clone(),
            meter.clone(),
            tokens,
            notifier.clone(),
            Arc::new(LoggingFailover),
            guards,
            clock,
            config.matching.clone(),
        ));
        let gifts = Arc::new(GiftService::new(store.clone(), settlement, notifier));
        let presence = Arc::new(PresenceService::new(directory, gate));

        Self {
            store,
            scheduler,
            meter,
            gifts,
            presence,
            jwt,
        }
    }
}

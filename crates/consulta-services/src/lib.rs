//! Business logic services for Consulta
//!
//! This crate holds the services that turn a waiting requester into a metered,
//! settled call:
//!
//! - `AvailabilityDirectory` - Worker presence and candidate selection
//! - `NetworkQualityGate` - Link classification and transport profiles
//! - `SettlementLedger` - Atomic multi-party revenue split
//! - `BillingMeter` - Per-minute metering of active sessions
//! - `MatchingScheduler` - Relay of a request across candidates
//! - `GiftService` - Ad-hoc gifts during a call
//! - `PresenceService` - Availability changes gated on link quality
//!
//! Services own their dependencies behind `Arc` and share them across tasks.
//! Every time read goes through the injected [`Clock`](consulta_core::Clock),
//! and the relay and billing loops are driven by explicit ticks (see [`drivers`]).

pub mod availability;
pub mod billing_meter;
pub mod drivers;
pub mod failover;
pub mod gifts;
pub mod matching;
pub mod network_quality;
pub mod notifier;
pub mod presence;
pub mod session_guard;
pub mod settlement;

pub use availability::AvailabilityDirectory;
pub use billing_meter::{BillingMeter, SweepReport, TickOutcome};
pub use drivers::Drivers;
pub use failover::LoggingFailover;
pub use gifts::{GiftReceipt, GiftService};
pub use matching::{AcceptedMatch, AdvanceOutcome, MatchingScheduler, RelayReport};
pub use network_quality::NetworkQualityGate;
pub use notifier::{BroadcastNotifier, TracingNotifier};
pub use presence::{NetworkReport, PresenceService};
pub use session_guard::KeyedGuards;
pub use settlement::{
    ChargePolicy, SettlementLedger, SettlementOutcome, SettlementRequest, SplitPlan,
};

/// Business logic constants
pub mod constants {
    /// Seconds in one billable minute
    pub const SECONDS_PER_MINUTE: i64 = 60;

    /// Availability records outlive the heartbeat TTL by this factor so a stale
    /// worker still reads as OFFLINE rather than vanishing
    pub const RECORD_RETENTION_FACTOR: u32 = 4;

    /// Sessions advanced concurrently by one relay pass
    pub const RELAY_CONCURRENCY: usize = 16;

    /// Capacity of the broadcast notification channel
    pub const NOTIFICATION_BUFFER: usize = 1024;

    /// Audio bitrate used in lite mode, in kbps
    pub const LITE_AUDIO_BITRATE_KBPS: u32 = 24;

    /// Sample rate used in lite mode, in Hz
    pub const LITE_SAMPLE_RATE_HZ: u32 = 16_000;
}

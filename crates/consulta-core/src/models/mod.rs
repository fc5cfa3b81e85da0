//! Domain models for Consulta
//!
//! This module contains all the core domain models used throughout the application.

pub mod account;
pub mod availability;
pub mod ledger;
pub mod network;
pub mod notification;
pub mod session;
pub mod user;

/// User identifier shared by requesters, counselors and referrers
pub type UserId = i64;

/// Call session identifier
pub type SessionId = uuid::Uuid;

pub use account::{Account, Tier};
pub use availability::{WorkerAvailability, WorkerStatus};
pub use ledger::{ChargeKind, LedgerEntry, ShareKind};
pub use network::{MediaToken, NetworkMetrics, NetworkQuality, QualityAssessment, TransportProfile};
pub use notification::Notification;
pub use session::{CallSession, CancelReason, EndReason, RelayStep, SessionState, SessionStatus};
pub use user::{Principal, UserRole};

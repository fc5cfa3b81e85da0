//! Consulta Core Library
//!
//! Foundational types shared by every Consulta crate:
//!
//! - Domain models (accounts, call sessions, ledger entries, worker availability)
//! - Boundary traits for persistence, caching, notifications and media tokens
//! - Unified error handling with HTTP response mapping
//! - Application configuration and the injectable clock

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

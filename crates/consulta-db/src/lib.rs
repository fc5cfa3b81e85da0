//! Consulta Database Layer
//!
//! Implementations of the [`Store`](consulta_core::traits::Store) boundary:
//!
//! - [`MemoryStore`] for tests and single-node development
//! - [`PgStore`] on PostgreSQL via sqlx, with row locks and embedded migrations
//! - Connection pool management

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::MemoryStore;
pub use pool::create_pool;
pub use repositories::PgStore;

// Re-export commonly used types
pub use consulta_core::{AppError, AppResult};
pub use sqlx::{PgPool, Postgres, Transaction};

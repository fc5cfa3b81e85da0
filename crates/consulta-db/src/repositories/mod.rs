//! PostgreSQL store implementation
//!
//! Row mappings and the sqlx-backed [`PgStore`].

pub mod pg_store;
mod rows;

pub use pg_store::PgStore;

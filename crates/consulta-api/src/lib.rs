//! API layer for Consulta
//!
//! HTTP handlers for matching, live sessions, gifts, worker presence and
//! settlement inspection, all under `/api/v1`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod dto;
pub mod handlers;
pub mod state;

pub use dto::ApiResponse;
pub use handlers::configure_routes;
pub use state::AppState;

//! HTTP request handlers

pub mod account;
pub mod availability;
pub mod billing;
pub mod health;
pub mod matching;
pub mod network;
pub mod session;

pub use account::configure as configure_accounts;
pub use availability::configure as configure_availability;
pub use billing::configure as configure_billing;
pub use matching::configure as configure_matches;
pub use network::configure as configure_network;
pub use session::configure as configure_sessions;

use actix_web::web;
use consulta_auth::AuthenticatedUser;
use consulta_core::models::CallSession;
use consulta_core::AppError;
use tracing::warn;

/// Configure API routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .configure(configure_matches)
            .configure(configure_sessions)
            .configure(configure_availability)
            .configure(configure_network)
            .configure(configure_accounts)
            .configure(configure_billing),
    );
}

/// Only the requester or the counselor who accepted may act on a session
pub(crate) fn ensure_participant(
    session: &CallSession,
    user: &AuthenticatedUser,
) -> Result<(), AppError> {
    if session.is_participant(user.user_id()) {
        return Ok(());
    }
    warn!(
        session_id = %session.id,
        user_id = user.user_id(),
        "Non-participant attempted session action"
    );
    Err(AppError::Forbidden)
}

//! Match handlers
//!
//! Start a relay, accept an offer, cancel before or during the call.

use super::ensure_participant;
use crate::dto::{AcceptMatchResponse, ApiResponse, SessionResponse, StartMatchRequest};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use consulta_auth::{AuthenticatedUser, CounselorUser};
use consulta_core::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Start looking for a counselor
///
/// POST /api/v1/matches
#[instrument(skip(state, req), fields(user_id = user.user_id()))]
pub async fn start_match(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: web::Json<StartMatchRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Start match validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let StartMatchRequest { preferred_region } = req.into_inner();
    let session = state
        .scheduler
        .start_match(user.user_id(), preferred_region)
        .await?;

    info!(
        session_id = %session.id,
        candidates = session.candidate_list.len(),
        "Match started"
    );

    Ok(HttpResponse::Created().json(ApiResponse::success(SessionResponse::from(session))))
}

/// Accept the offer currently made to the caller
///
/// POST /api/v1/matches/{id}/accept
#[instrument(skip(state), fields(user_id = user.user_id()))]
pub async fn accept_match(
    state: web::Data<AppState>,
    user: CounselorUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let accepted = state
        .scheduler
        .accept_match(session_id, user.user_id())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        AcceptMatchResponse::from(accepted),
        "Call connected",
    )))
}

/// Cancel a pending match, or end a connected one
///
/// POST /api/v1/matches/{id}/cancel
#[instrument(skip(state), fields(user_id = user.user_id()))]
pub async fn cancel_match(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let session = state.scheduler.get_session(session_id).await?;
    ensure_participant(&session, &user)?;

    let session = state.scheduler.cancel_match(session_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(SessionResponse::from(session))))
}

/// Configure match routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/matches")
            .route("", web::post().to(start_match))
            .route("/{id}/accept", web::post().to(accept_match))
            .route("/{id}/cancel", web::post().to(cancel_match)),
    );
}

//! Session handlers

use super::ensure_participant;
use crate::dto::{ApiResponse, GiftResponse, MediaTokenResponse, SendGiftRequest, SessionResponse};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use consulta_auth::AuthenticatedUser;
use consulta_core::AppError;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Get a session
///
/// GET /api/v1/sessions/{id}
#[instrument(skip(state), fields(user_id = user.user_id()))]
pub async fn get_session(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let session = state.scheduler.get_session(path.into_inner()).await?;
    if !user.is_admin() {
        ensure_participant(&session, &user)?;
    }

    debug!(session_id = %session.id, status = %session.status(), "Session read");
    Ok(HttpResponse::Ok().json(ApiResponse::success(SessionResponse::from(session))))
}

/// Hang up a connected call and settle it
///
/// POST /api/v1/sessions/{id}/end
#[instrument(skip(state), fields(user_id = user.user_id()))]
pub async fn end_call(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let session = state.scheduler.get_session(session_id).await?;
    ensure_participant(&session, &user)?;

    let session = state.meter.end_call(session_id).await?;
    info!(
        session_id = %session.id,
        billed_seconds = session.billed_seconds(),
        "Call ended by participant"
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(SessionResponse::from(session))))
}

/// Send a gift to the counselor on the call
///
/// POST /api/v1/sessions/{id}/gifts
#[instrument(skip(state, req), fields(user_id = user.user_id()))]
pub async fn send_gift(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
    req: web::Json<SendGiftRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Gift validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let receipt = state
        .gifts
        .send_gift(user.user_id(), path.into_inner(), req.amount)
        .await?;

    Ok(HttpResponse::Created().json(ApiResponse::success(GiftResponse::from(receipt))))
}

/// Issue a fresh media token to a participant of a connected call
///
/// POST /api/v1/sessions/{id}/media-token
#[instrument(skip(state), fields(user_id = user.user_id()))]
pub async fn issue_media_token(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let token = state
        .scheduler
        .issue_media_token(path.into_inner(), user.user_id())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(MediaTokenResponse::from(token))))
}

/// Configure session routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sessions")
            .route("/{id}", web::get().to(get_session))
            .route("/{id}/end", web::post().to(end_call))
            .route("/{id}/gifts", web::post().to(send_gift))
            .route("/{id}/media-token", web::post().to(issue_media_token)),
    );
}

//! Counselor presence handlers

use crate::dto::{ApiResponse, AvailabilityResponse, SetAvailabilityRequest};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use consulta_auth::CounselorUser;
use consulta_core::AppError;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Go IDLE, BUSY or OFFLINE
///
/// Going IDLE passes the network quality gate first.
///
/// PUT /api/v1/availability
#[instrument(skip(state, req), fields(user_id = user.user_id()))]
pub async fn set_availability(
    state: web::Data<AppState>,
    user: CounselorUser,
    req: web::Json<SetAvailabilityRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Availability validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let record = state
        .presence
        .set_availability(user.user_id(), req.status, &req.region, req.metrics.as_ref())
        .await?;

    info!(status = %record.status, region = %record.region, "Availability changed");
    Ok(HttpResponse::Ok().json(ApiResponse::success(AvailabilityResponse::from(record))))
}

/// POST /api/v1/availability/heartbeat
#[instrument(skip(state), fields(user_id = user.user_id()))]
pub async fn heartbeat(
    state: web::Data<AppState>,
    user: CounselorUser,
) -> Result<HttpResponse, AppError> {
    let record = state.presence.heartbeat(user.user_id()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(AvailabilityResponse::from(record))))
}

/// DELETE /api/v1/availability
#[instrument(skip(state), fields(user_id = user.user_id()))]
pub async fn logout(
    state: web::Data<AppState>,
    user: CounselorUser,
) -> Result<HttpResponse, AppError> {
    if !state.presence.logout(user.user_id()).await? {
        return Err(AppError::NotFound(format!(
            "no availability for worker {}",
            user.user_id()
        )));
    }
    Ok(HttpResponse::NoContent().finish())
}

/// Configure availability routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/availability")
            .route("", web::put().to(set_availability))
            .route("", web::delete().to(logout))
            .route("/heartbeat", web::post().to(heartbeat)),
    );
}

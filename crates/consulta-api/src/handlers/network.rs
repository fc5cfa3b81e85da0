//! Network check handler

use crate::dto::{ApiResponse, NetworkMetricsRequest};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use consulta_auth::CounselorUser;
use consulta_core::AppError;
use tracing::{instrument, warn};
use validator::Validate;

/// Classify a counselor's link and return the transport profile for it
///
/// A failing link is reported in the body, not as an error, so the client can
/// show the guidance.
///
/// POST /api/v1/network/metrics
#[instrument(skip(state, req), fields(user_id = user.user_id()))]
pub async fn report_metrics(
    state: web::Data<AppState>,
    user: CounselorUser,
    req: web::Json<NetworkMetricsRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Network metrics validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let report = state
        .presence
        .report_network_metrics(user.user_id(), &req.metrics, req.lite_mode)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

/// Configure network routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/network").route("/metrics", web::post().to(report_metrics)));
}

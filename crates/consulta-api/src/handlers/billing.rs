//! Billing administration handlers

use crate::dto::{ApiResponse, LedgerResponse, SweepResponse};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use consulta_auth::AdminUser;
use consulta_core::traits::Store;
use consulta_core::AppError;
use tracing::{info, instrument};
use uuid::Uuid;

/// Run one billing sweep now instead of waiting for the driver
///
/// POST /api/v1/billing/sweep
#[instrument(skip(state), fields(user_id = admin.user_id()))]
pub async fn run_sweep(
    state: web::Data<AppState>,
    admin: AdminUser,
) -> Result<HttpResponse, AppError> {
    let report = state.meter.tick().await?;
    info!(
        scanned = report.scanned,
        charged = report.charged,
        "Manual billing sweep finished"
    );
    Ok(HttpResponse::Ok().json(ApiResponse::success(SweepResponse::from(report))))
}

/// Ledger entries of one settlement
///
/// GET /api/v1/ledger/{transaction_id}
#[instrument(skip(state), fields(user_id = admin.user_id()))]
pub async fn get_ledger(
    state: web::Data<AppState>,
    admin: AdminUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let transaction_id = path.into_inner();
    let entries = state.store.ledger_entries(transaction_id).await?;
    if entries.is_empty() {
        return Err(AppError::NotFound(format!(
            "no ledger entries for {}",
            transaction_id
        )));
    }
    Ok(HttpResponse::Ok().json(ApiResponse::success(LedgerResponse::new(
        transaction_id,
        entries,
    ))))
}

/// Configure billing routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/billing").route("/sweep", web::post().to(run_sweep)))
        .service(web::scope("/ledger").route("/{transaction_id}", web::get().to(get_ledger)));
}

//! Liveness endpoint

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use consulta_core::traits::Store;
use tracing::warn;

/// GET /api/v1/health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let store = match state.store.ping().await {
        Ok(()) => "up",
        Err(e) => {
            warn!(error = %e, "Store ping failed");
            "down"
        }
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "consulta",
        "version": env!("CARGO_PKG_VERSION"),
        "store": store,
    }))
}

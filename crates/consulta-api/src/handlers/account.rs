//! Account handlers

use crate::dto::{AccountResponse, ApiResponse};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use consulta_auth::AuthenticatedUser;
use consulta_core::traits::Store;
use consulta_core::AppError;
use tracing::instrument;

/// Balance, cumulative spend and tier of the caller
///
/// GET /api/v1/accounts/me
#[instrument(skip(state), fields(user_id = user.user_id()))]
pub async fn get_my_account(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let account = state
        .store
        .get_account(user.user_id())
        .await?
        .ok_or_else(|| AppError::AccountNotFound(user.user_id().to_string()))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(AccountResponse::from(account))))
}

/// Configure account routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/accounts").route("/me", web::get().to(get_my_account)));
}

//! Actix-web request extractors
//!
//! Turn a bearer token into the [`Principal`] the services trust, with role gates
//! for counselor-only and admin-only routes.

use crate::jwt::JwtService;
use actix_web::{
    dev::Payload,
    error::{ErrorForbidden, ErrorUnauthorized},
    web, FromRequest, HttpRequest,
};
use consulta_core::error::AppError;
use consulta_core::models::{Principal, UserId, UserRole};
use futures::future::{ready, Ready};
use std::sync::Arc;
use tracing::{debug, warn};

/// Extract the bearer token from the Authorization header
fn extract_bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

/// Authenticated caller
///
/// # Examples
///
/// ```no_run
/// use actix_web::HttpResponse;
/// use consulta_auth::middleware::AuthenticatedUser;
///
/// async fn whoami(user: AuthenticatedUser) -> HttpResponse {
///     HttpResponse::Ok().json(serde_json::json!({ "user_id": user.user_id() }))
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub principal: Principal,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn role(&self) -> UserRole {
        self.principal.role
    }

    pub fn is_admin(&self) -> bool {
        self.principal.role.is_admin()
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let jwt_service = match req.app_data::<web::Data<Arc<JwtService>>>() {
            Some(service) => service.get_ref().clone(),
            None => {
                warn!("JwtService not found in app data");
                return ready(Err(ErrorUnauthorized(AppError::Unauthorized(
                    "Authentication service not configured".to_string(),
                ))));
            }
        };

        let token = match extract_bearer_token(req) {
            Some(t) => t,
            None => {
                debug!("No bearer token found in request");
                return ready(Err(ErrorUnauthorized(AppError::Unauthorized(
                    "No authentication token provided".to_string(),
                ))));
            }
        };

        let principal = jwt_service
            .validate_token(&token)
            .and_then(|claims| claims.principal());

        match principal {
            Ok(principal) => {
                debug!(
                    user_id = principal.user_id,
                    role = %principal.role,
                    "User authenticated successfully"
                );
                ready(Ok(AuthenticatedUser { principal }))
            }
            Err(e) => {
                warn!(error = %e, "Token validation failed");
                ready(Err(ErrorUnauthorized(e)))
            }
        }
    }
}

/// Caller that must be a counselor
#[derive(Debug, Clone, Copy)]
pub struct CounselorUser(pub AuthenticatedUser);

impl std::ops::Deref for CounselorUser {
    type Target = AuthenticatedUser;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequest for CounselorUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let user = match AuthenticatedUser::from_request(req, payload).into_inner() {
            Ok(user) => user,
            Err(e) => return ready(Err(e)),
        };

        if !user.role().is_counselor() {
            warn!(
                user_id = user.user_id(),
                role = %user.role(),
                "Non-counselor attempted counselor action"
            );
            return ready(Err(ErrorForbidden(AppError::Forbidden)));
        }

        ready(Ok(CounselorUser(user)))
    }
}

/// Caller that must be an admin
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub AuthenticatedUser);

impl std::ops::Deref for AdminUser {
    type Target = AuthenticatedUser;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromRequest for AdminUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let user = match AuthenticatedUser::from_request(req, payload).into_inner() {
            Ok(user) => user,
            Err(e) => return ready(Err(e)),
        };

        if !user.is_admin() {
            warn!(
                user_id = user.user_id(),
                role = %user.role(),
                "User attempted admin access without privileges"
            );
            return ready(Err(ErrorForbidden(AppError::Forbidden)));
        }

        debug!(user_id = user.user_id(), "Admin access granted");
        ready(Ok(AdminUser(user)))
    }
}

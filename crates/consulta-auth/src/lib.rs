//! Authentication for Consulta
//!
//! Bearer JWT validation into an authenticated [`Principal`](consulta_core::models::Principal),
//! role-gated Actix-web extractors, and the media token issuer used when a call connects.
//!
//! # Examples
//!
//! ```no_run
//! use consulta_auth::{Claims, JwtService};
//! use consulta_core::models::UserRole;
//!
//! let jwt_service = JwtService::new("your-secret-key", 3600);
//! let token = jwt_service.create_token(&Claims::new(42, UserRole::Requester))?;
//! # Ok::<(), consulta_core::error::AppError>(())
//! ```

pub mod claims;
pub mod jwt;
pub mod media_token;
pub mod middleware;

pub use claims::Claims;
pub use jwt::JwtService;
pub use media_token::JwtMediaTokenIssuer;
pub use middleware::{AdminUser, AuthenticatedUser, CounselorUser};

//! JWT Claims structure
//!
//! Defines the claims carried by bearer tokens.

use chrono::{Duration, Utc};
use consulta_core::error::AppError;
use consulta_core::models::{Principal, UserId, UserRole};
use serde::{Deserialize, Serialize};

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// User role
    pub role: UserRole,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    /// Create new claims for a user; expiration is set by `JwtService`
    ///
    /// # Examples
    ///
    /// ```
    /// use consulta_auth::Claims;
    /// use consulta_core::models::UserRole;
    ///
    /// let claims = Claims::new(42, UserRole::Counselor);
    /// assert_eq!(claims.sub, "42");
    /// assert_eq!(claims.role, UserRole::Counselor);
    /// ```
    pub fn new(user_id: UserId, role: UserRole) -> Self {
        let now = Utc::now();

        Self {
            sub: user_id.to_string(),
            role,
            iat: now.timestamp(),
            exp: 0, // Will be set by JwtService
        }
    }

    /// Create new claims with custom expiration duration
    pub fn with_expiration(user_id: UserId, role: UserRole, expires_in_secs: i64) -> Self {
        let now = Utc::now();
        let exp = now + Duration::seconds(expires_in_secs);

        Self {
            sub: user_id.to_string(),
            role,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        }
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        let now = Utc::now().timestamp();
        self.exp <= now
    }

    /// Numeric user id from the subject
    pub fn user_id(&self) -> Result<UserId, AppError> {
        self.sub
            .parse()
            .map_err(|_| AppError::InvalidToken(format!("subject {} is not a user id", self.sub)))
    }

    /// The authenticated principal these claims describe
    pub fn principal(&self) -> Result<Principal, AppError> {
        Ok(Principal::new(self.user_id()?, self.role))
    }

    /// Check if user has admin privileges
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_with_expiration() {
        let claims = Claims::with_expiration(7, UserRole::Admin, 3600);
        assert_eq!(claims.sub, "7");
        assert!(!claims.is_expired());

        let now = Utc::now().timestamp();
        assert!(claims.exp > now);
        assert!(claims.exp <= now + 3600);
    }

    #[test]
    fn test_expired_claims() {
        let mut claims = Claims::new(7, UserRole::Requester);
        claims.exp = (Utc::now() - Duration::hours(1)).timestamp();
        assert!(claims.is_expired());
    }

    #[test]
    fn test_principal_from_claims() {
        let claims = Claims::new(99, UserRole::Counselor);
        assert_eq!(
            claims.principal().unwrap(),
            Principal::new(99, UserRole::Counselor)
        );

        let mut bad = claims;
        bad.sub = "not-a-number".to_string();
        assert!(matches!(bad.principal(), Err(AppError::InvalidToken(_))));
    }
}

//! Principal model
//!
//! The already-authenticated caller handed to the core by the auth layer.

use super::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// User role enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Caller looking for a consultation
    #[default]
    Requester,
    /// Worker who takes consultations
    Counselor,
    /// Platform operator
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Requester => write!(f, "requester"),
            UserRole::Counselor => write!(f, "counselor"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl UserRole {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "requester" => Some(UserRole::Requester),
            "counselor" => Some(UserRole::Counselor),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }

    /// Check if role has admin privileges
    pub fn is_admin(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    /// Check if role may take consultations
    pub fn is_counselor(&self) -> bool {
        matches!(self, UserRole::Counselor)
    }
}

/// Authenticated principal
///
/// The core trusts this value; credentials are never re-validated past the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User identifier
    pub user_id: UserId,
    /// User role
    pub role: UserRole,
}

impl Principal {
    /// Create a new principal
    pub fn new(user_id: UserId, role: UserRole) -> Self {
        Self { user_id, role }
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Services
//!
//! Business logic between the HTTP handlers and the storage layer.
//!
//! Services borrow the storage (and, where needed, the index database or the
//! whole [`AppState`](crate::state::AppState)) for the duration of one call.
//! Operations that depend on the clock take `now` explicitly in an `_at`
//! variant; the plain variant passes `Utc::now()`.

pub mod auth;
pub mod guardians;
pub mod notifications;
pub mod oauth;
pub mod recovery;
pub mod two_factor;
pub mod wallets;

use crate::auth::password::PasswordError;
use crate::auth::AuthError;
use crate::storage::{IndexError, StorageError};

pub use auth::AuthService;
pub use guardians::GuardianService;
pub use notifications::NotificationService;
pub use oauth::OAuthService;
pub use recovery::RecoveryService;
pub use two_factor::TwoFactorService;
pub use wallets::WalletService;

/// Error returned by every service operation.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Storage error: {0}")]
    Storage(StorageError),
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
    #[error("{0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{what} not found"))
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => ServiceError::not_found(what),
            StorageError::PermissionDenied { resource, .. } => {
                ServiceError::Forbidden(format!("Access denied to {resource}"))
            }
            other => ServiceError::Storage(other),
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InternalError(msg) => ServiceError::Internal(msg),
            AuthError::InsufficientPermissions => ServiceError::Forbidden(e.to_string()),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

impl From<PasswordError> for ServiceError {
    fn from(e: PasswordError) -> Self {
        match e {
            PasswordError::TooShort => ServiceError::BadRequest(e.to_string()),
            PasswordError::Rng => ServiceError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_not_found_reads_naturally() {
        let err = ServiceError::from(StorageError::NotFound("Wallet w1".to_string()));
        assert!(matches!(&err, ServiceError::NotFound(_)));
        assert_eq!(err.to_string(), "Wallet w1 not found");
    }

    #[test]
    fn permission_denied_is_forbidden() {
        let err = ServiceError::from(StorageError::PermissionDenied {
            user_id: "u1".to_string(),
            resource: "wallet w1".to_string(),
        });
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[test]
    fn expired_token_is_unauthorized() {
        assert!(matches!(
            ServiceError::from(AuthError::TokenExpired),
            ServiceError::Unauthorized(_)
        ));
    }
}

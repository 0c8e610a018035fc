// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::roles::Role;

/// Claims of an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Session the token was issued for
    pub sid: String,
    pub role: Role,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Purpose marker carried by two-factor challenge tokens.
pub const TWO_FACTOR_PURPOSE: &str = "2fa";

/// Claims of the short-lived token handed out between password and 2FA steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChallengeClaims {
    pub sub: String,
    /// Always [`TWO_FACTOR_PURPOSE`]
    pub purpose: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated user information extracted from an access token.
///
/// This is the primary type used throughout the application to represent
/// the user making a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Canonical user ID
    pub user_id: String,

    /// User's role
    pub role: Role,

    /// Session the access token belongs to
    pub session_id: String,

    /// Token expiration (Unix timestamp)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    pub fn from_claims(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
            session_id: claims.sid,
            expires_at: claims.exp,
        }
    }

    /// Check if the user has the required role.
    pub fn has_role(&self, required: Role) -> bool {
        self.role.has_privilege(required)
    }

    /// Check if this user is an admin.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

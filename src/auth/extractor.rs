// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated users.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{
        header::{AUTHORIZATION, COOKIE, USER_AGENT},
        request::Parts,
        HeaderMap,
    },
};
use chrono::Utc;

use super::{AuthError, AuthenticatedUser};
use crate::state::AppState;
use crate::storage::{SessionRepository, StorageError};

/// Cookie carrying the access token.
pub const ACCESS_COOKIE: &str = "access_token";
/// Cookie carrying the refresh token.
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Value of a cookie from the `Cookie` request headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Access token from `Authorization: Bearer` or, failing that, the access cookie.
fn access_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    if let Some(header) = headers.get(AUTHORIZATION) {
        let value = header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
        return value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::InvalidAuthHeader);
    }
    cookie_value(headers, ACCESS_COOKIE).ok_or(AuthError::MissingCredentials)
}

/// Extractor for authenticated users.
///
/// Validates the access token and checks that its session is still active,
/// so revoking a session invalidates outstanding access tokens immediately.
///
/// # Example
///
/// ```rust,ignore
/// async fn list_wallets(
///     Auth(user): Auth,
///     State(state): State<AppState>,
/// ) -> Result<Json<Vec<WalletMetadata>>, ApiError> {
///     // user.user_id contains the authenticated user's ID
/// }
/// ```
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let token = access_token(&parts.headers)?;
        let claims = state.tokens().verify_access_token(token)?;

        let session = match SessionRepository::new(state.storage()).get(&claims.sid) {
            Ok(session) => session,
            Err(StorageError::NotFound(_)) => return Err(AuthError::SessionRevoked),
            Err(e) => return Err(AuthError::InternalError(e.to_string())),
        };
        if session.user_id != claims.sub || !session.is_active_at(Utc::now()) {
            return Err(AuthError::SessionRevoked);
        }

        let user = AuthenticatedUser::from_claims(claims);
        parts.extensions.insert(user.clone());
        Ok(Auth(user))
    }
}

/// Extractor that requires admin role.
pub struct AdminOnly(pub AuthenticatedUser);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(AdminOnly(user))
    }
}

/// Caller metadata recorded on sessions and audit events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let ip_address = header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .or_else(|| header("x-real-ip"))
            .map(str::to_string);

        Ok(ClientInfo {
            user_agent: header(USER_AGENT.as_str()).map(str::to_string),
            ip_address,
        })
    }
}

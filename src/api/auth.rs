// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Registration, login, token refresh and session endpoints.
//!
//! Successful logins answer with the tokens in the JSON body and also set
//! them as `HttpOnly` cookies, so browser clients never have to store them.

use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::{extractor::cookie_value, Auth, ClientInfo, ACCESS_COOKIE, REFRESH_COOKIE},
    error::ApiError,
    services::auth::{AuthService, AuthTokens, LoginOutcome, LoginRequest, RegisterRequest},
    state::AppState,
    storage::{SessionResponse, TwoFactorMethod, UserResponse},
};

#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    Authenticated,
    TwoFactorRequired,
}

/// Result of a login step.
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub status: LoginStatus,
    /// Present when `status` is `authenticated`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<AuthTokens>,
    /// Present when `status` is `two_factor_required`; valid for 5 minutes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<TwoFactorMethod>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TwoFactorLoginRequest {
    pub challenge_token: String,
    pub code: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefreshRequest {
    /// Falls back to the `refresh_token` cookie when absent
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ========== Cookies ==========

fn cookie(name: &str, value: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` values for a freshly issued token pair.
pub(crate) fn token_cookies(state: &AppState, tokens: &AuthTokens) -> AppendHeaders<[(axum::http::HeaderName, String); 2]> {
    let secure = state.config().cookie_secure;
    AppendHeaders([
        (
            SET_COOKIE,
            cookie(ACCESS_COOKIE, &tokens.access_token, tokens.expires_in, secure),
        ),
        (
            SET_COOKIE,
            cookie(
                REFRESH_COOKIE,
                &tokens.refresh_token,
                state.tokens().refresh_ttl().num_seconds(),
                secure,
            ),
        ),
    ])
}

fn clear_cookies(state: &AppState) -> AppendHeaders<[(axum::http::HeaderName, String); 2]> {
    let secure = state.config().cookie_secure;
    AppendHeaders([
        (SET_COOKIE, cookie(ACCESS_COOKIE, "", 0, secure)),
        (SET_COOKIE, cookie(REFRESH_COOKIE, "", 0, secure)),
    ])
}

/// Turn a login outcome into a response, setting cookies when authenticated.
pub(crate) fn login_response(state: &AppState, outcome: LoginOutcome) -> Response {
    match outcome {
        LoginOutcome::Authenticated(tokens) => {
            let cookies = token_cookies(state, &tokens);
            let body = LoginResponse {
                status: LoginStatus::Authenticated,
                tokens: Some(tokens),
                challenge_token: None,
                method: None,
            };
            (cookies, Json(body)).into_response()
        }
        LoginOutcome::TwoFactorRequired {
            challenge_token,
            method,
        } => Json(LoginResponse {
            status: LoginStatus::TwoFactorRequired,
            tokens: None,
            challenge_token: Some(challenge_token),
            method: Some(method),
        })
        .into_response(),
    }
}

// ========== Handlers ==========

/// Register a new account.
#[utoipa::path(
    post,
    path = "/v1/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = UserResponse),
        (status = 400, description = "Invalid input or email already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let user = AuthService::new(&state).register(request)?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Log in with email and password.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated, or a second factor is required", body = LoginResponse),
        (status = 401, description = "Invalid credentials or account blocked")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let outcome = AuthService::new(&state).login(request, &client)?;
    Ok(login_response(&state, outcome))
}

/// Complete a login with the two-factor code.
#[utoipa::path(
    post,
    path = "/v1/auth/login/2fa",
    tag = "Auth",
    request_body = TwoFactorLoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = LoginResponse),
        (status = 401, description = "Invalid challenge token or code")
    )
)]
pub async fn login_two_factor(
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<TwoFactorLoginRequest>,
) -> Result<Response, ApiError> {
    let tokens = AuthService::new(&state).complete_two_factor_login(
        &request.challenge_token,
        &request.code,
        &client,
    )?;
    Ok(login_response(&state, LoginOutcome::Authenticated(tokens)))
}

/// Exchange a refresh token for a new token pair.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    tag = "Auth",
    request_body(content = RefreshRequest, description = "Optional; the refresh cookie is used otherwise"),
    responses(
        (status = 200, description = "New tokens", body = AuthTokens),
        (status = 401, description = "Invalid, expired or revoked refresh token")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, ApiError> {
    let from_body = body.and_then(|Json(request)| request.refresh_token);
    let token = from_body
        .or_else(|| cookie_value(&headers, REFRESH_COOKIE).map(str::to_string))
        .ok_or_else(|| ApiError::unauthorized("Missing refresh token"))?;

    let tokens = AuthService::new(&state).refresh(&token)?;
    let cookies = token_cookies(&state, &tokens);
    Ok((cookies, Json(tokens)).into_response())
}

/// Revoke the current session and clear the auth cookies.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout(Auth(user): Auth, State(state): State<AppState>) -> Result<Response, ApiError> {
    AuthService::new(&state).logout(&user)?;
    Ok((clear_cookies(&state), Json(MessageResponse::new("Logged out"))).into_response())
}

/// List the caller's active sessions.
#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Active sessions", body = SessionListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_sessions(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = AuthService::new(&state).list_sessions(&user)?;
    Ok(Json(SessionListResponse {
        total: sessions.len(),
        sessions,
    }))
}

/// Revoke one of the caller's sessions.
#[utoipa::path(
    delete,
    path = "/v1/auth/sessions/{session_id}",
    tag = "Auth",
    params(("session_id" = String, Path, description = "Session ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Session revoked", body = MessageResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn revoke_session(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    AuthService::new(&state).revoke_session(&user, &session_id)?;
    Ok(Json(MessageResponse::new("Session revoked")))
}

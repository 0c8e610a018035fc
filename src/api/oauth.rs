// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OAuth sign-in (Google, GitHub).

use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use super::auth::{login_response, LoginResponse};
use crate::{
    auth::ClientInfo,
    error::ApiError,
    services::oauth::{AuthorizationUrl, OAuthService},
    state::AppState,
};

/// Query string the provider redirects back with.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denied consent
    pub error: Option<String>,
}

/// Build the provider consent URL and remember its state parameter.
#[utoipa::path(
    get,
    path = "/v1/oauth/{provider}/authorize",
    tag = "OAuth",
    params(("provider" = String, Path, description = "`google` or `github`")),
    responses(
        (status = 200, description = "Consent URL", body = AuthorizationUrl),
        (status = 400, description = "Unknown or unconfigured provider")
    )
)]
pub async fn authorize(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<AuthorizationUrl>, ApiError> {
    Ok(Json(OAuthService::new(&state).authorization_url(&provider)?))
}

/// Provider redirect target; exchanges the code and logs the user in.
#[utoipa::path(
    get,
    path = "/v1/oauth/callback/{provider}",
    tag = "OAuth",
    params(
        ("provider" = String, Path, description = "`google` or `github`"),
        CallbackQuery
    ),
    responses(
        (status = 200, description = "Authenticated, or a second factor is required", body = LoginResponse),
        (status = 400, description = "Invalid state or provider error"),
        (status = 401, description = "Code exchange failed or account blocked")
    )
)]
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    client: ClientInfo,
) -> Result<Response, ApiError> {
    if let Some(error) = query.error {
        if let Some(oauth_state) = query.state.as_deref() {
            state.oauth_states().take(oauth_state);
        }
        tracing::info!(provider = %provider, error = %error, "OAuth provider returned an error");
        return Err(ApiError::bad_request(format!("OAuth provider error: {error}")));
    }
    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return Err(ApiError::bad_request("Missing code or state"));
    };

    let outcome = OAuthService::new(&state)
        .callback(&provider, &code, &oauth_state, &client)
        .await?;
    Ok(login_response(&state, outcome))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Two-factor enrollment endpoints (authenticator app or SMS).

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;
use utoipa::ToSchema;

use super::auth::MessageResponse;
use crate::{
    auth::{Auth, ClientInfo},
    error::ApiError,
    services::{
        two_factor::{AuthenticatorSetup, TwoFactorService, TwoFactorStatusResponse},
        AuthService,
    },
    state::AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct SmsSetupRequest {
    /// E.164 phone number
    #[schema(example = "+15551230123")]
    pub phone_number: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TwoFactorCodeRequest {
    pub code: String,
}

fn service(state: &AppState) -> TwoFactorService<'_> {
    TwoFactorService::new(
        state.storage(),
        state.tokens(),
        state.sms_sender(),
        &state.config().totp_issuer,
    )
}

/// Current two-factor configuration of the caller.
#[utoipa::path(
    get,
    path = "/v1/2fa",
    tag = "Two-Factor",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Two-factor status", body = TwoFactorStatusResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_status(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<TwoFactorStatusResponse>, ApiError> {
    Ok(Json(service(&state).status(&user.user_id)?))
}

/// Start authenticator-app enrollment; returns the secret and otpauth URL.
#[utoipa::path(
    post,
    path = "/v1/2fa/authenticator/setup",
    tag = "Two-Factor",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Pending setup", body = AuthenticatorSetup),
        (status = 400, description = "Two-factor already enabled"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn setup_authenticator(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<AuthenticatorSetup>, ApiError> {
    Ok(Json(service(&state).setup_authenticator(&user.user_id)?))
}

/// Start SMS enrollment; a code is sent to the phone number.
#[utoipa::path(
    post,
    path = "/v1/2fa/sms/setup",
    tag = "Two-Factor",
    request_body = SmsSetupRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Pending setup", body = TwoFactorStatusResponse),
        (status = 400, description = "Invalid phone number or two-factor already enabled"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn setup_sms(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<SmsSetupRequest>,
) -> Result<Json<TwoFactorStatusResponse>, ApiError> {
    Ok(Json(
        service(&state).setup_sms(&user.user_id, &request.phone_number)?,
    ))
}

/// Send a new SMS code.
#[utoipa::path(
    post,
    path = "/v1/2fa/sms/resend",
    tag = "Two-Factor",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 400, description = "SMS two-factor not set up"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn resend_sms(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, ApiError> {
    service(&state).resend_sms_code(&user.user_id)?;
    Ok(Json(MessageResponse::new("Code sent")))
}

/// Confirm a pending setup with a code.
#[utoipa::path(
    post,
    path = "/v1/2fa/verify",
    tag = "Two-Factor",
    request_body = TwoFactorCodeRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Two-factor enabled", body = TwoFactorStatusResponse),
        (status = 400, description = "No pending setup"),
        (status = 401, description = "Invalid code")
    )
)]
pub async fn verify_setup(
    Auth(user): Auth,
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<TwoFactorCodeRequest>,
) -> Result<Json<TwoFactorStatusResponse>, ApiError> {
    let status = AuthService::new(&state).limit_code_attempts(&user.user_id, &client, Utc::now(), || {
        service(&state).verify_setup(&user.user_id, &request.code)
    })?;
    Ok(Json(status))
}

/// Disable two-factor authentication with a valid code.
#[utoipa::path(
    post,
    path = "/v1/2fa/disable",
    tag = "Two-Factor",
    request_body = TwoFactorCodeRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Two-factor disabled", body = TwoFactorStatusResponse),
        (status = 400, description = "Two-factor not enabled"),
        (status = 401, description = "Invalid code")
    )
)]
pub async fn disable(
    Auth(user): Auth,
    State(state): State<AppState>,
    client: ClientInfo,
    Json(request): Json<TwoFactorCodeRequest>,
) -> Result<Json<TwoFactorStatusResponse>, ApiError> {
    let status = AuthService::new(&state).limit_code_attempts(&user.user_id, &client, Utc::now(), || {
        service(&state).disable(&user.user_id, &request.code)
    })?;
    Ok(Json(status))
}

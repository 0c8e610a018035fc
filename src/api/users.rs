// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Profile endpoints for the authenticated user.

use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use super::auth::MessageResponse;
use crate::{
    auth::Auth,
    error::ApiError,
    services::auth::{AuthService, UpdateProfileRequest},
    state::AppState,
    storage::UserResponse,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    /// Ignored for accounts that never set a password
    #[serde(default)]
    pub current_password: String,
    pub new_password: String,
}

/// Get the current user's profile.
#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "User profile", body = UserResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn get_current_user(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(AuthService::new(&state).get_profile(&user.user_id)?))
}

/// Update the current user's profile.
#[utoipa::path(
    patch,
    path = "/v1/users/me",
    tag = "Users",
    request_body = UpdateProfileRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Updated profile", body = UserResponse),
        (status = 400, description = "Invalid name"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn update_current_user(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(
        AuthService::new(&state).update_profile(&user.user_id, request)?,
    ))
}

/// Change the password. Other sessions of the user are revoked.
#[utoipa::path(
    post,
    path = "/v1/users/me/password",
    tag = "Users",
    request_body = ChangePasswordRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "New password too weak"),
        (status = 401, description = "Current password is incorrect"),
    )
)]
pub async fn change_password(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    AuthService::new(&state).change_password(
        &user,
        &request.current_password,
        &request.new_password,
    )?;
    Ok(Json(MessageResponse::new("Password changed")))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Guardian management for social recovery.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::Auth,
    error::ApiError,
    services::{GuardianService, WalletService},
    state::AppState,
    storage::StoredGuardian,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddGuardianRequest {
    /// EVM address of the guardian
    #[schema(example = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e")]
    pub address: String,
    /// Defaults to 1
    pub weight: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GuardianListResponse {
    pub guardians: Vec<StoredGuardian>,
    pub total: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ThresholdQuery {
    pub required_weight: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ThresholdResponse {
    pub wallet_id: String,
    pub required_weight: u64,
    /// Sum of the weights of ACTIVE guardians
    pub active_weight: u64,
    pub met: bool,
}

/// List the guardians of a wallet.
#[utoipa::path(
    get,
    path = "/v1/wallets/{wallet_id}/guardians",
    tag = "Guardians",
    security(("bearer_auth" = [])),
    params(("wallet_id" = String, Path, description = "Wallet ID")),
    responses(
        (status = 200, description = "Guardians of the wallet", body = GuardianListResponse),
        (status = 403, description = "Not the wallet owner"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn list_guardians(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<GuardianListResponse>, ApiError> {
    WalletService::new(state.storage()).get_wallet(&user, &wallet_id)?;
    let guardians = GuardianService::new(state.storage()).list_guardians(&wallet_id)?;
    Ok(Json(GuardianListResponse {
        total: guardians.len(),
        guardians,
    }))
}

/// Add a PENDING guardian to a wallet.
#[utoipa::path(
    post,
    path = "/v1/wallets/{wallet_id}/guardians",
    tag = "Guardians",
    security(("bearer_auth" = [])),
    params(("wallet_id" = String, Path, description = "Wallet ID")),
    request_body = AddGuardianRequest,
    responses(
        (status = 201, description = "Guardian added", body = StoredGuardian),
        (status = 400, description = "Invalid address, weight, or duplicate guardian"),
        (status = 403, description = "Not the wallet owner"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn add_guardian(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    Json(request): Json<AddGuardianRequest>,
) -> Result<(StatusCode, Json<StoredGuardian>), ApiError> {
    let guardian = GuardianService::new(state.storage()).add_guardian(
        &user,
        &wallet_id,
        &request.address,
        request.weight,
    )?;
    Ok((StatusCode::CREATED, Json(guardian)))
}

/// Check whether the wallet's active guardians reach a weight.
#[utoipa::path(
    get,
    path = "/v1/wallets/{wallet_id}/guardians/threshold",
    tag = "Guardians",
    security(("bearer_auth" = [])),
    params(("wallet_id" = String, Path, description = "Wallet ID"), ThresholdQuery),
    responses(
        (status = 200, description = "Threshold check", body = ThresholdResponse),
        (status = 403, description = "Not the wallet owner"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn check_threshold(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    Query(query): Query<ThresholdQuery>,
) -> Result<Json<ThresholdResponse>, ApiError> {
    WalletService::new(state.storage()).get_wallet(&user, &wallet_id)?;
    let active_weight = GuardianService::new(state.storage()).active_weight(&wallet_id)?;
    Ok(Json(ThresholdResponse {
        wallet_id,
        required_weight: query.required_weight,
        active_weight,
        met: active_weight >= query.required_weight,
    }))
}

/// Activate a PENDING guardian.
#[utoipa::path(
    post,
    path = "/v1/guardians/{guardian_id}/activate",
    tag = "Guardians",
    security(("bearer_auth" = [])),
    params(("guardian_id" = String, Path, description = "Guardian ID")),
    responses(
        (status = 200, description = "Guardian is active", body = StoredGuardian),
        (status = 400, description = "Guardian was revoked"),
        (status = 403, description = "Not the wallet owner"),
        (status = 404, description = "Guardian not found")
    )
)]
pub async fn activate_guardian(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(guardian_id): Path<String>,
) -> Result<Json<StoredGuardian>, ApiError> {
    Ok(Json(
        GuardianService::new(state.storage()).activate_guardian(&user, &guardian_id)?,
    ))
}

/// Revoke a guardian.
#[utoipa::path(
    post,
    path = "/v1/guardians/{guardian_id}/revoke",
    tag = "Guardians",
    security(("bearer_auth" = [])),
    params(("guardian_id" = String, Path, description = "Guardian ID")),
    responses(
        (status = 200, description = "Guardian is revoked", body = StoredGuardian),
        (status = 403, description = "Not the wallet owner"),
        (status = 404, description = "Guardian not found")
    )
)]
pub async fn revoke_guardian(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(guardian_id): Path<String>,
) -> Result<Json<StoredGuardian>, ApiError> {
    Ok(Json(
        GuardianService::new(state.storage()).revoke_guardian(&user, &guardian_id)?,
    ))
}

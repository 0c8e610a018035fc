// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Guardian-confirmed wallet recovery.
//!
//! A recovery moves through `PENDING → CONFIRMED → EXECUTED`; cancellation
//! and the execution window both end it as `EXPIRED`. One recovery may be
//! open per wallet.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::Auth,
    error::ApiError,
    services::recovery::{InitiateRecoveryRequest, RecoveryService},
    state::AppState,
    storage::StoredRecovery,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmRecoveryRequest {
    /// Address of the confirming guardian; must be ACTIVE on the wallet
    pub guardian_address: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecoveryListResponse {
    pub recoveries: Vec<StoredRecovery>,
    pub total: usize,
}

pub(crate) fn service(state: &AppState) -> RecoveryService<'_> {
    RecoveryService::new(
        state.storage(),
        state.index(),
        state.config().recovery_execution_window,
    )
}

/// Start a recovery of a wallet.
#[utoipa::path(
    post,
    path = "/v1/wallets/{wallet_id}/recoveries",
    tag = "Recovery",
    security(("bearer_auth" = [])),
    params(("wallet_id" = String, Path, description = "Wallet ID")),
    request_body = InitiateRecoveryRequest,
    responses(
        (status = 201, description = "Recovery initiated", body = StoredRecovery),
        (status = 400, description = "Invalid parameters or a recovery is already open"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn initiate_recovery(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    Json(request): Json<InitiateRecoveryRequest>,
) -> Result<(StatusCode, Json<StoredRecovery>), ApiError> {
    let recovery = service(&state).initiate_recovery(&user, &wallet_id, request)?;
    Ok((StatusCode::CREATED, Json(recovery)))
}

/// Recovery history of a wallet.
#[utoipa::path(
    get,
    path = "/v1/wallets/{wallet_id}/recoveries",
    tag = "Recovery",
    security(("bearer_auth" = [])),
    params(("wallet_id" = String, Path, description = "Wallet ID")),
    responses(
        (status = 200, description = "Recoveries of the wallet", body = RecoveryListResponse),
        (status = 403, description = "Not the wallet owner"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn list_recoveries(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<RecoveryListResponse>, ApiError> {
    let recoveries = service(&state).list_for_wallet(&user, &wallet_id)?;
    Ok(Json(RecoveryListResponse {
        total: recoveries.len(),
        recoveries,
    }))
}

/// Get a recovery.
#[utoipa::path(
    get,
    path = "/v1/recoveries/{recovery_id}",
    tag = "Recovery",
    security(("bearer_auth" = [])),
    params(("recovery_id" = String, Path, description = "Recovery ID")),
    responses(
        (status = 200, description = "Recovery", body = StoredRecovery),
        (status = 404, description = "Recovery not found")
    )
)]
pub async fn get_recovery(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(recovery_id): Path<String>,
) -> Result<Json<StoredRecovery>, ApiError> {
    Ok(Json(service(&state).get_recovery(&user, &recovery_id)?))
}

/// Record a guardian confirmation.
#[utoipa::path(
    post,
    path = "/v1/recoveries/{recovery_id}/confirm",
    tag = "Recovery",
    security(("bearer_auth" = [])),
    params(("recovery_id" = String, Path, description = "Recovery ID")),
    request_body = ConfirmRecoveryRequest,
    responses(
        (status = 200, description = "Confirmation recorded", body = StoredRecovery),
        (status = 400, description = "Not an active guardian, duplicate confirmation, or recovery closed"),
        (status = 403, description = "Caller does not control the guardian address"),
        (status = 404, description = "Recovery not found")
    )
)]
pub async fn confirm_recovery(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(recovery_id): Path<String>,
    Json(request): Json<ConfirmRecoveryRequest>,
) -> Result<Json<StoredRecovery>, ApiError> {
    Ok(Json(service(&state).confirm_recovery(
        &user,
        &recovery_id,
        &request.guardian_address,
    )?))
}

/// Transfer the wallet to the new owner once confirmed and the delay has passed.
#[utoipa::path(
    post,
    path = "/v1/recoveries/{recovery_id}/execute",
    tag = "Recovery",
    security(("bearer_auth" = [])),
    params(("recovery_id" = String, Path, description = "Recovery ID")),
    responses(
        (status = 200, description = "Recovery executed", body = StoredRecovery),
        (status = 400, description = "Not confirmed, delay not elapsed, or expired"),
        (status = 403, description = "Not the initiator or new owner"),
        (status = 404, description = "Recovery not found")
    )
)]
pub async fn execute_recovery(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(recovery_id): Path<String>,
) -> Result<Json<StoredRecovery>, ApiError> {
    Ok(Json(service(&state).execute_recovery(&user, &recovery_id)?))
}

/// Cancel an open recovery.
#[utoipa::path(
    post,
    path = "/v1/recoveries/{recovery_id}/cancel",
    tag = "Recovery",
    security(("bearer_auth" = [])),
    params(("recovery_id" = String, Path, description = "Recovery ID")),
    responses(
        (status = 200, description = "Recovery cancelled", body = StoredRecovery),
        (status = 400, description = "Recovery already executed"),
        (status = 403, description = "Not the owner or initiator"),
        (status = 404, description = "Recovery not found")
    )
)]
pub async fn cancel_recovery(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(recovery_id): Path<String>,
) -> Result<Json<StoredRecovery>, ApiError> {
    Ok(Json(service(&state).cancel_recovery(&user, &recovery_id)?))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet management API endpoints.
//!
//! All operations require authentication and enforce ownership; admins may
//! read any wallet.

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
    services::wallets::{WalletKindRequest, WalletService},
    state::AppState,
    storage::WalletMetadata,
};

/// Request to create a new wallet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWalletRequest {
    /// Defaults to a custodial wallet with a server-held key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<WalletKindRequest>,
    /// Optional human-readable label for the wallet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Response containing a list of wallets.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletListResponse {
    /// List of wallets owned by the user.
    pub wallets: Vec<WalletMetadata>,
    /// Total count of wallets.
    pub total: usize,
}

/// Create a new wallet for the authenticated user.
///
/// Custodial wallets get a freshly generated secp256k1 key. The metadata is
/// returned, never the key.
#[utoipa::path(
    post,
    path = "/v1/wallets",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    request_body = CreateWalletRequest,
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletMetadata),
        (status = 400, description = "Invalid wallet parameters"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CreateWalletRequest>,
) -> Result<(StatusCode, Json<WalletMetadata>), ApiError> {
    let kind = request.kind.unwrap_or(WalletKindRequest::Custodial);
    let wallet = WalletService::new(state.storage()).create_wallet(&user, kind, request.label)?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

/// List all wallets owned by the authenticated user.
#[utoipa::path(
    get,
    path = "/v1/wallets",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "List of wallets", body = WalletListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_wallets(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<WalletListResponse>, ApiError> {
    let wallets = WalletService::new(state.storage()).list_wallets(&user.user_id)?;
    Ok(Json(WalletListResponse {
        total: wallets.len(),
        wallets,
    }))
}

/// Get a wallet by ID.
#[utoipa::path(
    get,
    path = "/v1/wallets/{wallet_id}",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    params(("wallet_id" = String, Path, description = "Wallet ID")),
    responses(
        (status = 200, description = "Wallet details", body = WalletMetadata),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the wallet owner"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn get_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<WalletMetadata>, ApiError> {
    Ok(Json(
        WalletService::new(state.storage()).get_wallet(&user, &wallet_id)?,
    ))
}

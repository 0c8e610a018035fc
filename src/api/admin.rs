// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints.
//!
//! These endpoints require the Admin role and provide:
//! - Wallet freeze / unfreeze
//! - Audit log queries
//! - An on-demand stale recovery sweep

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    audit_log,
    auth::AdminOnly,
    error::ApiError,
    services::WalletService,
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, AuditFilter, AuditRepository, StoredRecovery, WalletMetadata,
        WalletStatus,
    },
};

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetWalletStatusRequest {
    pub status: WalletStatus,
}

/// Query parameters for audit log queries.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditQueryParams {
    /// Start date (YYYY-MM-DD format), defaults to today.
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD format), defaults to today.
    pub end_date: Option<String>,
    pub user_id: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    /// Maximum number of results (default 100, at most 1000).
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Response for audit log queries.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    pub events: Vec<AuditEvent>,
    /// Total count (before limit/offset).
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SweepResponse {
    pub expired: usize,
    pub recoveries: Vec<StoredRecovery>,
}

fn parse_day(value: &str, name: &str) -> Result<(), ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ApiError::bad_request(format!("Invalid {name} format. Use YYYY-MM-DD.")))
}

// ============================================================================
// Handlers
// ============================================================================

/// Freeze or reactivate a wallet.
#[utoipa::path(
    put,
    path = "/v1/admin/wallets/{wallet_id}/status",
    tag = "Admin",
    params(("wallet_id" = String, Path, description = "Wallet ID")),
    request_body = SetWalletStatusRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Updated wallet", body = WalletMetadata),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn set_wallet_status(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
    Json(request): Json<SetWalletStatusRequest>,
) -> Result<Json<WalletMetadata>, ApiError> {
    Ok(Json(WalletService::new(state.storage()).set_status(
        &admin,
        &wallet_id,
        request.status,
    )?))
}

/// Query audit logs.
///
/// Search and filter audit log entries by date range, user, event type and
/// resource.
#[utoipa::path(
    get,
    path = "/v1/admin/audit",
    tag = "Admin",
    params(AuditQueryParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Audit events", body = AuditLogResponse),
        (status = 400, description = "Invalid query parameters"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn query_audit_logs(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let today = Utc::now().format("%Y-%m-%d").to_string();
    let start_date = params.start_date.as_deref().unwrap_or(&today);
    let end_date = params.end_date.as_deref().unwrap_or(&today);
    parse_day(start_date, "start_date")?;
    parse_day(end_date, "end_date")?;
    if start_date > end_date {
        return Err(ApiError::bad_request("start_date must not be after end_date"));
    }

    let filter = AuditFilter {
        user_id: params.user_id,
        resource_type: params.resource_type,
        resource_id: params.resource_id,
        event_type: params.event_type,
    };
    let events = AuditRepository::new(state.storage())
        .search(start_date, end_date, &filter)
        .map_err(|e| ApiError::internal(format!("Failed to read audit log: {e}")))?;

    let total = events.len();
    let limit = params.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).min(MAX_AUDIT_LIMIT);
    let offset = params.offset.unwrap_or(0);
    let has_more = offset.saturating_add(limit) < total;
    let events = events.into_iter().skip(offset).take(limit).collect();

    audit_log!(
        state.storage(),
        AuditEvent::new(AuditEventType::AdminAccess)
            .with_user(&admin.user_id)
            .with_resource("audit", format!("{start_date}..{end_date}"))
    );

    Ok(Json(AuditLogResponse {
        events,
        total,
        has_more,
    }))
}

/// Expire recoveries left open past their execution window now.
#[utoipa::path(
    post,
    path = "/v1/admin/recoveries/sweep",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Expired recoveries", body = SweepResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn sweep_recoveries(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<SweepResponse>, ApiError> {
    let recoveries = super::recovery::service(&state).expire_stale(Utc::now())?;

    audit_log!(
        state.storage(),
        AuditEvent::new(AuditEventType::AdminAccess)
            .with_user(&admin.user_id)
            .with_resource("recovery_sweep", "manual")
            .with_details(serde_json::json!({ "expired": recoveries.len() }))
    );
    tracing::info!(admin = %admin.user_id, expired = recoveries.len(), "Manual recovery sweep");

    Ok(Json(SweepResponse {
        expired: recoveries.len(),
        recoveries,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_query_params_deserializes() {
        let params: AuditQueryParams = serde_json::from_str(
            r#"{
            "start_date": "2026-01-01",
            "end_date": "2026-01-31",
            "user_id": "user_123",
            "event_type": "recovery_executed",
            "limit": 50
        }"#,
        )
        .unwrap();

        assert_eq!(params.start_date, Some("2026-01-01".to_string()));
        assert_eq!(params.user_id, Some("user_123".to_string()));
        assert_eq!(params.event_type, Some(AuditEventType::RecoveryExecuted));
        assert_eq!(params.limit, Some(50));
    }

    #[test]
    fn malformed_dates_are_rejected() {
        assert!(parse_day("2026-02-30", "start_date").is_err());
        assert!(parse_day("01/02/2026", "start_date").is_err());
        assert!(parse_day("2026-02-28", "start_date").is_ok());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The caller's notification inbox.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::Auth,
    error::ApiError,
    services::NotificationService,
    state::AppState,
    storage::{NotificationStatus, StoredNotification},
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NotificationQuery {
    /// Only notifications in this status
    pub status: Option<NotificationStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationListResponse {
    pub notifications: Vec<StoredNotification>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountResponse {
    pub count: usize,
}

/// List notifications, newest first.
#[utoipa::path(
    get,
    path = "/v1/notifications",
    tag = "Notifications",
    security(("bearer_auth" = [])),
    params(NotificationQuery),
    responses(
        (status = 200, description = "Notifications", body = NotificationListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_notifications(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<NotificationListResponse>, ApiError> {
    let notifications =
        NotificationService::new(state.storage()).list_for_user(&user.user_id, query.status)?;
    Ok(Json(NotificationListResponse {
        total: notifications.len(),
        notifications,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/notifications/unread-count",
    tag = "Notifications",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Number of unread notifications", body = CountResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn unread_count(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = NotificationService::new(state.storage()).unread_count(&user.user_id)?;
    Ok(Json(CountResponse { count }))
}

/// Mark every unread notification as read.
#[utoipa::path(
    post,
    path = "/v1/notifications/read-all",
    tag = "Notifications",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Number of notifications marked read", body = CountResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn mark_all_read(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = NotificationService::new(state.storage()).mark_all_read(&user.user_id)?;
    Ok(Json(CountResponse { count }))
}

#[utoipa::path(
    post,
    path = "/v1/notifications/{notification_id}/read",
    tag = "Notifications",
    security(("bearer_auth" = [])),
    params(("notification_id" = String, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Notification", body = StoredNotification),
        (status = 404, description = "Notification not found")
    )
)]
pub async fn mark_read(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(notification_id): Path<String>,
) -> Result<Json<StoredNotification>, ApiError> {
    Ok(Json(
        NotificationService::new(state.storage()).mark_read(&user.user_id, &notification_id)?,
    ))
}

#[utoipa::path(
    post,
    path = "/v1/notifications/{notification_id}/archive",
    tag = "Notifications",
    security(("bearer_auth" = [])),
    params(("notification_id" = String, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Notification", body = StoredNotification),
        (status = 404, description = "Notification not found")
    )
)]
pub async fn archive(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(notification_id): Path<String>,
) -> Result<Json<StoredNotification>, ApiError> {
    Ok(Json(
        NotificationService::new(state.storage()).archive(&user.user_id, &notification_id)?,
    ))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP error type and the error-normalizing middleware.
//!
//! Every 4xx/5xx response leaves the server with the same body:
//!
//! ```json
//! { "statusCode": 404, "message": "...", "timestamp": "...", "path": "/v1/..." }
//! ```

use axum::{
    body::to_bytes,
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::services::ServiceError;

/// Largest non-JSON error body read back by the middleware.
const MAX_ERROR_BODY: usize = 16 * 1024;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Error body returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub timestamp: String,
    pub path: String,
}

/// Original error details, carried to the middleware as a response extension.
#[derive(Debug, Clone)]
pub struct ErrorDetails {
    pub message: String,
    pub error_code: Option<&'static str>,
}

/// Build an error response in the common shape (path filled in by the middleware).
pub fn error_response(
    status: StatusCode,
    message: impl Into<String>,
    error_code: Option<&'static str>,
) -> Response {
    let message = message.into();
    let body = ErrorBody {
        status_code: status.as_u16(),
        message: message.clone(),
        error_code: error_code.map(str::to_string),
        timestamp: Utc::now().to_rfc3339(),
        path: String::new(),
    };
    let mut response = (status, Json(body)).into_response();
    response
        .extensions_mut()
        .insert(ErrorDetails { message, error_code });
    response
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Storage(_) | ServiceError::Index(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(self.status, self.message, None)
    }
}

/// Log every failed request and rewrite its body into [`ErrorBody`].
///
/// Responses built by [`error_response`] keep their message; anything else
/// (extractor rejections, fallback 404s) uses its text body or the status
/// reason. 5xx messages are logged and replaced with a generic one.
pub async fn normalize_errors(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let response = next.run(request).await;
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let (message, error_code) = match parts.extensions.get::<ErrorDetails>() {
        Some(details) => (details.message.clone(), details.error_code),
        None => {
            let bytes = to_bytes(body, MAX_ERROR_BODY).await.unwrap_or_default();
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or("Error").to_string()
            } else {
                text
            };
            (message, None)
        }
    };

    if status.is_server_error() {
        tracing::error!(%method, %path, %request_id, status = status.as_u16(), error = %message, "Request failed");
    } else {
        tracing::warn!(%method, %path, %request_id, status = status.as_u16(), error = %message, "Request rejected");
    }

    let body = ErrorBody {
        status_code: status.as_u16(),
        message: if status.is_server_error() {
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            message
        },
        error_code: error_code.map(str::to_string),
        timestamp: Utc::now().to_rfc3339(),
        path,
    };

    let mut normalized = (status, Json(body)).into_response();
    for (name, value) in parts.headers.iter() {
        if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            normalized.headers_mut().append(name.clone(), value.clone());
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn app() -> Router {
        Router::new()
            .route(
                "/missing",
                get(|| async { ApiError::not_found("Wallet w1 not found") }),
            )
            .route(
                "/boom",
                get(|| async { ApiError::internal("disk on fire") }),
            )
            .route(
                "/json",
                axum::routing::post(|Json(_): Json<Value>| async { "ok" }),
            )
            .fallback(|| async { StatusCode::NOT_FOUND })
            .layer(middleware::from_fn(normalize_errors))
    }

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ServiceError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ServiceError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (ServiceError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[tokio::test]
    async fn api_error_body_gets_path() {
        let response = app()
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["statusCode"], 404);
        assert_eq!(body["message"], "Wallet w1 not found");
        assert_eq!(body["path"], "/missing");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn server_errors_are_masked() {
        let response = app()
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["message"], INTERNAL_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn rejections_and_unknown_routes_are_normalized() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/json")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["statusCode"], 400);
        assert_eq!(body["path"], "/json");

        let response = app()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["message"], "Not Found");
    }
}

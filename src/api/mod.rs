// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::Request,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    error::{normalize_errors, ApiError, ErrorBody},
    services::{
        auth::{AuthTokens, LoginRequest, RegisterRequest, UpdateProfileRequest},
        oauth::AuthorizationUrl,
        recovery::InitiateRecoveryRequest,
        two_factor::{AuthenticatorSetup, TwoFactorStatusResponse},
        wallets::WalletKindRequest,
    },
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, GuardianStatus, NotificationStatus, NotificationType,
        RecoveryStatus, SessionResponse, StoredGuardian, StoredNotification, StoredRecovery,
        TwoFactorMethod, TwoFactorStatus, UserResponse, WalletKind, WalletMetadata, WalletStatus,
    },
};

pub mod admin;
pub mod auth;
pub mod guardians;
pub mod health;
pub mod notifications;
pub mod oauth;
pub mod recovery;
pub mod two_factor;
pub mod users;
pub mod wallets;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        // Auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/login/2fa", post(auth::login_two_factor))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/sessions", get(auth::list_sessions))
        .route("/auth/sessions/{session_id}", delete(auth::revoke_session))
        // Users
        .route(
            "/users/me",
            get(users::get_current_user).patch(users::update_current_user),
        )
        .route("/users/me/password", post(users::change_password))
        // Two-factor
        .route("/2fa", get(two_factor::get_status))
        .route("/2fa/authenticator/setup", post(two_factor::setup_authenticator))
        .route("/2fa/sms/setup", post(two_factor::setup_sms))
        .route("/2fa/sms/resend", post(two_factor::resend_sms))
        .route("/2fa/verify", post(two_factor::verify_setup))
        .route("/2fa/disable", post(two_factor::disable))
        // OAuth
        .route("/oauth/{provider}/authorize", get(oauth::authorize))
        .route("/oauth/callback/{provider}", get(oauth::callback))
        // Wallets
        .route(
            "/wallets",
            get(wallets::list_wallets).post(wallets::create_wallet),
        )
        .route("/wallets/{wallet_id}", get(wallets::get_wallet))
        // Guardians
        .route(
            "/wallets/{wallet_id}/guardians",
            get(guardians::list_guardians).post(guardians::add_guardian),
        )
        .route(
            "/wallets/{wallet_id}/guardians/threshold",
            get(guardians::check_threshold),
        )
        .route(
            "/guardians/{guardian_id}/activate",
            post(guardians::activate_guardian),
        )
        .route("/guardians/{guardian_id}/revoke", post(guardians::revoke_guardian))
        // Recovery
        .route(
            "/wallets/{wallet_id}/recoveries",
            get(recovery::list_recoveries).post(recovery::initiate_recovery),
        )
        .route("/recoveries/{recovery_id}", get(recovery::get_recovery))
        .route("/recoveries/{recovery_id}/confirm", post(recovery::confirm_recovery))
        .route("/recoveries/{recovery_id}/execute", post(recovery::execute_recovery))
        .route("/recoveries/{recovery_id}/cancel", post(recovery::cancel_recovery))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/unread-count", get(notifications::unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route(
            "/notifications/{notification_id}/read",
            post(notifications::mark_read),
        )
        .route(
            "/notifications/{notification_id}/archive",
            post(notifications::archive),
        )
        // Admin
        .route(
            "/admin/wallets/{wallet_id}/status",
            put(admin::set_wallet_status),
        )
        .route("/admin/audit", get(admin::query_audit_logs))
        .route("/admin/recoveries/sweep", post(admin::sweep_recoveries));

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
        )
    });

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .fallback(|| async { ApiError::not_found("Route not found") })
        .with_state(state)
        .layer(middleware::from_fn(normalize_errors))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(trace)
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(CorsLayer::permissive())
}

/// Registers the `bearer_auth` scheme referenced by the handlers.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::register,
        auth::login,
        auth::login_two_factor,
        auth::refresh,
        auth::logout,
        auth::list_sessions,
        auth::revoke_session,
        users::get_current_user,
        users::update_current_user,
        users::change_password,
        two_factor::get_status,
        two_factor::setup_authenticator,
        two_factor::setup_sms,
        two_factor::resend_sms,
        two_factor::verify_setup,
        two_factor::disable,
        oauth::authorize,
        oauth::callback,
        wallets::create_wallet,
        wallets::list_wallets,
        wallets::get_wallet,
        guardians::list_guardians,
        guardians::add_guardian,
        guardians::check_threshold,
        guardians::activate_guardian,
        guardians::revoke_guardian,
        recovery::initiate_recovery,
        recovery::list_recoveries,
        recovery::get_recovery,
        recovery::confirm_recovery,
        recovery::execute_recovery,
        recovery::cancel_recovery,
        notifications::list_notifications,
        notifications::unread_count,
        notifications::mark_all_read,
        notifications::mark_read,
        notifications::archive,
        admin::set_wallet_status,
        admin::query_audit_logs,
        admin::sweep_recoveries
    ),
    components(
        schemas(
            ErrorBody,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            RegisterRequest,
            LoginRequest,
            UpdateProfileRequest,
            AuthTokens,
            UserResponse,
            SessionResponse,
            auth::LoginStatus,
            auth::LoginResponse,
            auth::TwoFactorLoginRequest,
            auth::RefreshRequest,
            auth::SessionListResponse,
            auth::MessageResponse,
            users::ChangePasswordRequest,
            TwoFactorMethod,
            TwoFactorStatus,
            AuthenticatorSetup,
            TwoFactorStatusResponse,
            two_factor::SmsSetupRequest,
            two_factor::TwoFactorCodeRequest,
            AuthorizationUrl,
            WalletKindRequest,
            WalletKind,
            WalletStatus,
            WalletMetadata,
            wallets::CreateWalletRequest,
            wallets::WalletListResponse,
            GuardianStatus,
            StoredGuardian,
            guardians::AddGuardianRequest,
            guardians::GuardianListResponse,
            guardians::ThresholdResponse,
            RecoveryStatus,
            StoredRecovery,
            InitiateRecoveryRequest,
            recovery::ConfirmRecoveryRequest,
            recovery::RecoveryListResponse,
            NotificationType,
            NotificationStatus,
            StoredNotification,
            notifications::NotificationListResponse,
            notifications::CountResponse,
            AuditEvent,
            AuditEventType,
            admin::SetWalletStatusRequest,
            admin::AuditLogResponse,
            admin::SweepResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Registration, login and sessions"),
        (name = "Users", description = "Profile of the authenticated user"),
        (name = "Two-Factor", description = "Authenticator and SMS second factors"),
        (name = "OAuth", description = "Google and GitHub sign-in"),
        (name = "Wallets", description = "Custodial wallet management"),
        (name = "Guardians", description = "Guardians for social recovery"),
        (name = "Recovery", description = "Guardian-confirmed wallet recovery"),
        (name = "Notifications", description = "User notification inbox"),
        (name = "Admin", description = "Administrative operations")
    )
)]
pub struct ApiDoc;

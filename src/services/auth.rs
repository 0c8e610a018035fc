// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Accounts, password login and sessions.
//!
//! ## Login flow
//!
//! ```text
//! email + password ──► blocked? ──► password ok? ──► 2FA enabled? ──► session
//!                                      │                  │
//!                                      ▼                  ▼
//!                            failure recorded      challenge token ──► code ──► session
//!                            (5 in 15 min blocks
//!                             the account 30 min)
//! ```
//!
//! Each session backs one refresh token. Refreshing replaces the stored
//! secret, so a refresh token works once. Presenting a stale secret revokes
//! the session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;
use uuid::Uuid;

use super::two_factor::TwoFactorService;
use super::{ServiceError, ServiceResult};
use crate::audit_log;
use crate::auth::password::{hash_password, validate_password, verify_password};
use crate::auth::tokens::TokenManager;
use crate::auth::{AuthenticatedUser, ClientInfo, Role};
use crate::state::AppState;
use crate::storage::{
    AuditEvent, AuditEventType, Claim, SessionRepository, SessionResponse, StorageError,
    StoredSession, StoredUser, TwoFactorMethod, UserRepository, UserResponse,
};

/// Failed attempts within [`FAILURE_WINDOW_MINUTES`] that block an account.
pub const MAX_FAILED_ATTEMPTS: usize = 5;
pub const FAILURE_WINDOW_MINUTES: i64 = 15;
pub const BLOCK_MINUTES: i64 = 30;

const MAX_NAME_LEN: usize = 100;
const INVALID_CREDENTIALS: &str = "Invalid credentials";
const INVALID_REFRESH_TOKEN: &str = "Invalid refresh token";

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "alice@example.com")]
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
}

/// Tokens of a newly authenticated session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub session_id: String,
    pub user: UserResponse,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(AuthTokens),
    /// Password accepted; a second factor must be presented with the challenge token.
    TwoFactorRequired {
        challenge_token: String,
        method: TwoFactorMethod,
    },
}

/// NFKC, trimmed and lowercased.
pub fn normalize_email(raw: &str) -> String {
    raw.nfkc().collect::<String>().trim().to_lowercase()
}

fn validate_email(email: &str) -> ServiceResult<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'))
        && !email.chars().any(char::is_whitespace)
        && email.matches('@').count() == 1;
    if valid {
        Ok(())
    } else {
        Err(ServiceError::BadRequest("Invalid email address".to_string()))
    }
}

fn validate_name(raw: &str) -> ServiceResult<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(ServiceError::BadRequest(format!(
            "Name must be between 1 and {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

pub struct AuthService<'a> {
    state: &'a AppState,
}

impl<'a> AuthService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    fn users(&self) -> UserRepository<'a> {
        UserRepository::new(self.state.storage())
    }

    fn sessions(&self) -> SessionRepository<'a> {
        SessionRepository::new(self.state.storage())
    }

    fn tokens(&self) -> &'a TokenManager {
        self.state.tokens()
    }

    fn two_factor(&self) -> TwoFactorService<'a> {
        TwoFactorService::new(
            self.state.storage(),
            self.state.tokens(),
            self.state.sms_sender(),
            &self.state.config().totp_issuer,
        )
    }

    // ========== Registration ==========

    pub fn register(&self, request: RegisterRequest) -> ServiceResult<UserResponse> {
        let name = validate_name(&request.name)?;
        validate_password(&request.password)?;
        let email = normalize_email(&request.email);
        validate_email(&email)?;

        let user_id = Uuid::new_v4().to_string();
        if let Claim::Held(_) = self.state.index().claim_email(&email, &user_id)? {
            return Err(ServiceError::BadRequest("Email already registered".to_string()));
        }

        let user = match self.create_user(&user_id, &email, name, Some(&request.password)) {
            Ok(user) => user,
            Err(e) => {
                if let Err(release_err) = self.state.index().release_email(&email) {
                    tracing::error!(error = %release_err, "Failed to release email claim");
                }
                return Err(e);
            }
        };

        audit_log!(
            self.state.storage(),
            AuditEventType::UserRegistered,
            &user.user_id,
            "user",
            &user.user_id
        );
        tracing::info!(user_id = %user.user_id, role = %user.role, "User registered");
        Ok(user.into())
    }

    /// Store a user whose email is already claimed.
    pub(crate) fn create_user(
        &self,
        user_id: &str,
        email: &str,
        name: String,
        password: Option<&str>,
    ) -> ServiceResult<StoredUser> {
        let password_hash = password.map(hash_password).transpose()?;
        let role = if self.state.config().is_admin_email(email) {
            Role::Admin
        } else {
            Role::User
        };
        let now = Utc::now();
        let user = StoredUser {
            user_id: user_id.to_string(),
            email: email.to_string(),
            name,
            role,
            password_hash,
            blocked_until: None,
            created_at: now,
            updated_at: now,
        };
        self.users().create(&user)?;
        Ok(user)
    }

    // ========== Login ==========

    pub fn login(&self, request: LoginRequest, client: &ClientInfo) -> ServiceResult<LoginOutcome> {
        self.login_at(request, client, Utc::now())
    }

    pub fn login_at(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> ServiceResult<LoginOutcome> {
        let email = normalize_email(&request.email);
        let Some(user_id) = self.state.index().user_for_email(&email)? else {
            self.audit_failed_login(None, client, "unknown email");
            return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        };
        let user = self.users().get(&user_id)?;

        if user.is_blocked_at(now) {
            self.audit_failed_login(Some(&user.user_id), client, "account blocked");
            return Err(ServiceError::Unauthorized(
                "Account temporarily blocked".to_string(),
            ));
        }

        let password_ok = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(&request.password, hash));
        if !password_ok {
            self.record_failure(&user, client, "invalid password", now)?;
            return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }
        self.record_attempt(&user.user_id, true, now)?;
        self.finish_login(user, client, now)
    }

    /// First factor accepted: ask for the second one or open a session.
    pub(crate) fn finish_login(
        &self,
        user: StoredUser,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> ServiceResult<LoginOutcome> {
        if let Some(method) = self.two_factor().enabled_method(&user.user_id)? {
            if method == TwoFactorMethod::Sms {
                self.two_factor().send_login_code(&user.user_id)?;
            }
            let challenge_token = self.tokens().issue_challenge_token(&user.user_id, now)?;
            tracing::info!(user_id = %user.user_id, method = ?method, "First factor accepted, second factor required");
            return Ok(LoginOutcome::TwoFactorRequired {
                challenge_token,
                method,
            });
        }

        let tokens = self.issue_session(user, client, now)?;
        Ok(LoginOutcome::Authenticated(tokens))
    }

    pub fn complete_two_factor_login(
        &self,
        challenge_token: &str,
        code: &str,
        client: &ClientInfo,
    ) -> ServiceResult<AuthTokens> {
        self.complete_two_factor_login_at(challenge_token, code, client, Utc::now())
    }

    pub fn complete_two_factor_login_at(
        &self,
        challenge_token: &str,
        code: &str,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> ServiceResult<AuthTokens> {
        let claims = self.tokens().verify_challenge_token(challenge_token)?;
        let user = self.users().get(&claims.sub).map_err(|e| match e {
            StorageError::NotFound(_) => ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()),
            other => other.into(),
        })?;

        self.limit_code_attempts(&user.user_id, client, now, || {
            self.two_factor().verify_code_at(&user.user_id, code, now)
        })?;
        self.issue_session(user, client, now)
    }

    /// Run a second-factor check under the same failed-attempt limit as
    /// passwords. A rejected code counts as a failure; a blocked account is
    /// refused before the code is looked at.
    pub fn limit_code_attempts<T>(
        &self,
        user_id: &str,
        client: &ClientInfo,
        now: DateTime<Utc>,
        check: impl FnOnce() -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let user = self.users().get(user_id)?;
        if user.is_blocked_at(now) {
            self.audit_failed_login(Some(user_id), client, "account blocked");
            return Err(ServiceError::Unauthorized(
                "Account temporarily blocked".to_string(),
            ));
        }
        match check() {
            Err(ServiceError::Unauthorized(msg)) => {
                self.record_failure(&user, client, "invalid two-factor code", now)?;
                Err(ServiceError::Unauthorized(msg))
            }
            other => other,
        }
    }

    /// Record an attempt and forget attempts that fell out of the window.
    fn record_attempt(&self, user_id: &str, success: bool, now: DateTime<Utc>) -> ServiceResult<()> {
        let index = self.state.index();
        index.record_login_attempt(user_id, now, success)?;
        index.prune_login_attempts(user_id, now - Duration::minutes(FAILURE_WINDOW_MINUTES))?;
        Ok(())
    }

    fn record_failure(
        &self,
        user: &StoredUser,
        client: &ClientInfo,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        self.record_attempt(&user.user_id, false, now)?;
        self.audit_failed_login(Some(&user.user_id), client, reason);

        let index = self.state.index();
        let failures = index.count_failures_since(&user.user_id, now - Duration::minutes(FAILURE_WINDOW_MINUTES))?;
        if failures >= MAX_FAILED_ATTEMPTS {
            let until = now + Duration::minutes(BLOCK_MINUTES);
            self.users().modify(&user.user_id, |u| {
                u.blocked_until = Some(until);
                Ok::<_, ServiceError>(())
            })?;
            audit_log!(
                self.state.storage(),
                AuditEvent::new(AuditEventType::AccountBlocked)
                    .with_user(&user.user_id)
                    .with_ip(client.ip_address.as_deref())
                    .with_details(serde_json::json!({ "failures": failures, "blockedUntil": until }))
            );
            tracing::warn!(user_id = %user.user_id, failures, "Account blocked after repeated failed attempts");
        }
        Ok(())
    }

    fn audit_failed_login(&self, user_id: Option<&str>, client: &ClientInfo, reason: &str) {
        let mut event = AuditEvent::new(AuditEventType::LoginFailed)
            .with_ip(client.ip_address.as_deref())
            .failed(reason);
        if let Some(user_id) = user_id {
            event = event.with_user(user_id);
        }
        audit_log!(self.state.storage(), event);
    }

    // ========== Sessions ==========

    /// Create a session for `user` and issue its tokens.
    pub(crate) fn issue_session(
        &self,
        user: StoredUser,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> ServiceResult<AuthTokens> {
        let session_id = Uuid::new_v4().to_string();
        let refresh = self.tokens().issue_refresh_token(&session_id)?;
        self.sessions().create(&StoredSession {
            session_id: session_id.clone(),
            user_id: user.user_id.clone(),
            refresh_token_hash: refresh.hash,
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_address.clone(),
            created_at: now,
            last_used_at: now,
            expires_at: now + self.tokens().refresh_ttl(),
            revoked_at: None,
        })?;
        let (access_token, _) = self
            .tokens()
            .issue_access_token(&user.user_id, user.role, &session_id, now)?;

        audit_log!(
            self.state.storage(),
            AuditEvent::new(AuditEventType::LoginSucceeded)
                .with_user(&user.user_id)
                .with_resource("session", &session_id)
                .with_ip(client.ip_address.as_deref())
        );
        tracing::info!(user_id = %user.user_id, session_id = %session_id, "Session created");

        Ok(AuthTokens {
            access_token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens().access_ttl().num_seconds(),
            session_id,
            user: user.into(),
        })
    }

    pub fn refresh(&self, refresh_token: &str) -> ServiceResult<AuthTokens> {
        self.refresh_at(refresh_token, Utc::now())
    }

    /// Exchange a refresh token for new tokens, rotating the stored secret.
    pub fn refresh_at(&self, refresh_token: &str, now: DateTime<Utc>) -> ServiceResult<AuthTokens> {
        let invalid = || ServiceError::Unauthorized(INVALID_REFRESH_TOKEN.to_string());
        let (session_id, secret) = TokenManager::parse_refresh_token(refresh_token).ok_or_else(invalid)?;

        let rotated = self.tokens().issue_refresh_token(session_id)?;
        let tokens = self.tokens();
        let session = self
            .sessions()
            .modify(session_id, |session| {
                if !session.is_active_at(now) {
                    return Ok::<_, ServiceError>(None);
                }
                if !tokens.verify_secret(secret, &session.refresh_token_hash) {
                    // A replayed secret means the token leaked; end the session.
                    session.revoked_at = Some(now);
                    return Ok(None);
                }
                session.refresh_token_hash = rotated.hash.clone();
                session.last_used_at = now;
                Ok(Some(session.clone()))
            })
            .map_err(|e| match e {
                ServiceError::NotFound(_) => invalid(),
                other => other,
            })?;
        let Some(session) = session else {
            tracing::warn!(session_id, "Refresh rejected for inactive session or stale secret");
            return Err(invalid());
        };

        let user = self.users().get(&session.user_id)?;
        let (access_token, _) = self
            .tokens()
            .issue_access_token(&user.user_id, user.role, &session.session_id, now)?;

        audit_log!(
            self.state.storage(),
            AuditEventType::TokenRefreshed,
            &user.user_id,
            "session",
            &session.session_id
        );
        Ok(AuthTokens {
            access_token,
            refresh_token: rotated.token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens().access_ttl().num_seconds(),
            session_id: session.session_id,
            user: user.into(),
        })
    }

    /// Revoke the session the caller is using.
    pub fn logout(&self, user: &AuthenticatedUser) -> ServiceResult<()> {
        self.sessions().revoke(&user.session_id, Utc::now())?;
        audit_log!(
            self.state.storage(),
            AuditEventType::Logout,
            &user.user_id,
            "session",
            &user.session_id
        );
        tracing::info!(user_id = %user.user_id, session_id = %user.session_id, "Logged out");
        Ok(())
    }

    pub fn list_sessions(&self, user: &AuthenticatedUser) -> ServiceResult<Vec<SessionResponse>> {
        Ok(self
            .sessions()
            .list_active_by_user(&user.user_id, Utc::now())?
            .into_iter()
            .map(|s| SessionResponse::from_session(s, &user.session_id))
            .collect())
    }

    /// Revoke one of the caller's sessions. Other users' sessions are NotFound.
    pub fn revoke_session(&self, user: &AuthenticatedUser, session_id: &str) -> ServiceResult<()> {
        let session = self.sessions().get(session_id)?;
        if session.user_id != user.user_id {
            return Err(ServiceError::not_found(format!("Session {session_id}")));
        }
        self.sessions().revoke(session_id, Utc::now())?;
        audit_log!(
            self.state.storage(),
            AuditEventType::SessionRevoked,
            &user.user_id,
            "session",
            session_id
        );
        Ok(())
    }

    // ========== Profile ==========

    pub fn get_profile(&self, user_id: &str) -> ServiceResult<UserResponse> {
        Ok(self.users().get(user_id)?.into())
    }

    pub fn update_profile(&self, user_id: &str, request: UpdateProfileRequest) -> ServiceResult<UserResponse> {
        let name = request.name.as_deref().map(validate_name).transpose()?;
        let user = self.users().modify(user_id, |u| {
            if let Some(name) = name {
                u.name = name;
            }
            Ok::<_, ServiceError>(u.clone())
        })?;
        Ok(user.into())
    }

    /// Set a new password and revoke every other session of the user.
    ///
    /// Accounts created through OAuth have no password; for them the current
    /// password is not checked.
    pub fn change_password(
        &self,
        user: &AuthenticatedUser,
        current_password: &str,
        new_password: &str,
    ) -> ServiceResult<()> {
        validate_password(new_password)?;
        let stored = self.users().get(&user.user_id)?;
        if let Some(hash) = stored.password_hash.as_deref() {
            if !verify_password(current_password, hash) {
                audit_log!(
                    self.state.storage(),
                    AuditEvent::new(AuditEventType::PasswordChanged)
                        .with_user(&user.user_id)
                        .failed("current password mismatch")
                );
                return Err(ServiceError::Unauthorized(
                    "Current password is incorrect".to_string(),
                ));
            }
        }

        let new_hash = hash_password(new_password)?;
        self.users().modify(&user.user_id, |u| {
            u.password_hash = Some(new_hash);
            Ok::<_, ServiceError>(())
        })?;
        let revoked = self
            .sessions()
            .revoke_all_for_user(&user.user_id, Some(&user.session_id), Utc::now())?;

        audit_log!(
            self.state.storage(),
            AuditEvent::new(AuditEventType::PasswordChanged)
                .with_user(&user.user_id)
                .with_details(serde_json::json!({ "revokedSessions": revoked }))
        );
        tracing::info!(user_id = %user.user_id, revoked, "Password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::two_factor::test_support::RecordingSmsSender;
    use crate::state::test_support::test_state;
    use std::sync::Arc;

    fn client() -> ClientInfo {
        ClientInfo {
            user_agent: Some("tests".to_string()),
            ip_address: Some("127.0.0.1".to_string()),
        }
    }

    fn register(state: &AppState, email: &str) -> UserResponse {
        AuthService::new(state)
            .register(RegisterRequest {
                email: email.to_string(),
                password: "correct horse".to_string(),
                name: "Alice".to_string(),
            })
            .unwrap()
    }

    fn login(state: &AppState, email: &str, password: &str, now: DateTime<Utc>) -> ServiceResult<LoginOutcome> {
        AuthService::new(state).login_at(
            LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            },
            &client(),
            now,
        )
    }

    fn authenticated(outcome: LoginOutcome) -> AuthTokens {
        match outcome {
            LoginOutcome::Authenticated(tokens) => tokens,
            other => panic!("expected tokens, got {other:?}"),
        }
    }

    fn as_user(tokens: &AuthTokens) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: tokens.user.user_id.clone(),
            role: tokens.user.role,
            session_id: tokens.session_id.clone(),
            expires_at: 0,
        }
    }

    #[test]
    fn register_normalizes_and_rejects_duplicates() {
        let (state, _temp) = test_state();
        let user = register(&state, "  Alice@Example.COM ");
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.role, Role::User);
        assert!(user.has_password);

        let dup = AuthService::new(&state).register(RegisterRequest {
            email: "alice@example.com".to_string(),
            password: "another password".to_string(),
            name: "Other".to_string(),
        });
        assert!(matches!(dup, Err(ServiceError::BadRequest(msg)) if msg == "Email already registered"));

        for (email, password, name) in [
            ("not-an-email", "long enough", "A"),
            ("b@example.com", "short", "A"),
            ("c@example.com", "long enough", "   "),
        ] {
            let result = AuthService::new(&state).register(RegisterRequest {
                email: email.to_string(),
                password: password.to_string(),
                name: name.to_string(),
            });
            assert!(matches!(result, Err(ServiceError::BadRequest(_))), "{email}");
        }
    }

    #[test]
    fn login_issues_working_tokens() {
        let (state, _temp) = test_state();
        register(&state, "alice@example.com");

        assert!(matches!(
            login(&state, "nobody@example.com", "correct horse", Utc::now()),
            Err(ServiceError::Unauthorized(_))
        ));

        let tokens = authenticated(login(&state, "ALICE@example.com", "correct horse", Utc::now()).unwrap());
        assert_eq!(tokens.token_type, "Bearer");
        let claims = state.tokens().verify_access_token(&tokens.access_token).unwrap();
        assert_eq!(claims.sub, tokens.user.user_id);
        assert_eq!(claims.sid, tokens.session_id);
    }

    #[test]
    fn five_failures_block_the_account() {
        let (state, _temp) = test_state();
        register(&state, "alice@example.com");
        let t0 = Utc::now();

        for i in 0..MAX_FAILED_ATTEMPTS {
            let result = login(&state, "alice@example.com", "wrong password", t0 + Duration::seconds(i as i64));
            assert!(matches!(result, Err(ServiceError::Unauthorized(msg)) if msg == INVALID_CREDENTIALS));
        }

        // Correct password is refused while blocked.
        let blocked = login(&state, "alice@example.com", "correct horse", t0 + Duration::minutes(1));
        assert!(matches!(blocked, Err(ServiceError::Unauthorized(msg)) if msg == "Account temporarily blocked"));

        let later = t0 + Duration::minutes(BLOCK_MINUTES + 1);
        assert!(login(&state, "alice@example.com", "correct horse", later).is_ok());
    }

    #[test]
    fn failures_outside_the_window_do_not_block() {
        let (state, _temp) = test_state();
        register(&state, "alice@example.com");
        let t0 = Utc::now();

        for i in 0..MAX_FAILED_ATTEMPTS as i64 {
            let at = t0 + Duration::minutes(i * (FAILURE_WINDOW_MINUTES / 2 + 1));
            let _ = login(&state, "alice@example.com", "wrong password", at);
        }
        let at = t0 + Duration::minutes(MAX_FAILED_ATTEMPTS as i64 * (FAILURE_WINDOW_MINUTES / 2 + 1));
        assert!(login(&state, "alice@example.com", "correct horse", at).is_ok());
    }

    #[test]
    fn refresh_rotates_and_detects_reuse() {
        let (state, _temp) = test_state();
        register(&state, "alice@example.com");
        let service = AuthService::new(&state);
        let tokens = authenticated(login(&state, "alice@example.com", "correct horse", Utc::now()).unwrap());

        let rotated = service.refresh(&tokens.refresh_token).unwrap();
        assert_ne!(rotated.refresh_token, tokens.refresh_token);
        assert_eq!(rotated.session_id, tokens.session_id);

        // Replaying the old token revokes the session, so the new one dies too.
        assert!(matches!(
            service.refresh(&tokens.refresh_token),
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(
            service.refresh(&rotated.refresh_token),
            Err(ServiceError::Unauthorized(_))
        ));
        assert!(matches!(service.refresh("garbage"), Err(ServiceError::Unauthorized(_))));
        assert!(matches!(service.refresh("nosuch.session"), Err(ServiceError::Unauthorized(_))));
    }

    #[test]
    fn logout_and_session_revocation() {
        let (state, _temp) = test_state();
        register(&state, "alice@example.com");
        register(&state, "bob@example.com");
        let service = AuthService::new(&state);

        let first = authenticated(login(&state, "alice@example.com", "correct horse", Utc::now()).unwrap());
        let second = authenticated(login(&state, "alice@example.com", "correct horse", Utc::now()).unwrap());
        let bob = authenticated(login(&state, "bob@example.com", "correct horse", Utc::now()).unwrap());

        let sessions = service.list_sessions(&as_user(&first)).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions.iter().filter(|s| s.current).count(), 1);

        assert!(matches!(
            service.revoke_session(&as_user(&bob), &first.session_id),
            Err(ServiceError::NotFound(_))
        ));
        service.revoke_session(&as_user(&first), &second.session_id).unwrap();
        assert!(service.refresh(&second.refresh_token).is_err());

        service.logout(&as_user(&first)).unwrap();
        assert!(service.refresh(&first.refresh_token).is_err());
        assert!(service.list_sessions(&as_user(&first)).unwrap().is_empty());
    }

    #[test]
    fn change_password_revokes_other_sessions() {
        let (state, _temp) = test_state();
        register(&state, "alice@example.com");
        let service = AuthService::new(&state);
        let current = authenticated(login(&state, "alice@example.com", "correct horse", Utc::now()).unwrap());
        let other = authenticated(login(&state, "alice@example.com", "correct horse", Utc::now()).unwrap());

        assert!(matches!(
            service.change_password(&as_user(&current), "wrong", "battery staple"),
            Err(ServiceError::Unauthorized(_))
        ));
        service
            .change_password(&as_user(&current), "correct horse", "battery staple")
            .unwrap();

        assert!(service.refresh(&other.refresh_token).is_err());
        assert!(service.refresh(&current.refresh_token).is_ok());
        assert!(login(&state, "alice@example.com", "correct horse", Utc::now()).is_err());
        assert!(login(&state, "alice@example.com", "battery staple", Utc::now()).is_ok());
    }

    #[test]
    fn sms_two_factor_login() {
        let (state, _temp) = test_state();
        let sms = Arc::new(RecordingSmsSender::default());
        let state = state.with_sms_sender(sms.clone());
        let user = register(&state, "alice@example.com");

        let two_factor = TwoFactorService::new(state.storage(), state.tokens(), state.sms_sender(), "Custody");
        two_factor.setup_sms(&user.user_id, "+14155550123").unwrap();
        two_factor.verify_setup(&user.user_id, &sms.last_code().unwrap()).unwrap();

        let outcome = login(&state, "alice@example.com", "correct horse", Utc::now()).unwrap();
        let LoginOutcome::TwoFactorRequired { challenge_token, method } = outcome else {
            panic!("expected a two-factor challenge");
        };
        assert_eq!(method, TwoFactorMethod::Sms);

        let service = AuthService::new(&state);
        assert!(matches!(
            service.complete_two_factor_login(&challenge_token, "000000", &client()),
            Err(ServiceError::Unauthorized(_))
        ));
        let tokens = service
            .complete_two_factor_login(&challenge_token, &sms.last_code().unwrap(), &client())
            .unwrap();
        assert_eq!(tokens.user.user_id, user.user_id);

        // An access token is not a challenge token.
        assert!(service
            .complete_two_factor_login(&tokens.access_token, "123456", &client())
            .is_err());
    }

    #[test]
    fn repeated_bad_two_factor_codes_block_the_account() {
        let (state, _temp) = test_state();
        let sms = Arc::new(RecordingSmsSender::default());
        let state = state.with_sms_sender(sms.clone());
        let user = register(&state, "alice@example.com");

        let two_factor = TwoFactorService::new(state.storage(), state.tokens(), state.sms_sender(), "Custody");
        two_factor.setup_sms(&user.user_id, "+14155550123").unwrap();
        two_factor.verify_setup(&user.user_id, &sms.last_code().unwrap()).unwrap();

        let t0 = Utc::now();
        let LoginOutcome::TwoFactorRequired { challenge_token, .. } =
            login(&state, "alice@example.com", "correct horse", t0).unwrap()
        else {
            panic!("expected a two-factor challenge");
        };
        let code = sms.last_code().unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let service = AuthService::new(&state);
        for i in 0..MAX_FAILED_ATTEMPTS {
            let at = t0 + Duration::seconds(i as i64);
            assert!(matches!(
                service.complete_two_factor_login_at(&challenge_token, wrong, &client(), at),
                Err(ServiceError::Unauthorized(msg)) if msg == "Invalid two-factor code"
            ));
        }

        // The sixth attempt is refused even with the right code.
        let sixth = service.complete_two_factor_login_at(&challenge_token, &code, &client(), t0 + Duration::seconds(10));
        assert!(matches!(sixth, Err(ServiceError::Unauthorized(msg)) if msg == "Account temporarily blocked"));
        let relogin = login(&state, "alice@example.com", "correct horse", t0 + Duration::minutes(1));
        assert!(matches!(relogin, Err(ServiceError::Unauthorized(msg)) if msg == "Account temporarily blocked"));
    }

    #[test]
    fn profile_updates() {
        let (state, _temp) = test_state();
        let user = register(&state, "alice@example.com");
        let service = AuthService::new(&state);

        let updated = service
            .update_profile(&user.user_id, UpdateProfileRequest { name: Some(" Alice B ".to_string()) })
            .unwrap();
        assert_eq!(updated.name, "Alice B");
        assert!(matches!(
            service.update_profile(&user.user_id, UpdateProfileRequest { name: Some(String::new()) }),
            Err(ServiceError::BadRequest(_))
        ));
        assert_eq!(service.get_profile(&user.user_id).unwrap().name, "Alice B");
    }
}

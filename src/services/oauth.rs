// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OAuth login with Google and GitHub.
//!
//! 1. `authorization_url` caches a random `state` for the provider and returns
//!    the provider's consent URL.
//! 2. The provider redirects to the callback with `code` and `state`. The
//!    state is consumed (single use), the code is exchanged for an access
//!    token and the provider profile is fetched.
//! 3. The profile is mapped to a local user: an existing link wins, then a
//!    user with the same verified email, otherwise a new user is created.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::{normalize_email, AuthService, LoginOutcome};
use super::{ServiceError, ServiceResult};
use crate::audit_log;
use crate::auth::tokens::random_token;
use crate::auth::ClientInfo;
use crate::config::OAuthProviderConfig;
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType, Claim, OAuthAccount, StoredUser, UserRepository};

/// Lifetime of a pending authorization state.
pub const STATE_TTL: Duration = Duration::from_secs(600);
const STATE_CAPACITY: usize = 4096;
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = "custody-server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Github,
}

impl OAuthProvider {
    pub fn parse(name: &str) -> ServiceResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "github" => Ok(Self::Github),
            _ => Err(ServiceError::BadRequest("Unsupported OAuth provider".to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Github => "github",
        }
    }

    fn authorize_endpoint(&self) -> &'static str {
        match self {
            Self::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            Self::Github => "https://github.com/login/oauth/authorize",
        }
    }

    fn token_endpoint(&self) -> &'static str {
        match self {
            Self::Google => "https://oauth2.googleapis.com/token",
            Self::Github => "https://github.com/login/oauth/access_token",
        }
    }

    fn scope(&self) -> &'static str {
        match self {
            Self::Google => "openid email profile",
            Self::Github => "read:user user:email",
        }
    }
}

// =============================================================================
// State cache
// =============================================================================

struct PendingState {
    provider: OAuthProvider,
    inserted_at: Instant,
}

/// Pending authorization states, bounded and expiring.
pub struct OAuthStateCache {
    cache: Mutex<LruCache<String, PendingState>>,
    ttl: Duration,
}

impl Default for OAuthStateCache {
    fn default() -> Self {
        Self::new(STATE_CAPACITY, STATE_TTL)
    }
}

impl OAuthStateCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    pub fn insert(&self, state: &str, provider: OAuthProvider) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                state.to_string(),
                PendingState {
                    provider,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Remove a state and return its provider if it had not expired.
    pub fn take(&self, state: &str) -> Option<OAuthProvider> {
        let entry = self.cache.lock().ok()?.pop(state)?;
        (entry.inserted_at.elapsed() < self.ttl).then_some(entry.provider)
    }
}

// =============================================================================
// Provider HTTP client
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("OAuth request failed: {0}")]
    Request(String),

    #[error("OAuth response was invalid: {0}")]
    InvalidResponse(String),
}

/// Identity reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub provider_user_id: String,
    /// Only set when the provider vouches for it.
    pub verified_email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Debug, Clone)]
pub struct HttpOAuthClient {
    http: Client,
}

impl Default for HttpOAuthClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpOAuthClient {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });
        Self { http }
    }

    /// Exchange an authorization code and fetch the provider profile.
    pub async fn fetch_profile(
        &self,
        provider: OAuthProvider,
        config: &OAuthProviderConfig,
        code: &str,
    ) -> Result<OAuthProfile, OAuthError> {
        let token = self.exchange_code(provider, config, code).await?;
        match provider {
            OAuthProvider::Google => self.google_profile(&token).await,
            OAuthProvider::Github => self.github_profile(&token).await,
        }
    }

    async fn exchange_code(
        &self,
        provider: OAuthProvider,
        config: &OAuthProviderConfig,
        code: &str,
    ) -> Result<String, OAuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", config.redirect_url.as_str()),
        ];
        let response = self
            .http
            .post(provider.token_endpoint())
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::Request(format!("token exchange failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OAuthError::Request(format!(
                "token exchange returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| OAuthError::InvalidResponse(format!("token response: {e}")))?;
        Ok(token.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, token: &str) -> Result<T, OAuthError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::Request(format!("GET {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(OAuthError::Request(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| OAuthError::InvalidResponse(format!("{url}: {e}")))
    }

    async fn google_profile(&self, token: &str) -> Result<OAuthProfile, OAuthError> {
        let info: GoogleUserInfo = self
            .get_json("https://openidconnect.googleapis.com/v1/userinfo", token)
            .await?;
        Ok(OAuthProfile {
            provider_user_id: info.sub,
            verified_email: info.email.filter(|_| info.email_verified),
            name: info.name,
        })
    }

    async fn github_profile(&self, token: &str) -> Result<OAuthProfile, OAuthError> {
        let user: GithubUser = self.get_json("https://api.github.com/user", token).await?;
        let emails: Vec<GithubEmail> = self
            .get_json("https://api.github.com/user/emails", token)
            .await?;
        let verified_email = emails
            .into_iter()
            .filter(|e| e.verified)
            .max_by_key(|e| e.primary)
            .map(|e| e.email);
        Ok(OAuthProfile {
            provider_user_id: user.id.to_string(),
            verified_email,
            name: user.name.or(Some(user.login)),
        })
    }
}

// =============================================================================
// Service
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthorizationUrl {
    /// Provider consent page to redirect the browser to
    pub url: String,
    pub state: String,
}

pub struct OAuthService<'a> {
    state: &'a AppState,
}

impl<'a> OAuthService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    fn provider_config(&self, provider: OAuthProvider) -> ServiceResult<&'a OAuthProviderConfig> {
        let config = self.state.config();
        match provider {
            OAuthProvider::Google => config.google.as_ref(),
            OAuthProvider::Github => config.github.as_ref(),
        }
        .ok_or_else(|| {
            ServiceError::BadRequest(format!("OAuth provider {} is not configured", provider.as_str()))
        })
    }

    pub fn authorization_url(&self, provider: &str) -> ServiceResult<AuthorizationUrl> {
        let provider = OAuthProvider::parse(provider)?;
        let config = self.provider_config(provider)?;

        let state = random_token(32)?;
        let mut url = Url::parse(provider.authorize_endpoint())
            .map_err(|e| ServiceError::Internal(format!("invalid authorize endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", provider.scope())
            .append_pair("state", &state);

        self.state.oauth_states().insert(&state, provider);
        Ok(AuthorizationUrl {
            url: url.to_string(),
            state,
        })
    }

    /// Consume a callback state. It must exist, be fresh and belong to `provider`.
    pub fn consume_state(&self, provider: &str, state: &str) -> ServiceResult<OAuthProvider> {
        let provider = OAuthProvider::parse(provider)?;
        match self.state.oauth_states().take(state) {
            Some(cached) if cached == provider => Ok(provider),
            _ => Err(ServiceError::BadRequest("Invalid OAuth state".to_string())),
        }
    }

    pub async fn callback(
        &self,
        provider: &str,
        code: &str,
        state: &str,
        client: &ClientInfo,
    ) -> ServiceResult<LoginOutcome> {
        let provider = self.consume_state(provider, state)?;
        let config = self.provider_config(provider)?;
        let profile = self
            .state
            .oauth_client()
            .fetch_profile(provider, config, code)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, provider = provider.as_str(), "OAuth code exchange failed");
                ServiceError::Unauthorized("OAuth authentication failed".to_string())
            })?;
        self.sign_in_with_profile(provider, profile, client, Utc::now())
    }

    /// Map a provider identity to a local user and log them in.
    pub fn sign_in_with_profile(
        &self,
        provider: OAuthProvider,
        profile: OAuthProfile,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> ServiceResult<LoginOutcome> {
        let index = self.state.index();
        let users = UserRepository::new(self.state.storage());
        let auth = AuthService::new(self.state);

        let user = match index.oauth_account(provider.as_str(), &profile.provider_user_id)? {
            Some(account) => users.get(&account.user_id)?,
            None => {
                let user = self.user_for_new_link(&profile)?;
                let linked = index.link_oauth_account(&OAuthAccount {
                    provider: provider.as_str().to_string(),
                    provider_user_id: profile.provider_user_id.clone(),
                    user_id: user.user_id.clone(),
                    email: profile.verified_email.as_deref().map(normalize_email),
                    linked_at: now,
                })?;
                audit_log!(
                    self.state.storage(),
                    AuditEvent::new(AuditEventType::OAuthLinked)
                        .with_user(&linked.user_id)
                        .with_resource("oauth_account", format!("{}:{}", linked.provider, linked.provider_user_id))
                );
                tracing::info!(user_id = %linked.user_id, provider = provider.as_str(), "OAuth account linked");
                if linked.user_id == user.user_id {
                    user
                } else {
                    users.get(&linked.user_id)?
                }
            }
        };

        if user.is_blocked_at(now) {
            return Err(ServiceError::Unauthorized(
                "Account temporarily blocked".to_string(),
            ));
        }
        auth.finish_login(user, client, now)
    }

    /// Existing user with the profile's verified email, or a new user.
    fn user_for_new_link(&self, profile: &OAuthProfile) -> ServiceResult<StoredUser> {
        let Some(raw_email) = profile.verified_email.as_deref() else {
            return Err(ServiceError::BadRequest(
                "OAuth account has no verified email".to_string(),
            ));
        };
        let email = normalize_email(raw_email);
        let index = self.state.index();
        let users = UserRepository::new(self.state.storage());

        if let Some(user_id) = index.user_for_email(&email)? {
            return Ok(users.get(&user_id)?);
        }

        let user_id = Uuid::new_v4().to_string();
        match index.claim_email(&email, &user_id)? {
            Claim::Claimed => {}
            // Registered concurrently; link to that user instead.
            Claim::Held(holder) => return Ok(users.get(&holder)?),
        }
        let name = profile
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        let auth = AuthService::new(self.state);
        let user = auth.create_user(&user_id, &email, name, None).inspect_err(|_| {
            if let Err(e) = index.release_email(&email) {
                tracing::error!(error = %e, "Failed to release email claim");
            }
        })?;
        audit_log!(
            self.state.storage(),
            AuditEventType::UserRegistered,
            &user.user_id,
            "user",
            &user.user_id
        );
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::RegisterRequest;
    use crate::state::test_support::test_state;

    fn client() -> ClientInfo {
        ClientInfo {
            user_agent: None,
            ip_address: None,
        }
    }

    fn profile(id: &str, email: Option<&str>) -> OAuthProfile {
        OAuthProfile {
            provider_user_id: id.to_string(),
            verified_email: email.map(str::to_string),
            name: Some("Octo Cat".to_string()),
        }
    }

    fn tokens(outcome: LoginOutcome) -> crate::services::auth::AuthTokens {
        match outcome {
            LoginOutcome::Authenticated(tokens) => tokens,
            other => panic!("expected tokens, got {other:?}"),
        }
    }

    #[test]
    fn state_is_single_use_and_provider_bound() {
        let cache = OAuthStateCache::default();
        cache.insert("s1", OAuthProvider::Github);
        assert_eq!(cache.take("s1"), Some(OAuthProvider::Github));
        assert_eq!(cache.take("s1"), None);
        assert_eq!(cache.take("unknown"), None);
    }

    #[test]
    fn expired_states_are_rejected() {
        let cache = OAuthStateCache::new(4, Duration::from_millis(1));
        cache.insert("s1", OAuthProvider::Google);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.take("s1"), None);
    }

    #[test]
    fn consume_state_checks_provider() {
        let (state, _temp) = test_state();
        let service = OAuthService::new(&state);
        state.oauth_states().insert("abc", OAuthProvider::Google);

        assert!(matches!(
            service.consume_state("github", "abc"),
            Err(ServiceError::BadRequest(msg)) if msg == "Invalid OAuth state"
        ));
        // Consumed by the failed attempt as well.
        assert!(service.consume_state("google", "abc").is_err());
        assert!(matches!(
            service.consume_state("myspace", "abc"),
            Err(ServiceError::BadRequest(msg)) if msg == "Unsupported OAuth provider"
        ));
    }

    #[test]
    fn unconfigured_provider_is_rejected() {
        let (state, _temp) = test_state();
        assert!(matches!(
            OAuthService::new(&state).authorization_url("google"),
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[test]
    fn profile_creates_then_reuses_user() {
        let (state, _temp) = test_state();
        let service = OAuthService::new(&state);

        let first = tokens(
            service
                .sign_in_with_profile(OAuthProvider::Github, profile("42", Some("Octo@Example.com")), &client(), Utc::now())
                .unwrap(),
        );
        assert_eq!(first.user.email, "octo@example.com");
        assert_eq!(first.user.name, "Octo Cat");
        assert!(!first.user.has_password);

        // Same identity, email no longer reported: the link still resolves.
        let second = tokens(
            service
                .sign_in_with_profile(OAuthProvider::Github, profile("42", None), &client(), Utc::now())
                .unwrap(),
        );
        assert_eq!(second.user.user_id, first.user.user_id);
        assert_ne!(second.session_id, first.session_id);
    }

    #[test]
    fn profile_links_to_existing_email_user() {
        let (state, _temp) = test_state();
        let registered = AuthService::new(&state)
            .register(RegisterRequest {
                email: "alice@example.com".to_string(),
                password: "correct horse".to_string(),
                name: "Alice".to_string(),
            })
            .unwrap();

        let outcome = OAuthService::new(&state)
            .sign_in_with_profile(OAuthProvider::Google, profile("g-1", Some("ALICE@example.com")), &client(), Utc::now())
            .unwrap();
        assert_eq!(tokens(outcome).user.user_id, registered.user_id);

        let link = state.index().oauth_account("google", "g-1").unwrap().unwrap();
        assert_eq!(link.user_id, registered.user_id);
    }

    #[test]
    fn profile_without_verified_email_cannot_create_user() {
        let (state, _temp) = test_state();
        assert!(matches!(
            OAuthService::new(&state).sign_in_with_profile(OAuthProvider::Github, profile("7", None), &client(), Utc::now()),
            Err(ServiceError::BadRequest(_))
        ));
        assert!(state.index().oauth_account("github", "7").unwrap().is_none());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token issuance and verification.
//!
//! - Access tokens: HS256 JWTs bound to a session (`sid`).
//! - Challenge tokens: HS256 JWTs with `purpose = "2fa"`, issued after a
//!   correct password when a second factor is still required.
//! - Refresh tokens: `<session_id>.<secret>`; only a keyed hash of the secret
//!   is stored, and it is replaced on every refresh.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;

use super::claims::{AccessClaims, ChallengeClaims, TWO_FACTOR_PURPOSE};
use super::{AuthError, Role};

type HmacSha256 = Hmac<Sha256>;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Lifetime of a two-factor challenge token.
pub const CHALLENGE_TTL_SECS: i64 = 300;

const REFRESH_SECRET_LEN: usize = 32;

/// Domain separator for the keyed hash of stored secrets.
const SECRET_HASH_CONTEXT: &[u8] = b"custody-server/secret-hash/v1";

/// Fill `len` bytes from the system CSPRNG and encode them base64url.
pub fn random_token(len: usize) -> Result<String, AuthError> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AuthError::InternalError("random number generator failure".to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// A freshly issued refresh token together with what gets stored.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    /// Value handed to the client.
    pub token: String,
    /// Keyed hash persisted on the session.
    pub hash: String,
}

/// Signs and verifies every token the service hands out.
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    hash_mac: HmacSha256,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenManager {
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, AuthError> {
        let invalid_key = |_| AuthError::InternalError("invalid token secret".to_string());

        // Stored secrets are hashed under a derived key, never the JWT key itself.
        let mut derive = HmacSha256::new_from_slice(secret).map_err(invalid_key)?;
        derive.update(SECRET_HASH_CONTEXT);
        let hash_mac =
            HmacSha256::new_from_slice(&derive.finalize().into_bytes()).map_err(invalid_key)?;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            hash_mac,
            issuer: issuer.into(),
            access_ttl,
            refresh_ttl,
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    // ========== Access tokens ==========

    /// Issue an access token; returns the token and its expiry.
    pub fn issue_access_token(
        &self,
        user_id: &str,
        role: Role,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let expires_at = now + self.access_ttl;
        let claims = AccessClaims {
            sub: user_id.to_string(),
            sid: session_id.to_string(),
            role,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InternalError(format!("token signing failed: {e}")))?;
        Ok((token, expires_at))
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.decode_claims(token)
    }

    // ========== Challenge tokens ==========

    pub fn issue_challenge_token(&self, user_id: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = ChallengeClaims {
            sub: user_id.to_string(),
            purpose: TWO_FACTOR_PURPOSE.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(CHALLENGE_TTL_SECS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InternalError(format!("token signing failed: {e}")))
    }

    pub fn verify_challenge_token(&self, token: &str) -> Result<ChallengeClaims, AuthError> {
        let claims: ChallengeClaims = self.decode_claims(token)?;
        if claims.purpose != TWO_FACTOR_PURPOSE {
            return Err(AuthError::MalformedToken);
        }
        Ok(claims)
    }

    fn decode_claims<T: serde::de::DeserializeOwned>(&self, token: &str) -> Result<T, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);

        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                jsonwebtoken::errors::ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
                _ => AuthError::MalformedToken,
            })
    }

    // ========== Refresh tokens ==========

    pub fn issue_refresh_token(&self, session_id: &str) -> Result<IssuedRefreshToken, AuthError> {
        let secret = random_token(REFRESH_SECRET_LEN)?;
        Ok(IssuedRefreshToken {
            token: format!("{session_id}.{secret}"),
            hash: self.hash_secret(&secret),
        })
    }

    /// Split a refresh token into `(session_id, secret)`.
    pub fn parse_refresh_token(token: &str) -> Option<(&str, &str)> {
        token
            .split_once('.')
            .filter(|(session_id, secret)| !session_id.is_empty() && !secret.is_empty())
    }

    // ========== Keyed hashes ==========

    /// Keyed hash (HMAC-SHA256, hex) of a secret value for storage.
    pub fn hash_secret(&self, value: &str) -> String {
        HEXLOWER.encode(&self.mac(value).finalize().into_bytes())
    }

    /// Constant-time comparison of `value` against a stored [`hash_secret`](Self::hash_secret).
    pub fn verify_secret(&self, value: &str, stored_hash: &str) -> bool {
        let Ok(expected) = HEXLOWER.decode(stored_hash.as_bytes()) else {
            return false;
        };
        self.mac(value).verify_slice(&expected).is_ok()
    }

    fn mac(&self, value: &str) -> HmacSha256 {
        let mut mac = self.hash_mac.clone();
        mac.update(value.as_bytes());
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TokenManager {
        TokenManager::new(
            b"test-secret-that-is-at-least-32-bytes!",
            "custody-server",
            Duration::minutes(15),
            Duration::days(7),
        )
        .unwrap()
    }

    #[test]
    fn access_token_round_trip() {
        let tokens = manager();
        let (token, expires_at) = tokens
            .issue_access_token("user_1", Role::Admin, "sess_1", Utc::now())
            .unwrap();

        let claims = tokens.verify_access_token(&token).unwrap();
        assert_eq!(claims.sub, "user_1");
        assert_eq!(claims.sid, "sess_1");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp, expires_at.timestamp());
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let tokens = manager();
        let issued = Utc::now() - Duration::hours(2);
        let (token, _) = tokens
            .issue_access_token("user_1", Role::User, "sess_1", issued)
            .unwrap();

        assert!(matches!(
            tokens.verify_access_token(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn token_from_other_secret_or_issuer_is_rejected() {
        let (token, _) = manager()
            .issue_access_token("user_1", Role::User, "sess_1", Utc::now())
            .unwrap();

        let other_secret = TokenManager::new(
            b"another-secret-that-is-at-least-32-bytes",
            "custody-server",
            Duration::minutes(15),
            Duration::days(7),
        )
        .unwrap();
        assert!(matches!(
            other_secret.verify_access_token(&token),
            Err(AuthError::InvalidSignature)
        ));

        let other_issuer = TokenManager::new(
            b"test-secret-that-is-at-least-32-bytes!",
            "someone-else",
            Duration::minutes(15),
            Duration::days(7),
        )
        .unwrap();
        assert!(matches!(
            other_issuer.verify_access_token(&token),
            Err(AuthError::InvalidIssuer)
        ));
    }

    #[test]
    fn access_token_is_not_a_challenge() {
        let tokens = manager();
        let (access, _) = tokens
            .issue_access_token("user_1", Role::User, "sess_1", Utc::now())
            .unwrap();
        assert!(tokens.verify_challenge_token(&access).is_err());

        let challenge = tokens.issue_challenge_token("user_1", Utc::now()).unwrap();
        assert_eq!(tokens.verify_challenge_token(&challenge).unwrap().sub, "user_1");
    }

    #[test]
    fn refresh_token_hash_verifies_only_its_secret() {
        let tokens = manager();
        let issued = tokens.issue_refresh_token("sess_1").unwrap();

        let (session_id, secret) = TokenManager::parse_refresh_token(&issued.token).unwrap();
        assert_eq!(session_id, "sess_1");
        assert!(tokens.verify_secret(secret, &issued.hash));
        assert!(!tokens.verify_secret("guess", &issued.hash));
        assert!(!tokens.verify_secret(secret, "not-hex"));
    }

    #[test]
    fn malformed_refresh_tokens_do_not_parse() {
        assert!(TokenManager::parse_refresh_token("no-dot").is_none());
        assert!(TokenManager::parse_refresh_token(".secret").is_none());
        assert!(TokenManager::parse_refresh_token("sess.").is_none());
    }
}

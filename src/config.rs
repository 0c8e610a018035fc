// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Root directory for document storage | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `JWT_SECRET` | HS256 signing secret (at least 32 bytes) | Required |
//! | `JWT_ISSUER` | Issuer claim of issued tokens | `custody-server` |
//! | `ACCESS_TOKEN_TTL_SECS` | Access token lifetime | `900` |
//! | `REFRESH_TOKEN_TTL_SECS` | Session / refresh token lifetime | `604800` |
//! | `TOTP_ISSUER` | Issuer shown in authenticator apps | `Custody` |
//! | `RECOVERY_EXECUTION_WINDOW_SECS` | Time a confirmed recovery stays executable | `604800` |
//! | `RECOVERY_SWEEP_INTERVAL_SECS` | Interval of the stale recovery sweep | `300` |
//! | `COOKIE_SECURE` | Set the `Secure` flag on auth cookies | `true` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; both unset serves plain HTTP | unset |
//! | `OAUTH_{GOOGLE,GITHUB}_{CLIENT_ID,CLIENT_SECRET,REDIRECT_URL}` | OAuth provider credentials | unset |
//! | `ADMIN_EMAILS` | Comma-separated emails that register as admins | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;

use chrono::Duration;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";
pub const JWT_ISSUER_ENV: &str = "JWT_ISSUER";
pub const ACCESS_TOKEN_TTL_ENV: &str = "ACCESS_TOKEN_TTL_SECS";
pub const REFRESH_TOKEN_TTL_ENV: &str = "REFRESH_TOKEN_TTL_SECS";
pub const TOTP_ISSUER_ENV: &str = "TOTP_ISSUER";
pub const RECOVERY_WINDOW_ENV: &str = "RECOVERY_EXECUTION_WINDOW_SECS";
pub const RECOVERY_SWEEP_ENV: &str = "RECOVERY_SWEEP_INTERVAL_SECS";
pub const COOKIE_SECURE_ENV: &str = "COOKIE_SECURE";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const ADMIN_EMAILS_ENV: &str = "ADMIN_EMAILS";

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// Minimum length of `JWT_SECRET` in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Credentials of one OAuth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub totp_issuer: String,
    pub recovery_execution_window: Duration,
    pub recovery_sweep_interval: std::time::Duration,
    pub cookie_secure: bool,
    pub tls: Option<TlsConfig>,
    pub google: Option<OAuthProviderConfig>,
    pub github: Option<OAuthProviderConfig>,
    /// Lowercased emails that receive the admin role on registration.
    pub admin_emails: Vec<String>,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let jwt_secret = get(JWT_SECRET_ENV).ok_or(ConfigError::Missing(JWT_SECRET_ENV))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: JWT_SECRET_ENV,
                reason: format!("must be at least {MIN_JWT_SECRET_LEN} bytes"),
            });
        }

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    name: TLS_CERT_PATH_ENV,
                    reason: format!("{TLS_CERT_PATH_ENV} and {TLS_KEY_PATH_ENV} must be set together"),
                })
            }
        };

        Ok(Self {
            data_dir: get(DATA_DIR_ENV)
                .unwrap_or_else(|| crate::storage::paths::DATA_ROOT.to_string())
                .into(),
            host: get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, PORT_ENV, 8080)?,
            jwt_secret,
            jwt_issuer: get(JWT_ISSUER_ENV).unwrap_or_else(|| "custody-server".to_string()),
            access_token_ttl: Duration::seconds(positive_secs(&get, ACCESS_TOKEN_TTL_ENV, 900)?),
            refresh_token_ttl: Duration::seconds(positive_secs(&get, REFRESH_TOKEN_TTL_ENV, 604_800)?),
            totp_issuer: get(TOTP_ISSUER_ENV).unwrap_or_else(|| "Custody".to_string()),
            recovery_execution_window: Duration::seconds(positive_secs(
                &get,
                RECOVERY_WINDOW_ENV,
                604_800,
            )?),
            recovery_sweep_interval: std::time::Duration::from_secs(
                positive_secs(&get, RECOVERY_SWEEP_ENV, 300)? as u64,
            ),
            cookie_secure: parse_or(&get, COOKIE_SECURE_ENV, true)?,
            tls,
            google: oauth_provider(&get, "GOOGLE"),
            github: oauth_provider(&get, "GITHUB"),
            admin_emails: get(ADMIN_EMAILS_ENV)
                .map(|raw| {
                    raw.split(',')
                        .map(|e| e.trim().to_lowercase())
                        .filter(|e| !e.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether a normalized email is configured as an admin.
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails.iter().any(|e| e == email)
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn positive_secs(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: i64,
) -> Result<i64, ConfigError> {
    let value = parse_or(get, name, default)?;
    if value <= 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be a positive number of seconds".to_string(),
        });
    }
    Ok(value)
}

/// A provider is enabled only when all three variables are set.
fn oauth_provider(
    get: &impl Fn(&str) -> Option<String>,
    provider: &str,
) -> Option<OAuthProviderConfig> {
    Some(OAuthProviderConfig {
        client_id: get(&format!("OAUTH_{provider}_CLIENT_ID"))?,
        client_secret: get(&format!("OAUTH_{provider}_CLIENT_SECRET"))?,
        redirect_url: get(&format!("OAUTH_{provider}_REDIRECT_URL"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_with_only_secret() {
        let config = load(&[(JWT_SECRET_ENV, SECRET)]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.jwt_issuer, "custody-server");
        assert_eq!(config.access_token_ttl, Duration::seconds(900));
        assert_eq!(config.refresh_token_ttl, Duration::days(7));
        assert_eq!(config.recovery_execution_window, Duration::days(7));
        assert_eq!(
            config.recovery_sweep_interval,
            std::time::Duration::from_secs(300)
        );
        assert!(config.cookie_secure);
        assert!(config.tls.is_none());
        assert!(config.google.is_none());
        assert!(config.admin_emails.is_empty());
    }

    #[test]
    fn admin_emails_are_split_and_lowercased() {
        let config = load(&[
            (JWT_SECRET_ENV, SECRET),
            (ADMIN_EMAILS_ENV, " Root@Example.com ,, ops@example.com"),
        ])
        .unwrap();
        assert!(config.is_admin_email("root@example.com"));
        assert!(config.is_admin_email("ops@example.com"));
        assert!(!config.is_admin_email("user@example.com"));
    }

    #[test]
    fn secret_is_required_and_long_enough() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing(JWT_SECRET_ENV));
        assert!(matches!(
            load(&[(JWT_SECRET_ENV, "short")]),
            Err(ConfigError::Invalid { name: JWT_SECRET_ENV, .. })
        ));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(load(&[(JWT_SECRET_ENV, SECRET), (PORT_ENV, "http")]).is_err());
        assert!(load(&[(JWT_SECRET_ENV, SECRET), (ACCESS_TOKEN_TTL_ENV, "0")]).is_err());
        assert!(load(&[(JWT_SECRET_ENV, SECRET), (COOKIE_SECURE_ENV, "maybe")]).is_err());
    }

    #[test]
    fn tls_paths_must_come_in_pairs() {
        assert!(load(&[(JWT_SECRET_ENV, SECRET), (TLS_CERT_PATH_ENV, "/c.pem")]).is_err());
        let config = load(&[
            (JWT_SECRET_ENV, SECRET),
            (TLS_CERT_PATH_ENV, "/c.pem"),
            (TLS_KEY_PATH_ENV, "/k.pem"),
        ])
        .unwrap();
        assert_eq!(config.tls.unwrap().key_path, PathBuf::from("/k.pem"));
    }

    #[test]
    fn oauth_provider_needs_all_three_values() {
        let partial = load(&[
            (JWT_SECRET_ENV, SECRET),
            ("OAUTH_GITHUB_CLIENT_ID", "id"),
            ("OAUTH_GITHUB_CLIENT_SECRET", "secret"),
        ])
        .unwrap();
        assert!(partial.github.is_none());

        let full = load(&[
            (JWT_SECRET_ENV, SECRET),
            ("OAUTH_GITHUB_CLIENT_ID", "id"),
            ("OAUTH_GITHUB_CLIENT_SECRET", "secret"),
            ("OAUTH_GITHUB_REDIRECT_URL", "https://app/callback"),
        ])
        .unwrap();
        assert_eq!(full.github.unwrap().client_id, "id");
    }
}

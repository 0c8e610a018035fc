// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Two-factor authentication: authenticator apps (TOTP) and SMS codes.
//!
//! A user has at most one two-factor record. Setup leaves it PENDING until a
//! valid code is presented; only ENABLED records are consulted at login.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use utoipa::ToSchema;

use super::{ServiceError, ServiceResult};
use crate::audit_log;
use crate::auth::{totp, TokenManager};
use crate::storage::{
    AuditEvent, AuditEventType, DocumentStorage, StoredTwoFactor, TwoFactorMethod,
    TwoFactorRepository, TwoFactorStatus, UserRepository,
};

/// Lifetime of an SMS code.
pub const SMS_CODE_TTL_MINUTES: i64 = 10;

const INVALID_CODE: &str = "Invalid two-factor code";

#[derive(Debug, thiserror::Error)]
#[error("SMS delivery failed: {0}")]
pub struct SmsError(pub String);

/// Delivery channel for SMS codes.
pub trait SmsSender: Send + Sync {
    fn send_code(&self, phone_number: &str, code: &str) -> Result<(), SmsError>;
}

/// Sender that only writes the delivery to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSmsSender;

impl SmsSender for LoggingSmsSender {
    fn send_code(&self, phone_number: &str, code: &str) -> Result<(), SmsError> {
        #[cfg(feature = "dev")]
        tracing::info!(phone = %mask_phone(phone_number), code, "SMS code (dev)");
        #[cfg(not(feature = "dev"))]
        {
            let _ = code;
            tracing::info!(phone = %mask_phone(phone_number), "SMS code issued");
        }
        Ok(())
    }
}

/// Secret and provisioning URL of a new authenticator setup.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthenticatorSetup {
    /// Base32 TOTP secret
    pub secret: String,
    /// `otpauth://totp/...` URL for QR codes
    pub otpauth_url: String,
    pub status: TwoFactorStatus,
}

#[derive(Debug, Serialize, ToSchema, PartialEq, Eq)]
pub struct TwoFactorStatusResponse {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<TwoFactorMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TwoFactorStatus>,
    /// Masked phone number for SMS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

pub struct TwoFactorService<'a> {
    storage: &'a DocumentStorage,
    tokens: &'a TokenManager,
    sms: &'a dyn SmsSender,
    issuer: &'a str,
}

impl<'a> TwoFactorService<'a> {
    pub fn new(
        storage: &'a DocumentStorage,
        tokens: &'a TokenManager,
        sms: &'a dyn SmsSender,
        issuer: &'a str,
    ) -> Self {
        Self {
            storage,
            tokens,
            sms,
            issuer,
        }
    }

    // ========== Setup ==========

    pub fn setup_authenticator(&self, user_id: &str) -> ServiceResult<AuthenticatorSetup> {
        let user = UserRepository::new(self.storage).get(user_id)?;
        self.ensure_not_enabled(user_id)?;

        let secret = totp::generate_secret()
            .ok_or_else(|| ServiceError::Internal("Failed to generate TOTP secret".to_string()))?;
        let otpauth_url = totp::provisioning_url(self.issuer, &user.email, &secret)
            .map_err(|e| ServiceError::Internal(format!("Failed to build provisioning URL: {e}")))?;

        let now = Utc::now();
        TwoFactorRepository::new(self.storage).save(&StoredTwoFactor {
            user_id: user_id.to_string(),
            method: TwoFactorMethod::Authenticator,
            status: TwoFactorStatus::Pending,
            secret: Some(secret.clone()),
            phone_number: None,
            code_hash: None,
            code_expires_at: None,
            last_used_step: None,
            created_at: now,
            updated_at: now,
        })?;
        self.audit_setup(user_id, TwoFactorMethod::Authenticator);

        Ok(AuthenticatorSetup {
            secret,
            otpauth_url,
            status: TwoFactorStatus::Pending,
        })
    }

    pub fn setup_sms(&self, user_id: &str, phone_number: &str) -> ServiceResult<TwoFactorStatusResponse> {
        UserRepository::new(self.storage).get(user_id)?;
        let phone_number = phone_number.trim();
        if !is_e164(phone_number) {
            return Err(ServiceError::BadRequest(
                "Phone number must be in E.164 format".to_string(),
            ));
        }
        self.ensure_not_enabled(user_id)?;

        let now = Utc::now();
        let code = generate_sms_code();
        TwoFactorRepository::new(self.storage).save(&StoredTwoFactor {
            user_id: user_id.to_string(),
            method: TwoFactorMethod::Sms,
            status: TwoFactorStatus::Pending,
            secret: None,
            phone_number: Some(phone_number.to_string()),
            code_hash: Some(self.tokens.hash_secret(&code)),
            code_expires_at: Some(now + Duration::minutes(SMS_CODE_TTL_MINUTES)),
            last_used_step: None,
            created_at: now,
            updated_at: now,
        })?;
        self.deliver(phone_number, &code)?;
        self.audit_setup(user_id, TwoFactorMethod::Sms);

        self.status(user_id)
    }

    /// Send a fresh SMS code, replacing the outstanding one.
    pub fn resend_sms_code(&self, user_id: &str) -> ServiceResult<()> {
        self.resend_sms_code_at(user_id, Utc::now())
    }

    pub fn resend_sms_code_at(&self, user_id: &str, now: DateTime<Utc>) -> ServiceResult<()> {
        let code = generate_sms_code();
        let code_hash = self.tokens.hash_secret(&code);
        let phone = TwoFactorRepository::new(self.storage).modify(user_id, |r| {
            if r.method != TwoFactorMethod::Sms || r.status == TwoFactorStatus::Disabled {
                return Err(ServiceError::BadRequest(
                    "SMS two-factor authentication is not set up".to_string(),
                ));
            }
            r.code_hash = Some(code_hash);
            r.code_expires_at = Some(now + Duration::minutes(SMS_CODE_TTL_MINUTES));
            r.phone_number
                .clone()
                .ok_or_else(|| ServiceError::Internal("SMS record without phone number".to_string()))
        })
        .map_err(not_set_up)?;
        self.deliver(&phone, &code)
    }

    /// Confirm a PENDING setup with a valid code.
    pub fn verify_setup(&self, user_id: &str, code: &str) -> ServiceResult<TwoFactorStatusResponse> {
        self.verify_setup_at(user_id, code, Utc::now())
    }

    pub fn verify_setup_at(&self, user_id: &str, code: &str, now: DateTime<Utc>) -> ServiceResult<TwoFactorStatusResponse> {
        let method = TwoFactorRepository::new(self.storage)
            .modify(user_id, |r| {
                if r.status != TwoFactorStatus::Pending {
                    return Err(ServiceError::BadRequest(
                        "No pending two-factor setup".to_string(),
                    ));
                }
                self.consume_code(r, code, now)?;
                r.status = TwoFactorStatus::Enabled;
                Ok(r.method)
            })
            .map_err(not_set_up)?;

        audit_log!(
            self.storage,
            AuditEvent::new(AuditEventType::TwoFactorEnabled)
                .with_user(user_id)
                .with_details(serde_json::json!({ "method": method }))
        );
        tracing::info!(user_id, method = ?method, "Two-factor authentication enabled");
        self.status(user_id)
    }

    // ========== Verification ==========

    /// Check a login code against an ENABLED record. The code is consumed.
    pub fn verify_code(&self, user_id: &str, code: &str) -> ServiceResult<()> {
        self.verify_code_at(user_id, code, Utc::now())
    }

    pub fn verify_code_at(&self, user_id: &str, code: &str, now: DateTime<Utc>) -> ServiceResult<()> {
        TwoFactorRepository::new(self.storage)
            .modify(user_id, |r| {
                if !r.is_enabled() {
                    return Err(ServiceError::Unauthorized(INVALID_CODE.to_string()));
                }
                self.consume_code(r, code, now)
            })
            .map_err(|e| match e {
                ServiceError::NotFound(_) => ServiceError::Unauthorized(INVALID_CODE.to_string()),
                other => other,
            })
    }

    /// The enabled method of a user, if any.
    pub fn enabled_method(&self, user_id: &str) -> ServiceResult<Option<TwoFactorMethod>> {
        Ok(TwoFactorRepository::new(self.storage)
            .find(user_id)?
            .filter(StoredTwoFactor::is_enabled)
            .map(|r| r.method))
    }

    /// ENABLED → DISABLED after a valid code.
    pub fn disable(&self, user_id: &str, code: &str) -> ServiceResult<TwoFactorStatusResponse> {
        let now = Utc::now();
        TwoFactorRepository::new(self.storage)
            .modify(user_id, |r| {
                if !r.is_enabled() {
                    return Err(ServiceError::BadRequest(
                        "Two-factor authentication is not enabled".to_string(),
                    ));
                }
                self.consume_code(r, code, now)?;
                r.status = TwoFactorStatus::Disabled;
                r.code_hash = None;
                r.code_expires_at = None;
                Ok(())
            })
            .map_err(not_set_up)?;

        audit_log!(
            self.storage,
            AuditEventType::TwoFactorDisabled,
            user_id,
            "user",
            user_id
        );
        tracing::info!(user_id, "Two-factor authentication disabled");
        self.status(user_id)
    }

    pub fn status(&self, user_id: &str) -> ServiceResult<TwoFactorStatusResponse> {
        let record = TwoFactorRepository::new(self.storage).find(user_id)?;
        Ok(match record {
            None => TwoFactorStatusResponse {
                enabled: false,
                method: None,
                status: None,
                phone_number: None,
            },
            Some(r) => TwoFactorStatusResponse {
                enabled: r.is_enabled(),
                method: Some(r.method),
                status: Some(r.status),
                phone_number: r.phone_number.as_deref().map(mask_phone),
            },
        })
    }

    // ========== Helpers ==========

    fn ensure_not_enabled(&self, user_id: &str) -> ServiceResult<()> {
        if self.enabled_method(user_id)?.is_some() {
            return Err(ServiceError::BadRequest(
                "Two-factor authentication is already enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate `code` for the record and mark it used.
    fn consume_code(&self, record: &mut StoredTwoFactor, code: &str, now: DateTime<Utc>) -> ServiceResult<()> {
        let invalid = || ServiceError::Unauthorized(INVALID_CODE.to_string());
        match record.method {
            TwoFactorMethod::Authenticator => {
                let secret = record.secret.as_deref().ok_or_else(invalid)?;
                let step = totp::verify(secret, code, now, record.last_used_step).ok_or_else(invalid)?;
                record.last_used_step = Some(step);
            }
            TwoFactorMethod::Sms => {
                let hash = record.code_hash.as_deref().ok_or_else(invalid)?;
                let live = record.code_expires_at.is_some_and(|exp| now < exp);
                if !live || !self.tokens.verify_secret(code.trim(), hash) {
                    return Err(invalid());
                }
                record.code_hash = None;
                record.code_expires_at = None;
            }
        }
        Ok(())
    }

    fn deliver(&self, phone_number: &str, code: &str) -> ServiceResult<()> {
        self.sms.send_code(phone_number, code).map_err(|e| {
            tracing::error!(error = %e, phone = %mask_phone(phone_number), "SMS delivery failed");
            ServiceError::Internal("Failed to send SMS code".to_string())
        })
    }

    fn audit_setup(&self, user_id: &str, method: TwoFactorMethod) {
        audit_log!(
            self.storage,
            AuditEvent::new(AuditEventType::TwoFactorSetupStarted)
                .with_user(user_id)
                .with_details(serde_json::json!({ "method": method }))
        );
    }

    /// Send a login code to an ENABLED SMS record.
    pub fn send_login_code(&self, user_id: &str) -> ServiceResult<()> {
        self.resend_sms_code(user_id)
    }
}

fn not_set_up(e: ServiceError) -> ServiceError {
    match e {
        ServiceError::NotFound(_) => {
            ServiceError::BadRequest("Two-factor authentication is not set up".to_string())
        }
        other => other,
    }
}

fn generate_sms_code() -> String {
    format!("{:06}", rand::rngs::OsRng.gen_range(0..1_000_000u32))
}

/// `+` followed by 8 to 15 digits, no leading zero.
pub fn is_e164(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0')
}

/// Keep the country-code plus sign and the last four digits.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    let visible = digits.len().min(4);
    let hidden = digits.len() - visible;
    let tail: String = digits[hidden..].iter().collect();
    format!("+{}{}", "*".repeat(hidden), tail)
}

#[cfg(test)]
pub mod test_support {
    use std::sync::Mutex;

    use super::{SmsError, SmsSender};

    /// Sender that keeps every delivered code.
    #[derive(Default)]
    pub struct RecordingSmsSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSmsSender {
        pub fn last_code(&self) -> Option<String> {
            self.sent.lock().unwrap().last().map(|(_, code)| code.clone())
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl SmsSender for RecordingSmsSender {
        fn send_code(&self, phone_number: &str, code: &str) -> Result<(), SmsError> {
            self.sent
                .lock()
                .unwrap()
                .push((phone_number.to_string(), code.to_string()));
            Ok(())
        }
    }
}

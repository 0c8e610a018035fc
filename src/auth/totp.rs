// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Time-based one-time passwords (RFC 6238, HMAC-SHA1, 30 s, 6 digits).

use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha1::Sha1;
use url::Url;

type HmacSha1 = Hmac<Sha1>;

pub const STEP_SECS: i64 = 30;
pub const DIGITS: u32 = 6;
/// Steps accepted on either side of the current one.
pub const SKEW_STEPS: u64 = 1;
const SECRET_LEN: usize = 20;

/// Generate a new base32 secret from the system CSPRNG.
pub fn generate_secret() -> Option<String> {
    let mut secret = [0u8; SECRET_LEN];
    SystemRandom::new().fill(&mut secret).ok()?;
    Some(BASE32_NOPAD.encode(&secret))
}

/// Time step containing `now`.
pub fn time_step(now: DateTime<Utc>) -> u64 {
    (now.timestamp().max(0) / STEP_SECS) as u64
}

/// HOTP value for a counter (RFC 4226 dynamic truncation).
pub fn code_at_step(secret: &[u8], step: u64) -> Option<u32> {
    let mut mac = HmacSha1::new_from_slice(secret).ok()?;
    mac.update(&step.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Some(binary % 10u32.pow(DIGITS))
}

/// Check `code` against the steps around `now`.
///
/// Returns the matching step. Steps at or before `last_used_step` are
/// rejected so a code cannot be replayed.
pub fn verify(
    secret_b32: &str,
    code: &str,
    now: DateTime<Utc>,
    last_used_step: Option<u64>,
) -> Option<u64> {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let expected: u32 = code.parse().ok()?;
    let secret = BASE32_NOPAD.decode(secret_b32.as_bytes()).ok()?;

    let current = time_step(now);
    let first = current.saturating_sub(SKEW_STEPS);
    (first..=current + SKEW_STEPS)
        .filter(|step| last_used_step.is_none_or(|last| *step > last))
        .find(|step| code_at_step(&secret, *step) == Some(expected))
}

/// `otpauth://` URL for authenticator apps.
pub fn provisioning_url(issuer: &str, account: &str, secret_b32: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse("otpauth://totp/")?;
    url.set_path(&format!("/{issuer}:{account}"));
    url.query_pairs_mut()
        .append_pair("secret", secret_b32)
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &DIGITS.to_string())
        .append_pair("period", &STEP_SECS.to_string());
    Ok(url.to_string())
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Shared Data Models
//!
//! ## Wallet Address Type
//!
//! The [`WalletAddress`] newtype wraps EVM addresses (0x-prefixed, 40 hex
//! characters). Parsing accepts any letter case and always yields the
//! EIP-55 checksummed form, so two spellings of one address compare equal.

use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// EIP-55 checksummed EVM address.
///
/// # Example
///
/// ```rust,ignore
/// let addr = WalletAddress::parse("0x742d35cc6634c0532925a3b844bc9e7595f4ab12")?;
/// assert_eq!(addr.as_str(), "0x742d35Cc6634C0532925a3b844Bc9e7595f4aB12");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "0x742d35Cc6634C0532925a3b844Bc9e7595f4aB12")]
pub struct WalletAddress(String);

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("Invalid EVM address: {0}")]
pub struct InvalidAddress(pub String);

impl WalletAddress {
    pub fn parse(value: &str) -> Result<Self, InvalidAddress> {
        let trimmed = value.trim();
        if !trimmed.starts_with("0x") || trimmed.len() != 42 {
            return Err(InvalidAddress(value.to_string()));
        }
        Address::from_str(trimmed)
            .map(Self::from_address)
            .map_err(|_| InvalidAddress(value.to_string()))
    }

    pub fn from_address(address: Address) -> Self {
        WalletAddress(address.to_checksum(None))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = InvalidAddress;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        WalletAddress::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKSUMMED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn parse_normalizes_to_checksum() {
        let lower = WalletAddress::parse(&CHECKSUMMED.to_lowercase()).unwrap();
        assert_eq!(lower.as_str(), CHECKSUMMED);
        assert_eq!(lower, WalletAddress::parse(CHECKSUMMED).unwrap());
    }

    #[test]
    fn parse_rejects_malformed_addresses() {
        for bad in ["", "0x123", "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed00", "0xZZAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"] {
            assert!(WalletAddress::parse(bad).is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn deserialization_validates() {
        let ok: WalletAddress = serde_json::from_str(&format!("\"{CHECKSUMMED}\"")).unwrap();
        assert_eq!(ok.as_str(), CHECKSUMMED);
        assert!(serde_json::from_str::<WalletAddress>("\"0xnope\"").is_err());
    }
}

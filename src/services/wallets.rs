// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet creation, lookup and administrative status changes.
//!
//! Creation dispatches on the wallet kind:
//!
//! - **custodial**: a secp256k1 key is generated here; the PKCS#8 PEM goes to
//!   the wallet's key file and only the address is returned.
//! - **mpc**: threshold parameters are recorded and the wallet stays
//!   `pending` until the (external) key ceremony finishes.
//! - **smart_contract**: an existing contract address on a chain.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::notifications::{log_failure, NotificationService};
use super::{ServiceError, ServiceResult};
use crate::audit_log;
use crate::auth::AuthenticatedUser;
use crate::models::WalletAddress;
use crate::storage::{
    AuditEvent, AuditEventType, DocumentStorage, OwnershipEnforcer, WalletKind, WalletMetadata,
    WalletRepository, WalletStatus,
};

const MAX_LABEL_LEN: usize = 64;

/// Requested wallet kind.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletKindRequest {
    Custodial,
    Mpc { threshold: u32, participants: u32 },
    SmartContract { contract_address: String, chain_id: u64 },
}

pub struct WalletService<'a> {
    storage: &'a DocumentStorage,
}

impl<'a> WalletService<'a> {
    pub fn new(storage: &'a DocumentStorage) -> Self {
        Self { storage }
    }

    pub fn create_wallet(
        &self,
        owner: &AuthenticatedUser,
        kind: WalletKindRequest,
        label: Option<String>,
    ) -> ServiceResult<WalletMetadata> {
        let label = normalize_label(label)?;

        let (kind, status, private_key_pem) = match kind {
            WalletKindRequest::Custodial => {
                let (pem, address) = generate_secp256k1_keypair()?;
                (WalletKind::Custodial { address }, WalletStatus::Active, Some(pem))
            }
            WalletKindRequest::Mpc {
                threshold,
                participants,
            } => {
                if threshold == 0 || threshold > participants {
                    return Err(ServiceError::BadRequest(
                        "MPC threshold must be between 1 and the number of participants".to_string(),
                    ));
                }
                let kind = WalletKind::Mpc {
                    threshold,
                    participants,
                    address: None,
                };
                (kind, WalletStatus::Pending, None)
            }
            WalletKindRequest::SmartContract {
                contract_address,
                chain_id,
            } => {
                let contract_address = WalletAddress::parse(&contract_address)
                    .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
                if chain_id == 0 {
                    return Err(ServiceError::BadRequest("chain_id must be positive".to_string()));
                }
                let kind = WalletKind::SmartContract {
                    contract_address: contract_address.into(),
                    chain_id,
                };
                (kind, WalletStatus::Active, None)
            }
        };

        let now = Utc::now();
        let metadata = WalletMetadata {
            wallet_id: Uuid::new_v4().to_string(),
            owner_user_id: owner.user_id.clone(),
            kind,
            status,
            label,
            created_at: now,
            updated_at: now,
        };
        WalletRepository::new(self.storage)
            .create(&metadata, private_key_pem.as_deref().map(str::as_bytes))?;

        audit_log!(
            self.storage,
            AuditEvent::new(AuditEventType::WalletCreated)
                .with_user(&owner.user_id)
                .with_resource("wallet", &metadata.wallet_id)
                .with_details(serde_json::json!({ "kind": metadata.kind.name() }))
        );
        tracing::info!(
            wallet_id = %metadata.wallet_id,
            owner = %owner.user_id,
            kind = metadata.kind.name(),
            "Wallet created"
        );
        Ok(metadata)
    }

    pub fn list_wallets(&self, owner_user_id: &str) -> ServiceResult<Vec<WalletMetadata>> {
        Ok(WalletRepository::new(self.storage).list_by_owner(owner_user_id)?)
    }

    /// Wallet visible to its owner and to admins.
    pub fn get_wallet(&self, actor: &AuthenticatedUser, wallet_id: &str) -> ServiceResult<WalletMetadata> {
        let wallet = WalletRepository::new(self.storage).get(wallet_id)?;
        wallet.verify_owner_or_admin(actor)?;
        Ok(wallet)
    }

    /// Freeze or unfreeze a wallet (admin only). The owner is notified.
    pub fn set_status(
        &self,
        admin: &AuthenticatedUser,
        wallet_id: &str,
        status: WalletStatus,
    ) -> ServiceResult<WalletMetadata> {
        if !admin.is_admin() {
            return Err(ServiceError::Forbidden("Admin role required".to_string()));
        }

        let (previous, wallet) = WalletRepository::new(self.storage).modify(wallet_id, |w| {
            let previous = w.status;
            w.status = status;
            Ok::<_, ServiceError>((previous, w.clone()))
        })?;

        if previous != status {
            audit_log!(
                self.storage,
                AuditEvent::new(AuditEventType::WalletStatusChanged)
                    .with_user(&admin.user_id)
                    .with_resource("wallet", wallet_id)
                    .with_details(serde_json::json!({ "from": previous, "to": status }))
            );
            let message = match status {
                WalletStatus::Frozen => "Your wallet was frozen by an administrator",
                WalletStatus::Active => "Your wallet was reactivated by an administrator",
                WalletStatus::Pending => "Your wallet was set to pending by an administrator",
            };
            log_failure(
                NotificationService::new(self.storage).create_security_notification(
                    &wallet.owner_user_id,
                    Some(wallet_id),
                    "Wallet status changed",
                    message,
                ),
                "wallet status change",
            );
        }
        Ok(wallet)
    }

    pub fn find_by_address(&self, address: &str) -> ServiceResult<Option<WalletMetadata>> {
        Ok(WalletRepository::new(self.storage).find_by_address(address)?)
    }
}

fn normalize_label(label: Option<String>) -> ServiceResult<Option<String>> {
    let Some(label) = label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) else {
        return Ok(None);
    };
    if label.chars().count() > MAX_LABEL_LEN {
        return Err(ServiceError::BadRequest(format!(
            "Label must be at most {MAX_LABEL_LEN} characters"
        )));
    }
    Ok(Some(label))
}

/// Generate a secp256k1 keypair and derive its EVM address.
///
/// The address is the last 20 bytes of keccak256 over the uncompressed public
/// key without its 0x04 prefix. Returns `(pkcs8_pem, checksummed_address)`.
fn generate_secp256k1_keypair() -> ServiceResult<(String, String)> {
    use alloy::primitives::{keccak256, Address};
    use k256::ecdsa::SigningKey;
    use k256::elliptic_curve::rand_core::OsRng;
    use k256::pkcs8::EncodePrivateKey;

    let signing_key = SigningKey::random(&mut OsRng);

    let private_key_pem = signing_key
        .to_pkcs8_pem(k256::pkcs8::LineEnding::LF)
        .map_err(|e| ServiceError::Internal(format!("Failed to encode private key: {e}")))?;

    let public_key = signing_key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&public_key.as_bytes()[1..]);
    let address = WalletAddress::from_address(Address::from_slice(&hash[12..]));

    Ok((private_key_pem.to_string(), address.into()))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Guardian management and threshold checks.
//!
//! Guardians are EVM addresses attached to a wallet. Only ACTIVE guardians
//! count towards thresholds and may confirm a recovery. Adding, activating
//! and revoking require the wallet owner or an admin.

use chrono::{DateTime, Utc};

use super::notifications::{log_failure, NotificationService};
use super::{ServiceError, ServiceResult};
use crate::audit_log;
use crate::auth::AuthenticatedUser;
use crate::models::WalletAddress;
use crate::storage::{
    guardian_id_for, AuditEventType, DocumentStorage, GuardianRepository, GuardianStatus,
    OwnershipEnforcer, StorageError, StoredGuardian, WalletMetadata, WalletRepository,
};

/// Weight of a guardian added without one.
pub const DEFAULT_GUARDIAN_WEIGHT: u32 = 1;

pub struct GuardianService<'a> {
    storage: &'a DocumentStorage,
}

impl<'a> GuardianService<'a> {
    pub fn new(storage: &'a DocumentStorage) -> Self {
        Self { storage }
    }

    pub fn add_guardian(
        &self,
        actor: &AuthenticatedUser,
        wallet_id: &str,
        address: &str,
        weight: Option<u32>,
    ) -> ServiceResult<StoredGuardian> {
        let wallet = WalletRepository::new(self.storage).get(wallet_id)?;
        wallet.verify_owner_or_admin(actor)?;

        let address =
            WalletAddress::parse(address).map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        let weight = weight.unwrap_or(DEFAULT_GUARDIAN_WEIGHT);
        if weight == 0 {
            return Err(ServiceError::BadRequest(
                "Guardian weight must be at least 1".to_string(),
            ));
        }

        let guardian = StoredGuardian {
            guardian_id: guardian_id_for(wallet_id, address.as_str()),
            wallet_id: wallet_id.to_string(),
            address: address.into(),
            status: GuardianStatus::Pending,
            weight,
            added_at: Utc::now(),
            activated_at: None,
            revoked_at: None,
        };
        match GuardianRepository::new(self.storage).create(&guardian) {
            Ok(()) => {}
            Err(StorageError::AlreadyExists(_)) => {
                return Err(ServiceError::BadRequest("Guardian already exists".to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        audit_log!(
            self.storage,
            AuditEventType::GuardianAdded,
            &actor.user_id,
            "guardian",
            &guardian.guardian_id
        );
        log_failure(
            NotificationService::new(self.storage).create_security_notification(
                &wallet.owner_user_id,
                Some(wallet_id),
                "Guardian added",
                &format!("{} was added as a guardian of your wallet", guardian.address),
            ),
            "guardian added",
        );
        tracing::info!(
            wallet_id,
            guardian_id = %guardian.guardian_id,
            "Guardian added"
        );
        Ok(guardian)
    }

    pub fn activate_guardian(
        &self,
        actor: &AuthenticatedUser,
        guardian_id: &str,
    ) -> ServiceResult<StoredGuardian> {
        self.activate_guardian_at(actor, guardian_id, Utc::now())
    }

    /// Pending → active. Active guardians are returned unchanged; revoked
    /// guardians cannot come back.
    pub fn activate_guardian_at(
        &self,
        actor: &AuthenticatedUser,
        guardian_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<StoredGuardian> {
        let wallet = self.authorize(actor, guardian_id)?;

        let (changed, guardian) =
            GuardianRepository::new(self.storage).modify(guardian_id, |g| match g.status {
                GuardianStatus::Pending => {
                    g.status = GuardianStatus::Active;
                    g.activated_at = Some(now);
                    Ok((true, g.clone()))
                }
                GuardianStatus::Active => Ok((false, g.clone())),
                GuardianStatus::Revoked => Err(ServiceError::BadRequest(
                    "Revoked guardians cannot be re-activated".to_string(),
                )),
            })?;

        if changed {
            audit_log!(
                self.storage,
                AuditEventType::GuardianActivated,
                &actor.user_id,
                "guardian",
                guardian_id
            );
            self.notify_owner(&wallet, "Guardian activated", &format!(
                "{} is now an active guardian of your wallet",
                guardian.address
            ));
        }
        Ok(guardian)
    }

    pub fn revoke_guardian(
        &self,
        actor: &AuthenticatedUser,
        guardian_id: &str,
    ) -> ServiceResult<StoredGuardian> {
        self.revoke_guardian_at(actor, guardian_id, Utc::now())
    }

    /// Pending/active → revoked. Revoking twice is a no-op.
    pub fn revoke_guardian_at(
        &self,
        actor: &AuthenticatedUser,
        guardian_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<StoredGuardian> {
        let wallet = self.authorize(actor, guardian_id)?;

        let (changed, guardian) = GuardianRepository::new(self.storage).modify(guardian_id, |g| {
            if g.status == GuardianStatus::Revoked {
                return Ok::<_, ServiceError>((false, g.clone()));
            }
            g.status = GuardianStatus::Revoked;
            g.revoked_at = Some(now);
            Ok((true, g.clone()))
        })?;

        if changed {
            audit_log!(
                self.storage,
                AuditEventType::GuardianRevoked,
                &actor.user_id,
                "guardian",
                guardian_id
            );
            self.notify_owner(&wallet, "Guardian revoked", &format!(
                "{} is no longer a guardian of your wallet",
                guardian.address
            ));
        }
        Ok(guardian)
    }

    /// All guardians of a wallet, in the order they were added.
    pub fn list_guardians(&self, wallet_id: &str) -> ServiceResult<Vec<StoredGuardian>> {
        if !WalletRepository::new(self.storage).exists(wallet_id) {
            return Err(ServiceError::not_found(format!("Wallet {wallet_id}")));
        }
        Ok(GuardianRepository::new(self.storage).list_by_wallet(wallet_id)?)
    }

    /// Total weight of the wallet's ACTIVE guardians.
    pub fn active_weight(&self, wallet_id: &str) -> ServiceResult<u64> {
        Ok(self
            .list_guardians(wallet_id)?
            .iter()
            .filter(|g| g.is_active())
            .map(|g| u64::from(g.weight))
            .sum())
    }

    /// Whether the ACTIVE guardians' weight reaches `required_weight`.
    pub fn verify_guardian_threshold(&self, wallet_id: &str, required_weight: u64) -> ServiceResult<bool> {
        Ok(self.active_weight(wallet_id)? >= required_weight)
    }

    /// The ACTIVE guardian for `address` on a wallet, if there is one.
    pub fn active_guardian(&self, wallet_id: &str, address: &str) -> ServiceResult<Option<StoredGuardian>> {
        Ok(GuardianRepository::new(self.storage)
            .find(wallet_id, address)?
            .filter(StoredGuardian::is_active))
    }

    /// Load the guardian's wallet and check the actor may manage it.
    fn authorize(&self, actor: &AuthenticatedUser, guardian_id: &str) -> ServiceResult<WalletMetadata> {
        let guardian = GuardianRepository::new(self.storage).get(guardian_id)?;
        let wallet = WalletRepository::new(self.storage).get(&guardian.wallet_id)?;
        if let Err(e) = wallet.verify_owner_or_admin(actor) {
            audit_log!(
                self.storage,
                crate::storage::AuditEvent::new(AuditEventType::PermissionDenied)
                    .with_user(&actor.user_id)
                    .with_resource("guardian", guardian_id)
                    .failed(e.to_string())
            );
            return Err(e.into());
        }
        Ok(wallet)
    }

    fn notify_owner(&self, wallet: &WalletMetadata, title: &str, message: &str) {
        log_failure(
            NotificationService::new(self.storage).create_security_notification(
                &wallet.owner_user_id,
                Some(&wallet.wallet_id),
                title,
                message,
            ),
            title,
        );
    }
}

/// User who receives notifications addressed to a guardian address: the owner
/// of the wallet at that address when the server knows it, else the address.
pub fn guardian_recipient(storage: &DocumentStorage, address: &str) -> String {
    match WalletRepository::new(storage).find_by_address(address) {
        Ok(Some(wallet)) => wallet.owner_user_id,
        Ok(None) => address.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, address, "Guardian wallet lookup failed");
            address.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::storage::{StoragePaths, WalletKind, WalletStatus};
    use tempfile::TempDir;

    const ADDRESSES: [&str; 3] = [
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
        "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
    ];

    fn setup() -> (TempDir, DocumentStorage) {
        let temp = TempDir::new().unwrap();
        let mut storage = DocumentStorage::new(StoragePaths::new(temp.path()));
        storage.initialize().unwrap();
        (temp, storage)
    }

    fn user(id: &str, role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: id.to_string(),
            role,
            session_id: "sess".to_string(),
            expires_at: 0,
        }
    }

    fn create_wallet(storage: &DocumentStorage, wallet_id: &str, owner: &str) {
        let now = Utc::now();
        WalletRepository::new(storage)
            .create(
                &WalletMetadata {
                    wallet_id: wallet_id.to_string(),
                    owner_user_id: owner.to_string(),
                    kind: WalletKind::Mpc {
                        threshold: 1,
                        participants: 1,
                        address: None,
                    },
                    status: WalletStatus::Active,
                    label: None,
                    created_at: now,
                    updated_at: now,
                },
                None,
            )
            .unwrap();
    }

    #[test]
    fn add_guardian_validates_and_deduplicates() {
        let (_temp, storage) = setup();
        create_wallet(&storage, "w1", "owner");
        let service = GuardianService::new(&storage);
        let owner = user("owner", Role::User);

        assert!(matches!(
            service.add_guardian(&owner, "missing", ADDRESSES[0], None),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.add_guardian(&user("other", Role::User), "w1", ADDRESSES[0], None),
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            service.add_guardian(&owner, "w1", "0xnot-an-address", None),
            Err(ServiceError::BadRequest(_))
        ));

        let guardian = service.add_guardian(&owner, "w1", ADDRESSES[0], None).unwrap();
        assert_eq!(guardian.status, GuardianStatus::Pending);
        assert_eq!(guardian.weight, DEFAULT_GUARDIAN_WEIGHT);

        // Same address in another letter case is the same guardian.
        let duplicate = service.add_guardian(&owner, "w1", &ADDRESSES[0].to_lowercase(), None);
        assert!(matches!(duplicate, Err(ServiceError::BadRequest(msg)) if msg == "Guardian already exists"));

        assert_eq!(NotificationService::new(&storage).unread_count("owner").unwrap(), 1);
    }

    #[test]
    fn activation_and_revocation_transitions() {
        let (_temp, storage) = setup();
        create_wallet(&storage, "w1", "owner");
        let service = GuardianService::new(&storage);
        let owner = user("owner", Role::User);
        let g = service.add_guardian(&owner, "w1", ADDRESSES[0], None).unwrap();

        assert!(matches!(
            service.activate_guardian(&user("other", Role::User), &g.guardian_id),
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            service.activate_guardian(&owner, "missing"),
            Err(ServiceError::NotFound(_))
        ));

        let active = service.activate_guardian(&owner, &g.guardian_id).unwrap();
        assert_eq!(active.status, GuardianStatus::Active);
        assert!(active.activated_at.is_some());

        let revoked = service
            .revoke_guardian(&user("admin", Role::Admin), &g.guardian_id)
            .unwrap();
        assert_eq!(revoked.status, GuardianStatus::Revoked);
        assert!(revoked.revoked_at.is_some());
        assert_eq!(
            service.revoke_guardian(&owner, &g.guardian_id).unwrap().revoked_at,
            revoked.revoked_at
        );

        assert!(matches!(
            service.activate_guardian(&owner, &g.guardian_id),
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[test]
    fn threshold_counts_only_active_weight() {
        let (_temp, storage) = setup();
        create_wallet(&storage, "w1", "owner");
        let service = GuardianService::new(&storage);
        let owner = user("owner", Role::User);

        let a = service.add_guardian(&owner, "w1", ADDRESSES[0], Some(2)).unwrap();
        let b = service.add_guardian(&owner, "w1", ADDRESSES[1], None).unwrap();
        service.add_guardian(&owner, "w1", ADDRESSES[2], Some(5)).unwrap();

        assert!(service.verify_guardian_threshold("w1", 0).unwrap());
        assert!(!service.verify_guardian_threshold("w1", 1).unwrap());

        service.activate_guardian(&owner, &a.guardian_id).unwrap();
        service.activate_guardian(&owner, &b.guardian_id).unwrap();
        assert_eq!(service.active_weight("w1").unwrap(), 3);
        assert!(service.verify_guardian_threshold("w1", 3).unwrap());
        assert!(!service.verify_guardian_threshold("w1", 4).unwrap());

        service.revoke_guardian(&owner, &a.guardian_id).unwrap();
        assert!(!service.verify_guardian_threshold("w1", 2).unwrap());
        assert!(service.active_guardian("w1", ADDRESSES[0]).unwrap().is_none());
        assert!(service.active_guardian("w1", &ADDRESSES[1].to_lowercase()).unwrap().is_some());
    }

    #[test]
    fn guardian_recipient_falls_back_to_address() {
        let (_temp, storage) = setup();
        assert_eq!(guardian_recipient(&storage, ADDRESSES[0]), ADDRESSES[0]);
    }
}

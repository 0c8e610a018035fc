// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Guardian repository.
//!
//! A guardian's id is a UUID v5 of `(wallet_id, lowercase address)` and the
//! record is written with create-new semantics, so the same address can be
//! registered only once per wallet even under concurrent requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::super::{DocumentStorage, StorageError, StorageResult};

/// Namespace for deterministic guardian ids.
const GUARDIAN_NAMESPACE: Uuid = Uuid::from_u128(0x5c1f_0e2a_8b3d_4f6e_9a71_c2d4_e6f8_0a13);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GuardianStatus {
    /// Added by the owner, not yet counted
    Pending,
    /// Counts towards thresholds and may confirm recoveries
    Active,
    /// Permanently removed
    Revoked,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct StoredGuardian {
    pub guardian_id: String,
    pub wallet_id: String,
    /// EVM address of the guardian (checksummed)
    pub address: String,
    pub status: GuardianStatus,
    /// Voting weight; records without one count as 1
    #[serde(default = "default_weight")]
    pub weight: u32,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl StoredGuardian {
    pub fn is_active(&self) -> bool {
        self.status == GuardianStatus::Active
    }
}

/// Deterministic guardian id for a wallet and address.
pub fn guardian_id_for(wallet_id: &str, address: &str) -> String {
    let name = format!("{wallet_id}:{}", address.to_ascii_lowercase());
    Uuid::new_v5(&GUARDIAN_NAMESPACE, name.as_bytes()).to_string()
}

pub struct GuardianRepository<'a> {
    storage: &'a DocumentStorage,
}

impl<'a> GuardianRepository<'a> {
    pub fn new(storage: &'a DocumentStorage) -> Self {
        Self { storage }
    }

    pub fn get(&self, guardian_id: &str) -> StorageResult<StoredGuardian> {
        let path = self.storage.paths().guardian(guardian_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!("Guardian {guardian_id}")));
        }
        self.storage.read_json(path)
    }

    /// Create a guardian; `AlreadyExists` if the (wallet, address) pair is taken.
    pub fn create(&self, guardian: &StoredGuardian) -> StorageResult<()> {
        self.storage
            .create_json(self.storage.paths().guardian(&guardian.guardian_id), guardian)
    }

    pub fn modify<R, E, F>(&self, guardian_id: &str, f: F) -> Result<R, E>
    where
        E: From<StorageError>,
        F: FnOnce(&mut StoredGuardian) -> Result<R, E>,
    {
        let path = self.storage.paths().guardian(guardian_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!("Guardian {guardian_id}")).into());
        }
        self.storage.modify_json(path, f)
    }

    /// All guardians of a wallet in insertion order.
    pub fn list_by_wallet(&self, wallet_id: &str) -> StorageResult<Vec<StoredGuardian>> {
        let mut guardians: Vec<StoredGuardian> = self
            .storage
            .read_all::<StoredGuardian>(self.storage.paths().guardians_dir())?
            .into_iter()
            .filter(|g| g.wallet_id == wallet_id)
            .collect();
        guardians.sort_by(|a, b| a.added_at.cmp(&b.added_at));
        Ok(guardians)
    }

    /// The guardian record for an address on a wallet, if any.
    pub fn find(&self, wallet_id: &str, address: &str) -> StorageResult<Option<StoredGuardian>> {
        match self.get(&guardian_id_for(wallet_id, address)) {
            Ok(guardian) => Ok(Some(guardian)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DocumentStorage) {
        let temp = TempDir::new().unwrap();
        let mut storage = DocumentStorage::new(StoragePaths::new(temp.path()));
        storage.initialize().unwrap();
        (temp, storage)
    }

    fn guardian(wallet_id: &str, address: &str) -> StoredGuardian {
        StoredGuardian {
            guardian_id: guardian_id_for(wallet_id, address),
            wallet_id: wallet_id.to_string(),
            address: address.to_string(),
            status: GuardianStatus::Pending,
            weight: 1,
            added_at: Utc::now(),
            activated_at: None,
            revoked_at: None,
        }
    }

    #[test]
    fn guardian_id_is_deterministic_and_case_insensitive() {
        let a = guardian_id_for("w1", "0xABCDEF0000000000000000000000000000000001");
        let b = guardian_id_for("w1", "0xabcdef0000000000000000000000000000000001");
        let c = guardian_id_for("w2", "0xabcdef0000000000000000000000000000000001");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn duplicate_address_is_rejected_by_storage() {
        let (_temp, storage) = setup();
        let repo = GuardianRepository::new(&storage);

        repo.create(&guardian("w1", "0xAA")).unwrap();
        let result = repo.create(&guardian("w1", "0xaa"));
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));

        // Same address on another wallet is fine
        repo.create(&guardian("w2", "0xAA")).unwrap();
        assert_eq!(repo.list_by_wallet("w1").unwrap().len(), 1);
        assert!(repo.find("w2", "0xaa").unwrap().is_some());
        assert!(repo.find("w3", "0xaa").unwrap().is_none());
    }

    #[test]
    fn missing_weight_defaults_to_one() {
        let json = serde_json::json!({
            "guardian_id": "g1",
            "wallet_id": "w1",
            "address": "0xAA",
            "status": "active",
            "added_at": "2026-01-01T00:00:00Z"
        });
        let guardian: StoredGuardian = serde_json::from_value(json).unwrap();
        assert_eq!(guardian.weight, 1);
        assert!(guardian.is_active());
    }
}

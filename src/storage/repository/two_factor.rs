// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Two-factor authentication records, one per user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::{DocumentStorage, StorageError, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TwoFactorMethod {
    /// Time-based one-time passwords from an authenticator app
    Authenticator,
    /// Six-digit codes delivered by SMS
    Sms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TwoFactorStatus {
    /// Set up but not yet confirmed with a valid code
    Pending,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredTwoFactor {
    pub user_id: String,
    pub method: TwoFactorMethod,
    pub status: TwoFactorStatus,
    /// Base32 TOTP secret (authenticator only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// E.164 phone number (SMS only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// HMAC of the outstanding SMS code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_expires_at: Option<DateTime<Utc>>,
    /// Last TOTP time step accepted; earlier or equal steps are replays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_step: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredTwoFactor {
    pub fn is_enabled(&self) -> bool {
        self.status == TwoFactorStatus::Enabled
    }
}

pub struct TwoFactorRepository<'a> {
    storage: &'a DocumentStorage,
}

impl<'a> TwoFactorRepository<'a> {
    pub fn new(storage: &'a DocumentStorage) -> Self {
        Self { storage }
    }

    /// The user's record, if one was ever set up.
    pub fn find(&self, user_id: &str) -> StorageResult<Option<StoredTwoFactor>> {
        let path = self.storage.paths().two_factor(user_id);
        if !self.storage.exists(&path) {
            return Ok(None);
        }
        self.storage.read_json(path).map(Some)
    }

    /// Replace the user's record (a new setup overwrites the old one).
    pub fn save(&self, record: &StoredTwoFactor) -> StorageResult<()> {
        self.storage
            .write_json(self.storage.paths().two_factor(&record.user_id), record)
    }

    pub fn modify<R, E, F>(&self, user_id: &str, f: F) -> Result<R, E>
    where
        E: From<StorageError>,
        F: FnOnce(&mut StoredTwoFactor) -> Result<R, E>,
    {
        let path = self.storage.paths().two_factor(user_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!("Two-factor record for {user_id}")).into());
        }
        self.storage
            .modify_json(path, |record: &mut StoredTwoFactor| {
                let result = f(record)?;
                record.updated_at = Utc::now();
                Ok(result)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;
    use tempfile::TempDir;

    #[test]
    fn save_find_and_modify() {
        let temp = TempDir::new().unwrap();
        let mut storage = DocumentStorage::new(StoragePaths::new(temp.path()));
        storage.initialize().unwrap();
        let repo = TwoFactorRepository::new(&storage);

        assert!(repo.find("u1").unwrap().is_none());

        let now = Utc::now();
        repo.save(&StoredTwoFactor {
            user_id: "u1".to_string(),
            method: TwoFactorMethod::Authenticator,
            status: TwoFactorStatus::Pending,
            secret: Some("JBSWY3DPEHPK3PXP".to_string()),
            phone_number: None,
            code_hash: None,
            code_expires_at: None,
            last_used_step: None,
            created_at: now,
            updated_at: now,
        })
        .unwrap();

        repo.modify::<_, StorageError, _>("u1", |r| {
            r.status = TwoFactorStatus::Enabled;
            Ok(())
        })
        .unwrap();

        let loaded = repo.find("u1").unwrap().unwrap();
        assert!(loaded.is_enabled());
        assert!(matches!(
            repo.modify::<(), StorageError, _>("u2", |_| Ok(())),
            Err(StorageError::NotFound(_))
        ));
    }
}

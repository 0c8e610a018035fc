// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet recovery repository.
//!
//! State changes go through [`RecoveryRepository::modify`], which holds the
//! storage write lock for the whole read-check-write cycle. The "one active
//! recovery per wallet" rule lives in the index database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::{DocumentStorage, StorageError, StorageResult};

/// Recovery lifecycle.
///
/// `Initiated → Confirmed → Executed`, and `Initiated | Confirmed → Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    Initiated,
    Confirmed,
    Executed,
    Expired,
}

impl RecoveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecoveryStatus::Executed | RecoveryStatus::Expired)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct StoredRecovery {
    /// Opaque random token (base64url)
    pub recovery_id: String,
    pub wallet_id: String,
    /// User who started the recovery
    pub initiated_by: String,
    /// User id the wallet is handed to on execution
    pub new_owner: String,
    /// Owner at initiation time
    pub previous_owner: String,
    /// Guardian addresses that confirmed, in confirmation order, no duplicates
    pub guardian_confirmations: Vec<String>,
    pub confirmation_count: u32,
    pub required_confirmations: u32,
    /// Seconds between initiation and the earliest execution
    pub recovery_delay: u64,
    pub status: RecoveryStatus,
    pub initiated_at: DateTime<Utc>,
    /// Earliest instant the recovery may be executed
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl StoredRecovery {
    /// Whether `address` already confirmed (case-insensitive).
    pub fn has_confirmation_from(&self, address: &str) -> bool {
        self.guardian_confirmations
            .iter()
            .any(|a| a.eq_ignore_ascii_case(address))
    }
}

pub struct RecoveryRepository<'a> {
    storage: &'a DocumentStorage,
}

impl<'a> RecoveryRepository<'a> {
    pub fn new(storage: &'a DocumentStorage) -> Self {
        Self { storage }
    }

    pub fn get(&self, recovery_id: &str) -> StorageResult<StoredRecovery> {
        let path = self.storage.paths().recovery(recovery_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!("Recovery {recovery_id}")));
        }
        self.storage.read_json(path)
    }

    pub fn create(&self, recovery: &StoredRecovery) -> StorageResult<()> {
        self.storage
            .create_json(self.storage.paths().recovery(&recovery.recovery_id), recovery)
    }

    pub fn modify<R, E, F>(&self, recovery_id: &str, f: F) -> Result<R, E>
    where
        E: From<StorageError>,
        F: FnOnce(&mut StoredRecovery) -> Result<R, E>,
    {
        let path = self.storage.paths().recovery(recovery_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!("Recovery {recovery_id}")).into());
        }
        self.storage.modify_json(path, f)
    }

    /// Recoveries of a wallet, newest first.
    pub fn list_by_wallet(&self, wallet_id: &str) -> StorageResult<Vec<StoredRecovery>> {
        let mut recoveries: Vec<StoredRecovery> = self
            .list_all()?
            .into_iter()
            .filter(|r| r.wallet_id == wallet_id)
            .collect();
        recoveries.sort_by(|a, b| b.initiated_at.cmp(&a.initiated_at));
        Ok(recoveries)
    }

    /// Recoveries that are still initiated or confirmed.
    pub fn list_open(&self) -> StorageResult<Vec<StoredRecovery>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .collect())
    }

    fn list_all(&self) -> StorageResult<Vec<StoredRecovery>> {
        self.storage.read_all(self.storage.paths().recoveries_dir())
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded index database backed by redb (pure Rust, ACID).
//!
//! Holds the lookups that must be checked and written in one step. redb
//! serializes write transactions, so a check followed by an insert inside a
//! single write transaction cannot interleave with another writer.
//!
//! ## Table Layout
//!
//! - `email_index`: normalized email → user_id
//! - `login_attempts`: composite key (user_id|timestamp_ms_be|attempt_id) → success flag
//! - `active_recoveries`: wallet_id → recovery_id of the in-flight recovery
//! - `oauth_accounts`: `provider:provider_user_id` → serialized OAuthAccount

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// Table Definitions
// =============================================================================

const EMAIL_INDEX: TableDefinition<&str, &str> = TableDefinition::new("email_index");

/// Key format: `user_id|timestamp_ms_be|attempt_id`, ascending in time per user.
const LOGIN_ATTEMPTS: TableDefinition<&[u8], u8> = TableDefinition::new("login_attempts");

const ACTIVE_RECOVERIES: TableDefinition<&str, &str> = TableDefinition::new("active_recoveries");

const OAUTH_ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("oauth_accounts");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// Outcome of an atomic claim on a unique key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The key was free and now belongs to the caller.
    Claimed,
    /// The key is already held; carries the current holder.
    Held(String),
}

/// Link between an external OAuth identity and a local user.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct OAuthAccount {
    /// Provider name (`google`, `github`).
    pub provider: String,
    /// Subject identifier at the provider.
    pub provider_user_id: String,
    /// Local user the identity is linked to.
    pub user_id: String,
    /// Email reported by the provider, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub linked_at: DateTime<Utc>,
}

// =============================================================================
// Key Helpers
// =============================================================================

fn attempt_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(user_id.len() + 1);
    prefix.extend_from_slice(user_id.as_bytes());
    prefix.push(b'|');
    prefix
}

fn attempt_key(user_id: &str, at: DateTime<Utc>, attempt_id: &str) -> Vec<u8> {
    let mut key = attempt_prefix(user_id);
    key.extend_from_slice(&timestamp_bytes(at));
    key.push(b'|');
    key.extend_from_slice(attempt_id.as_bytes());
    key
}

/// Millisecond timestamp clamped at zero, big-endian so keys sort by time.
fn timestamp_bytes(at: DateTime<Utc>) -> [u8; 8] {
    (at.timestamp_millis().max(0) as u64).to_be_bytes()
}

fn oauth_key(provider: &str, provider_user_id: &str) -> String {
    format!("{provider}:{provider_user_id}")
}

// =============================================================================
// IndexDatabase
// =============================================================================

/// Embedded ACID index database.
pub struct IndexDatabase {
    db: Database,
}

impl IndexDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> IndexResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(EMAIL_INDEX)?;
            let _ = write_txn.open_table(LOGIN_ATTEMPTS)?;
            let _ = write_txn.open_table(ACTIVE_RECOVERIES)?;
            let _ = write_txn.open_table(OAUTH_ACCOUNTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Open a read transaction on every table.
    pub fn health_check(&self) -> IndexResult<()> {
        let read_txn = self.db.begin_read()?;
        read_txn.open_table(EMAIL_INDEX)?;
        read_txn.open_table(LOGIN_ATTEMPTS)?;
        read_txn.open_table(ACTIVE_RECOVERIES)?;
        read_txn.open_table(OAUTH_ACCOUNTS)?;
        Ok(())
    }

    // =========================================================================
    // Email index
    // =========================================================================

    /// Claim a normalized email for a user.
    pub fn claim_email(&self, email: &str, user_id: &str) -> IndexResult<Claim> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EMAIL_INDEX)?;
            if let Some(holder) = table.get(email)? {
                return Ok(Claim::Held(holder.value().to_string()));
            }
            table.insert(email, user_id)?;
        }
        write_txn.commit()?;
        Ok(Claim::Claimed)
    }

    /// Look up the user registered under a normalized email.
    pub fn user_for_email(&self, email: &str) -> IndexResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EMAIL_INDEX)?;
        Ok(table.get(email)?.map(|v| v.value().to_string()))
    }

    /// Drop an email claim (used to roll back a failed registration).
    pub fn release_email(&self, email: &str) -> IndexResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EMAIL_INDEX)?;
            table.remove(email)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // Login attempts
    // =========================================================================

    /// Record a login attempt for a user.
    pub fn record_login_attempt(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
        success: bool,
    ) -> IndexResult<()> {
        let attempt_id = uuid::Uuid::new_v4().to_string();
        let key = attempt_key(user_id, at, &attempt_id);

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LOGIN_ATTEMPTS)?;
            table.insert(key.as_slice(), u8::from(success))?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Count failed login attempts for a user at or after `since`.
    pub fn count_failures_since(&self, user_id: &str, since: DateTime<Utc>) -> IndexResult<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOGIN_ATTEMPTS)?;

        let mut start = attempt_prefix(user_id);
        start.extend_from_slice(&timestamp_bytes(since));
        let mut end = attempt_prefix(user_id);
        end.extend_from_slice(&[0xFF; 9]);

        let mut failures = 0;
        for entry in table.range(start.as_slice()..end.as_slice())? {
            let (_, success) = entry?;
            if success.value() == 0 {
                failures += 1;
            }
        }
        Ok(failures)
    }

    /// Drop a user's attempts recorded before `before`. Returns how many were removed.
    pub fn prune_login_attempts(&self, user_id: &str, before: DateTime<Utc>) -> IndexResult<usize> {
        let start = attempt_prefix(user_id);
        let mut end = attempt_prefix(user_id);
        end.extend_from_slice(&timestamp_bytes(before));

        let write_txn = self.db.begin_write()?;
        let pruned = {
            let mut table = write_txn.open_table(LOGIN_ATTEMPTS)?;
            let stale = table
                .range(start.as_slice()..end.as_slice())?
                .map(|entry| entry.map(|(key, _)| key.value().to_vec()))
                .collect::<Result<Vec<_>, _>>()?;
            for key in &stale {
                table.remove(key.as_slice())?;
            }
            stale.len()
        };
        write_txn.commit()?;
        Ok(pruned)
    }

    // =========================================================================
    // Active recoveries
    // =========================================================================

    /// Claim the single in-flight recovery slot of a wallet.
    pub fn claim_active_recovery(&self, wallet_id: &str, recovery_id: &str) -> IndexResult<Claim> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACTIVE_RECOVERIES)?;
            if let Some(holder) = table.get(wallet_id)? {
                return Ok(Claim::Held(holder.value().to_string()));
            }
            table.insert(wallet_id, recovery_id)?;
        }
        write_txn.commit()?;
        Ok(Claim::Claimed)
    }

    /// The recovery currently holding a wallet's slot, if any.
    pub fn active_recovery_for(&self, wallet_id: &str) -> IndexResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACTIVE_RECOVERIES)?;
        Ok(table.get(wallet_id)?.map(|v| v.value().to_string()))
    }

    /// Release a wallet's slot if it is still held by `recovery_id`.
    pub fn release_active_recovery(&self, wallet_id: &str, recovery_id: &str) -> IndexResult<bool> {
        let write_txn = self.db.begin_write()?;
        let released = {
            let mut table = write_txn.open_table(ACTIVE_RECOVERIES)?;
            let held_by_caller = table
                .get(wallet_id)?
                .is_some_and(|holder| holder.value() == recovery_id);
            if held_by_caller {
                table.remove(wallet_id)?;
            }
            held_by_caller
        };
        write_txn.commit()?;
        Ok(released)
    }

    // =========================================================================
    // OAuth accounts
    // =========================================================================

    /// Link an OAuth identity to a user unless it is already linked.
    ///
    /// Returns the account that is linked after the call.
    pub fn link_oauth_account(&self, account: &OAuthAccount) -> IndexResult<OAuthAccount> {
        let key = oauth_key(&account.provider, &account.provider_user_id);

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(OAUTH_ACCOUNTS)?;
            if let Some(existing) = table.get(key.as_str())? {
                let linked: OAuthAccount = serde_json::from_slice(existing.value())?;
                return Ok(linked);
            }
            let json = serde_json::to_vec(account)?;
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(account.clone())
    }

    /// Find the local account linked to an OAuth identity.
    pub fn oauth_account(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> IndexResult<Option<OAuthAccount>> {
        let key = oauth_key(provider, provider_user_id);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OAUTH_ACCOUNTS)?;
        match table.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_db() -> (TempDir, IndexDatabase) {
        let temp = TempDir::new().unwrap();
        let db = IndexDatabase::open(&temp.path().join("index.redb")).unwrap();
        (temp, db)
    }

    #[test]
    fn email_claim_is_exclusive() {
        let (_temp, db) = open_db();

        assert_eq!(db.claim_email("a@example.com", "u1").unwrap(), Claim::Claimed);
        assert_eq!(
            db.claim_email("a@example.com", "u2").unwrap(),
            Claim::Held("u1".to_string())
        );
        assert_eq!(
            db.user_for_email("a@example.com").unwrap().as_deref(),
            Some("u1")
        );

        db.release_email("a@example.com").unwrap();
        assert!(db.user_for_email("a@example.com").unwrap().is_none());
    }

    #[test]
    fn failures_are_counted_inside_window_only() {
        let (_temp, db) = open_db();
        let now = Utc::now();

        db.record_login_attempt("u1", now - Duration::minutes(30), false)
            .unwrap();
        db.record_login_attempt("u1", now - Duration::minutes(5), false)
            .unwrap();
        db.record_login_attempt("u1", now - Duration::minutes(4), true)
            .unwrap();
        db.record_login_attempt("u1", now, false).unwrap();
        db.record_login_attempt("u2", now, false).unwrap();

        let failures = db
            .count_failures_since("u1", now - Duration::minutes(15))
            .unwrap();
        assert_eq!(failures, 2);
    }

    #[test]
    fn pruning_drops_only_old_attempts_of_one_user() {
        let (_temp, db) = open_db();
        let now = Utc::now();

        db.record_login_attempt("u1", now - Duration::minutes(40), false)
            .unwrap();
        db.record_login_attempt("u1", now - Duration::minutes(20), true)
            .unwrap();
        db.record_login_attempt("u1", now - Duration::minutes(1), false)
            .unwrap();
        db.record_login_attempt("u2", now - Duration::minutes(40), false)
            .unwrap();

        let pruned = db
            .prune_login_attempts("u1", now - Duration::minutes(15))
            .unwrap();
        assert_eq!(pruned, 2);
        assert_eq!(
            db.count_failures_since("u1", now - Duration::days(1)).unwrap(),
            1
        );
        assert_eq!(
            db.count_failures_since("u2", now - Duration::days(1)).unwrap(),
            1
        );
        assert_eq!(
            db.prune_login_attempts("u1", now - Duration::minutes(15))
                .unwrap(),
            0
        );
    }

    #[test]
    fn active_recovery_slot_holds_one_recovery() {
        let (_temp, db) = open_db();

        assert_eq!(db.claim_active_recovery("w1", "r1").unwrap(), Claim::Claimed);
        assert_eq!(
            db.claim_active_recovery("w1", "r2").unwrap(),
            Claim::Held("r1".to_string())
        );

        // Only the holder can release
        assert!(!db.release_active_recovery("w1", "r2").unwrap());
        assert!(db.release_active_recovery("w1", "r1").unwrap());
        assert!(db.active_recovery_for("w1").unwrap().is_none());

        assert_eq!(db.claim_active_recovery("w1", "r2").unwrap(), Claim::Claimed);
    }

    #[test]
    fn oauth_link_keeps_first_owner() {
        let (_temp, db) = open_db();
        let account = OAuthAccount {
            provider: "github".to_string(),
            provider_user_id: "42".to_string(),
            user_id: "u1".to_string(),
            email: None,
            linked_at: Utc::now(),
        };

        let linked = db.link_oauth_account(&account).unwrap();
        assert_eq!(linked.user_id, "u1");

        let mut other = account.clone();
        other.user_id = "u2".to_string();
        let linked = db.link_oauth_account(&other).unwrap();
        assert_eq!(linked.user_id, "u1");

        let found = db.oauth_account("github", "42").unwrap().unwrap();
        assert_eq!(found.user_id, "u1");
        assert!(db.oauth_account("google", "42").unwrap().is_none());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the document storage layout.

use std::path::{Path, PathBuf};

/// Base directory for all persistent storage.
pub const DATA_ROOT: &str = "/data";

/// File name of the embedded index database inside the data root.
pub const INDEX_DB_FILE: &str = "index.redb";

/// Storage path utilities for the document store.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the redb index database.
    pub fn index_db(&self) -> PathBuf {
        self.root.join(INDEX_DB_FILE)
    }

    // ========== User Paths ==========

    pub fn users_dir(&self) -> PathBuf {
        self.root.join("users")
    }

    pub fn user(&self, user_id: &str) -> PathBuf {
        self.users_dir().join(format!("{user_id}.json"))
    }

    // ========== Session Paths ==========

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn session(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{session_id}.json"))
    }

    // ========== Two-Factor Paths ==========

    pub fn two_factor_dir(&self) -> PathBuf {
        self.root.join("two_factor")
    }

    /// Two-factor records are keyed by user (one per user).
    pub fn two_factor(&self, user_id: &str) -> PathBuf {
        self.two_factor_dir().join(format!("{user_id}.json"))
    }

    // ========== Wallet Paths ==========

    /// Directory containing all wallets.
    pub fn wallets_dir(&self) -> PathBuf {
        self.root.join("wallets")
    }

    /// Directory for a specific wallet.
    pub fn wallet_dir(&self, wallet_id: &str) -> PathBuf {
        self.wallets_dir().join(wallet_id)
    }

    /// Path to wallet metadata file.
    pub fn wallet_meta(&self, wallet_id: &str) -> PathBuf {
        self.wallet_dir(wallet_id).join("meta.json")
    }

    /// Path to the private key of a custodial wallet.
    pub fn wallet_key(&self, wallet_id: &str) -> PathBuf {
        self.wallet_dir(wallet_id).join("key.pem")
    }

    // ========== Guardian Paths ==========

    pub fn guardians_dir(&self) -> PathBuf {
        self.root.join("guardians")
    }

    pub fn guardian(&self, guardian_id: &str) -> PathBuf {
        self.guardians_dir().join(format!("{guardian_id}.json"))
    }

    // ========== Recovery Paths ==========

    pub fn recoveries_dir(&self) -> PathBuf {
        self.root.join("recoveries")
    }

    pub fn recovery(&self, recovery_id: &str) -> PathBuf {
        self.recoveries_dir().join(format!("{recovery_id}.json"))
    }

    // ========== Notification Paths ==========

    pub fn notifications_dir(&self) -> PathBuf {
        self.root.join("notifications")
    }

    pub fn notification(&self, notification_id: &str) -> PathBuf {
        self.notifications_dir()
            .join(format!("{notification_id}.json"))
    }

    // ========== Audit Log Paths ==========

    /// Directory containing audit logs.
    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    /// Directory for a specific date's audit logs.
    pub fn audit_date_dir(&self, date: &str) -> PathBuf {
        self.audit_dir().join(date)
    }

    /// Path to a daily audit events file (JSONL format).
    pub fn audit_events_file(&self, date: &str) -> PathBuf {
        self.audit_date_dir(date).join("events.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_data_root() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("/data"));
        assert_eq!(paths.index_db(), PathBuf::from("/data/index.redb"));
    }

    #[test]
    fn wallet_paths_are_correct() {
        let paths = StoragePaths::new("/tmp/test-data");
        assert_eq!(
            paths.wallet_meta("w1"),
            PathBuf::from("/tmp/test-data/wallets/w1/meta.json")
        );
        assert_eq!(
            paths.wallet_key("w1"),
            PathBuf::from("/tmp/test-data/wallets/w1/key.pem")
        );
    }

    #[test]
    fn record_paths_are_flat_json_files() {
        let paths = StoragePaths::default();
        assert_eq!(paths.user("u1"), PathBuf::from("/data/users/u1.json"));
        assert_eq!(
            paths.session("s1"),
            PathBuf::from("/data/sessions/s1.json")
        );
        assert_eq!(
            paths.two_factor("u1"),
            PathBuf::from("/data/two_factor/u1.json")
        );
        assert_eq!(
            paths.guardian("g1"),
            PathBuf::from("/data/guardians/g1.json")
        );
        assert_eq!(
            paths.recovery("r1"),
            PathBuf::from("/data/recoveries/r1.json")
        );
        assert_eq!(
            paths.notification("n1"),
            PathBuf::from("/data/notifications/n1.json")
        );
    }

    #[test]
    fn audit_paths_are_correct() {
        let paths = StoragePaths::default();
        assert_eq!(paths.audit_dir(), PathBuf::from("/data/audit"));
        assert_eq!(
            paths.audit_events_file("2026-01-01"),
            PathBuf::from("/data/audit/2026-01-01/events.jsonl")
        );
    }
}

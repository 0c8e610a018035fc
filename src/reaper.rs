// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Recovery Reaper
//!
//! Background task that expires recoveries left open past their execution
//! window. Execute and confirm also expire such recoveries lazily; the reaper
//! makes sure the wallet's recovery slot is released even when nobody comes
//! back to a recovery.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`; the loop exits between sweeps.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::services::RecoveryService;
use crate::storage::{DocumentStorage, IndexDatabase};

pub struct RecoveryReaper {
    storage: Arc<DocumentStorage>,
    index: Arc<IndexDatabase>,
    execution_window: chrono::Duration,
    sweep_interval: Duration,
}

impl RecoveryReaper {
    pub fn new(
        storage: Arc<DocumentStorage>,
        index: Arc<IndexDatabase>,
        execution_window: chrono::Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            storage,
            index,
            execution_window,
            sweep_interval,
        }
    }

    /// Run sweeps until the token is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(reaper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            "Recovery reaper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {},
                _ = shutdown.cancelled() => break,
            }
        }
        info!("Recovery reaper shutting down");
    }

    /// One sweep; returns how many recoveries were expired.
    pub async fn sweep(&self) -> usize {
        let storage = Arc::clone(&self.storage);
        let index = Arc::clone(&self.index);
        let window = self.execution_window;

        let result = tokio::task::spawn_blocking(move || {
            RecoveryService::new(&storage, &index, window).expire_stale(Utc::now())
        })
        .await;

        match result {
            Ok(Ok(expired)) => {
                if !expired.is_empty() {
                    info!(count = expired.len(), "Expired stale recoveries");
                }
                expired.len()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Recovery sweep failed");
                0
            }
            Err(e) => {
                warn!(error = %e, "Recovery sweep task panicked");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthenticatedUser, Role};
    use crate::services::recovery::InitiateRecoveryRequest;
    use crate::services::wallets::{WalletKindRequest, WalletService};
    use crate::storage::{RecoveryRepository, RecoveryStatus, StoragePaths};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<DocumentStorage>, Arc<IndexDatabase>) {
        let temp = TempDir::new().unwrap();
        let mut storage = DocumentStorage::new(StoragePaths::new(temp.path()));
        storage.initialize().unwrap();
        let index = IndexDatabase::open(&storage.paths().index_db()).unwrap();
        (temp, Arc::new(storage), Arc::new(index))
    }

    fn user(id: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: id.to_string(),
            role: Role::User,
            session_id: "s".to_string(),
            expires_at: 0,
        }
    }

    #[tokio::test]
    async fn sweep_expires_recoveries_past_the_window() {
        let (_temp, storage, index) = setup();
        let wallet = WalletService::new(&storage)
            .create_wallet(&user("alice"), WalletKindRequest::Custodial, None)
            .unwrap();
        let recovery = RecoveryService::new(&storage, &index, chrono::Duration::seconds(1))
            .initiate_recovery_at(
                &user("bob"),
                &wallet.wallet_id,
                InitiateRecoveryRequest {
                    new_owner: "bob".to_string(),
                    required_confirmations: 1,
                    recovery_delay: 0,
                },
                Utc::now() - chrono::Duration::minutes(5),
            )
            .unwrap();

        let reaper = RecoveryReaper::new(
            Arc::clone(&storage),
            Arc::clone(&index),
            chrono::Duration::seconds(1),
            Duration::from_secs(60),
        );
        assert_eq!(reaper.sweep().await, 1);
        assert_eq!(reaper.sweep().await, 0);

        let stored = RecoveryRepository::new(&storage).get(&recovery.recovery_id).unwrap();
        assert_eq!(stored.status, RecoveryStatus::Expired);
        assert_eq!(index.active_recovery_for(&wallet.wallet_id).unwrap(), None);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let (_temp, storage, index) = setup();
        let reaper = RecoveryReaper::new(storage, index, chrono::Duration::days(7), Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(reaper.run(shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reaper stops")
            .unwrap();
    }
}

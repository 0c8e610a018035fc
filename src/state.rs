// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::{AuthError, TokenManager};
use crate::config::AppConfig;
use crate::services::oauth::{HttpOAuthClient, OAuthStateCache};
use crate::services::two_factor::{LoggingSmsSender, SmsSender};
use crate::storage::{DocumentStorage, IndexDatabase, IndexError, StorageError, StoragePaths};

/// Failure while assembling the application state at startup.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("storage initialization failed: {0}")]
    Storage(#[from] StorageError),
    #[error("index database failed to open: {0}")]
    Index(#[from] IndexError),
    #[error("token manager setup failed: {0}")]
    Auth(#[from] AuthError),
}

/// Shared handles available to every request.
#[derive(Clone)]
pub struct AppState {
    storage: Arc<DocumentStorage>,
    index: Arc<IndexDatabase>,
    tokens: Arc<TokenManager>,
    config: Arc<AppConfig>,
    oauth_states: Arc<OAuthStateCache>,
    oauth_client: HttpOAuthClient,
    sms_sender: Arc<dyn SmsSender>,
}

impl AppState {
    /// Initialize storage and the index database under `config.data_dir`.
    pub fn new(config: AppConfig) -> Result<Self, StateError> {
        let mut storage = DocumentStorage::new(StoragePaths::new(&config.data_dir));
        storage.initialize()?;
        let index = IndexDatabase::open(&storage.paths().index_db())?;
        let tokens = TokenManager::new(
            config.jwt_secret.as_bytes(),
            config.jwt_issuer.clone(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        )?;

        Ok(Self {
            storage: Arc::new(storage),
            index: Arc::new(index),
            tokens: Arc::new(tokens),
            config: Arc::new(config),
            oauth_states: Arc::new(OAuthStateCache::default()),
            oauth_client: HttpOAuthClient::new(),
            sms_sender: Arc::new(LoggingSmsSender),
        })
    }

    /// Replace the SMS delivery backend.
    pub fn with_sms_sender(mut self, sender: Arc<dyn SmsSender>) -> Self {
        self.sms_sender = sender;
        self
    }

    pub fn storage(&self) -> &DocumentStorage {
        &self.storage
    }

    /// Shared handle for background tasks.
    pub fn storage_handle(&self) -> Arc<DocumentStorage> {
        Arc::clone(&self.storage)
    }

    pub fn index(&self) -> &IndexDatabase {
        &self.index
    }

    pub fn index_handle(&self) -> Arc<IndexDatabase> {
        Arc::clone(&self.index)
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn oauth_states(&self) -> &OAuthStateCache {
        &self.oauth_states
    }

    pub fn oauth_client(&self) -> &HttpOAuthClient {
        &self.oauth_client
    }

    pub fn sms_sender(&self) -> &dyn SmsSender {
        self.sms_sender.as_ref()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// State rooted in a fresh temp dir. Keep the `TempDir` alive for the test.
    pub fn test_state() -> (AppState, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let vars: HashMap<&str, String> = HashMap::from([
            ("DATA_DIR", temp_dir.path().display().to_string()),
            ("JWT_SECRET", "test-secret-that-is-at-least-32-bytes!".to_string()),
            ("COOKIE_SECURE", "false".to_string()),
        ]);
        let config = AppConfig::from_lookup(|name| vars.get(name).cloned())
            .expect("test config is valid");
        let state = AppState::new(config).expect("test state initializes");
        (state, temp_dir)
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User repository.
//!
//! Users are stored as `/data/users/{user_id}.json`. Email uniqueness is
//! owned by the index database, not by this repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::{DocumentStorage, StorageError, StorageResult};
use crate::auth::Role;

/// User record as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredUser {
    pub user_id: String,
    /// Normalized email (NFKC, trimmed, lowercase).
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    /// Encoded password hash. `None` for accounts created through OAuth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Login is refused until this instant after repeated failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredUser {
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }
}

/// Public view of a user (never includes the password hash).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    /// Whether the account can log in with a password.
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StoredUser> for UserResponse {
    fn from(user: StoredUser) -> Self {
        Self {
            has_password: user.password_hash.is_some(),
            user_id: user.user_id,
            email: user.email,
            name: user.name,
            role: user.role,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

pub struct UserRepository<'a> {
    storage: &'a DocumentStorage,
}

impl<'a> UserRepository<'a> {
    pub fn new(storage: &'a DocumentStorage) -> Self {
        Self { storage }
    }

    pub fn exists(&self, user_id: &str) -> bool {
        self.storage.exists(self.storage.paths().user(user_id))
    }

    pub fn get(&self, user_id: &str) -> StorageResult<StoredUser> {
        let path = self.storage.paths().user(user_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!("User {user_id}")));
        }
        self.storage.read_json(path)
    }

    pub fn create(&self, user: &StoredUser) -> StorageResult<()> {
        self.storage
            .create_json(self.storage.paths().user(&user.user_id), user)
    }

    /// Apply `f` to the stored user and persist it; `updated_at` is bumped.
    pub fn modify<R, E, F>(&self, user_id: &str, f: F) -> Result<R, E>
    where
        E: From<StorageError>,
        F: FnOnce(&mut StoredUser) -> Result<R, E>,
    {
        if !self.exists(user_id) {
            return Err(StorageError::NotFound(format!("User {user_id}")).into());
        }
        self.storage
            .modify_json(self.storage.paths().user(user_id), |user: &mut StoredUser| {
                let result = f(user)?;
                user.updated_at = Utc::now();
                Ok(result)
            })
    }

    /// List all users (admin view).
    pub fn list_all(&self) -> StorageResult<Vec<StoredUser>> {
        self.storage.read_all(self.storage.paths().users_dir())
    }
}

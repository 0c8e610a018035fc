// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session repository.
//!
//! A session backs one refresh token. Access tokens carry the session id, so
//! revoking the session invalidates both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::{DocumentStorage, StorageError, StorageResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSession {
    pub session_id: String,
    pub user_id: String,
    /// HMAC of the current refresh secret (hex).
    pub refresh_token_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    /// Not revoked and not past its expiry.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Session as listed to its owner.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// True for the session the request was made with.
    pub current: bool,
}

impl SessionResponse {
    pub fn from_session(session: StoredSession, current_session_id: &str) -> Self {
        Self {
            current: session.session_id == current_session_id,
            session_id: session.session_id,
            user_agent: session.user_agent,
            ip_address: session.ip_address,
            created_at: session.created_at,
            last_used_at: session.last_used_at,
            expires_at: session.expires_at,
        }
    }
}

pub struct SessionRepository<'a> {
    storage: &'a DocumentStorage,
}

impl<'a> SessionRepository<'a> {
    pub fn new(storage: &'a DocumentStorage) -> Self {
        Self { storage }
    }

    pub fn get(&self, session_id: &str) -> StorageResult<StoredSession> {
        let path = self.storage.paths().session(session_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!("Session {session_id}")));
        }
        self.storage.read_json(path)
    }

    pub fn create(&self, session: &StoredSession) -> StorageResult<()> {
        self.storage
            .create_json(self.storage.paths().session(&session.session_id), session)
    }

    pub fn modify<R, E, F>(&self, session_id: &str, f: F) -> Result<R, E>
    where
        E: From<StorageError>,
        F: FnOnce(&mut StoredSession) -> Result<R, E>,
    {
        let path = self.storage.paths().session(session_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!("Session {session_id}")).into());
        }
        self.storage.modify_json(path, f)
    }

    /// Mark a session revoked. Already revoked sessions keep their timestamp.
    pub fn revoke(&self, session_id: &str, now: DateTime<Utc>) -> StorageResult<()> {
        self.modify(session_id, |session| {
            session.revoked_at.get_or_insert(now);
            Ok(())
        })
    }

    /// Active sessions of a user, newest first.
    pub fn list_active_by_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<StoredSession>> {
        let mut sessions: Vec<StoredSession> = self
            .storage
            .read_all::<StoredSession>(self.storage.paths().sessions_dir())?
            .into_iter()
            .filter(|s| s.user_id == user_id && s.is_active_at(now))
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Revoke every active session of a user except `keep`. Returns the count revoked.
    pub fn revoke_all_for_user(
        &self,
        user_id: &str,
        keep: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut revoked = 0;
        for session in self.list_active_by_user(user_id, now)? {
            if keep == Some(session.session_id.as_str()) {
                continue;
            }
            self.revoke(&session.session_id, now)?;
            revoked += 1;
        }
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;
    use chrono::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DocumentStorage) {
        let temp = TempDir::new().unwrap();
        let mut storage = DocumentStorage::new(StoragePaths::new(temp.path()));
        storage.initialize().unwrap();
        (temp, storage)
    }

    fn session(session_id: &str, user_id: &str) -> StoredSession {
        let now = Utc::now();
        StoredSession {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            refresh_token_hash: "00".to_string(),
            user_agent: None,
            ip_address: None,
            created_at: now,
            last_used_at: now,
            expires_at: now + Duration::days(7),
            revoked_at: None,
        }
    }

    #[test]
    fn revoked_sessions_are_not_listed() {
        let (_temp, storage) = setup();
        let repo = SessionRepository::new(&storage);
        repo.create(&session("s1", "u1")).unwrap();
        repo.create(&session("s2", "u1")).unwrap();
        repo.create(&session("s3", "u2")).unwrap();

        let now = Utc::now();
        repo.revoke("s1", now).unwrap();

        let active = repo.list_active_by_user("u1", now).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "s2");
        assert!(!repo.get("s1").unwrap().is_active_at(now));
    }

    #[test]
    fn revoke_all_keeps_current_session() {
        let (_temp, storage) = setup();
        let repo = SessionRepository::new(&storage);
        for id in ["s1", "s2", "s3"] {
            repo.create(&session(id, "u1")).unwrap();
        }

        let now = Utc::now();
        let revoked = repo.revoke_all_for_user("u1", Some("s2"), now).unwrap();
        assert_eq!(revoked, 2);

        let active = repo.list_active_by_user("u1", now).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "s2");
    }

    #[test]
    fn expired_session_is_inactive() {
        let mut s = session("s1", "u1");
        s.expires_at = Utc::now() - Duration::seconds(1);
        assert!(!s.is_active_at(Utc::now()));
    }
}

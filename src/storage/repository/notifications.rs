// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted user notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::super::{DocumentStorage, OwnedResource, StorageError, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Security,
    Recovery,
    Transaction,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Unread,
    Read,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct StoredNotification {
    pub notification_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
    /// Recipient
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub status: NotificationStatus,
    pub title: String,
    pub message: String,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl OwnedResource for StoredNotification {
    fn owner_user_id(&self) -> &str {
        &self.user_id
    }

    fn resource_name(&self) -> String {
        format!("notification {}", self.notification_id)
    }
}

pub struct NotificationRepository<'a> {
    storage: &'a DocumentStorage,
}

impl<'a> NotificationRepository<'a> {
    pub fn new(storage: &'a DocumentStorage) -> Self {
        Self { storage }
    }

    pub fn get(&self, notification_id: &str) -> StorageResult<StoredNotification> {
        let path = self.storage.paths().notification(notification_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!(
                "Notification {notification_id}"
            )));
        }
        self.storage.read_json(path)
    }

    pub fn create(&self, notification: &StoredNotification) -> StorageResult<()> {
        self.storage.create_json(
            self.storage
                .paths()
                .notification(&notification.notification_id),
            notification,
        )
    }

    pub fn modify<R, E, F>(&self, notification_id: &str, f: F) -> Result<R, E>
    where
        E: From<StorageError>,
        F: FnOnce(&mut StoredNotification) -> Result<R, E>,
    {
        let path = self.storage.paths().notification(notification_id);
        if !self.storage.exists(&path) {
            return Err(
                StorageError::NotFound(format!("Notification {notification_id}")).into(),
            );
        }
        self.storage.modify_json(path, f)
    }

    /// Notifications addressed to a user, newest first.
    pub fn list_by_user(&self, user_id: &str) -> StorageResult<Vec<StoredNotification>> {
        let mut notifications: Vec<StoredNotification> = self
            .storage
            .read_all::<StoredNotification>(self.storage.paths().notifications_dir())?
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;
    use chrono::Duration;
    use tempfile::TempDir;

    fn notification(id: &str, user_id: &str, created_at: DateTime<Utc>) -> StoredNotification {
        StoredNotification {
            notification_id: id.to_string(),
            wallet_id: None,
            user_id: user_id.to_string(),
            notification_type: NotificationType::System,
            status: NotificationStatus::Unread,
            title: "Hello".to_string(),
            message: "World".to_string(),
            metadata: serde_json::json!({}),
            created_at,
            read_at: None,
        }
    }

    #[test]
    fn list_by_user_is_newest_first() {
        let temp = TempDir::new().unwrap();
        let mut storage = DocumentStorage::new(StoragePaths::new(temp.path()));
        storage.initialize().unwrap();
        let repo = NotificationRepository::new(&storage);

        let now = Utc::now();
        repo.create(&notification("n1", "u1", now - Duration::minutes(2)))
            .unwrap();
        repo.create(&notification("n2", "u1", now)).unwrap();
        repo.create(&notification("n3", "u2", now)).unwrap();

        let ids: Vec<String> = repo
            .list_by_user("u1")
            .unwrap()
            .into_iter()
            .map(|n| n.notification_id)
            .collect();
        assert_eq!(ids, vec!["n2", "n1"]);
    }

    #[test]
    fn type_is_serialized_as_type() {
        let json = serde_json::to_value(notification("n1", "u1", Utc::now())).unwrap();
        assert_eq!(json["type"], "system");
        assert_eq!(json["status"], "unread");
    }
}

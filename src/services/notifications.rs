// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted user notifications.
//!
//! Notifications are records only: nothing is pushed, mailed or texted.
//! Other services create them as a side effect; recipients read, mark and
//! archive them through the API.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::storage::{
    DocumentStorage, NotificationRepository, NotificationStatus, NotificationType,
    StoredNotification,
};

/// Fields of a notification to create.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub wallet_id: Option<String>,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub metadata: Value,
}

pub struct NotificationService<'a> {
    storage: &'a DocumentStorage,
}

impl<'a> NotificationService<'a> {
    pub fn new(storage: &'a DocumentStorage) -> Self {
        Self { storage }
    }

    pub fn create_notification(&self, new: NewNotification) -> ServiceResult<StoredNotification> {
        let notification = StoredNotification {
            notification_id: Uuid::new_v4().to_string(),
            wallet_id: new.wallet_id,
            user_id: new.user_id,
            notification_type: new.notification_type,
            status: NotificationStatus::Unread,
            title: new.title,
            message: new.message,
            metadata: new.metadata,
            created_at: Utc::now(),
            read_at: None,
        };
        NotificationRepository::new(self.storage).create(&notification)?;

        tracing::debug!(
            notification_id = %notification.notification_id,
            user_id = %notification.user_id,
            notification_type = ?notification.notification_type,
            "Notification created"
        );
        Ok(notification)
    }

    /// High-severity notification that asks the user to act.
    pub fn create_security_notification(
        &self,
        user_id: &str,
        wallet_id: Option<&str>,
        title: &str,
        message: &str,
    ) -> ServiceResult<StoredNotification> {
        self.create_notification(NewNotification {
            user_id: user_id.to_string(),
            wallet_id: wallet_id.map(str::to_string),
            notification_type: NotificationType::Security,
            title: title.to_string(),
            message: message.to_string(),
            metadata: json!({ "securityLevel": "high", "actionRequired": true }),
        })
    }

    pub fn create_recovery_notification(
        &self,
        user_id: &str,
        wallet_id: &str,
        recovery_id: &str,
        title: &str,
        message: &str,
    ) -> ServiceResult<StoredNotification> {
        self.create_notification(NewNotification {
            user_id: user_id.to_string(),
            wallet_id: Some(wallet_id.to_string()),
            notification_type: NotificationType::Recovery,
            title: title.to_string(),
            message: message.to_string(),
            metadata: json!({ "recoveryId": recovery_id, "actionRequired": true }),
        })
    }

    pub fn create_transaction_notification(
        &self,
        user_id: &str,
        wallet_id: &str,
        transaction_id: &str,
        amount: &str,
        title: &str,
        message: &str,
    ) -> ServiceResult<StoredNotification> {
        self.create_notification(NewNotification {
            user_id: user_id.to_string(),
            wallet_id: Some(wallet_id.to_string()),
            notification_type: NotificationType::Transaction,
            title: title.to_string(),
            message: message.to_string(),
            metadata: json!({ "transactionId": transaction_id, "amount": amount }),
        })
    }

    /// Notifications of a user, newest first, optionally filtered by status.
    pub fn list_for_user(
        &self,
        user_id: &str,
        status: Option<NotificationStatus>,
    ) -> ServiceResult<Vec<StoredNotification>> {
        let notifications = NotificationRepository::new(self.storage).list_by_user(user_id)?;
        Ok(notifications
            .into_iter()
            .filter(|n| status.is_none_or(|s| n.status == s))
            .collect())
    }

    pub fn unread_count(&self, user_id: &str) -> ServiceResult<usize> {
        Ok(self
            .list_for_user(user_id, Some(NotificationStatus::Unread))?
            .len())
    }

    pub fn mark_read(&self, user_id: &str, notification_id: &str) -> ServiceResult<StoredNotification> {
        self.mark_read_at(user_id, notification_id, Utc::now())
    }

    /// Unread → read. Already read or archived notifications are returned unchanged.
    pub fn mark_read_at(
        &self,
        user_id: &str,
        notification_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<StoredNotification> {
        self.modify_own(user_id, notification_id, |n| {
            if n.status == NotificationStatus::Unread {
                n.status = NotificationStatus::Read;
                n.read_at = Some(now);
            }
        })
    }

    /// Mark every unread notification of the user as read; returns how many changed.
    pub fn mark_all_read(&self, user_id: &str) -> ServiceResult<usize> {
        let now = Utc::now();
        let unread = self.list_for_user(user_id, Some(NotificationStatus::Unread))?;
        for notification in &unread {
            self.mark_read_at(user_id, &notification.notification_id, now)?;
        }
        Ok(unread.len())
    }

    pub fn archive(&self, user_id: &str, notification_id: &str) -> ServiceResult<StoredNotification> {
        let now = Utc::now();
        self.modify_own(user_id, notification_id, |n| {
            n.read_at.get_or_insert(now);
            n.status = NotificationStatus::Archived;
        })
    }

    /// Apply `f` to a notification of `user_id`; other users' notifications are NotFound.
    fn modify_own<F>(&self, user_id: &str, notification_id: &str, f: F) -> ServiceResult<StoredNotification>
    where
        F: FnOnce(&mut StoredNotification),
    {
        NotificationRepository::new(self.storage).modify(notification_id, |n| {
            if n.user_id != user_id {
                return Err(ServiceError::not_found(format!("Notification {notification_id}")));
            }
            f(n);
            Ok(n.clone())
        })
    }
}

/// Log a failed side-effect notification without failing the caller.
pub fn log_failure(result: ServiceResult<StoredNotification>, context: &str) {
    if let Err(e) = result {
        tracing::warn!(error = %e, context, "Failed to create notification");
    }
}

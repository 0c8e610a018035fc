// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Authentication events, guardian changes, recovery transitions and
//! administrative actions are appended to daily JSONL files.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{DocumentStorage, StorageError, StorageResult};

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Account events
    UserRegistered,
    LoginSucceeded,
    LoginFailed,
    AccountBlocked,
    Logout,
    SessionRevoked,
    TokenRefreshed,
    PasswordChanged,
    OAuthLinked,

    // Two-factor events
    TwoFactorSetupStarted,
    TwoFactorEnabled,
    TwoFactorDisabled,

    // Wallet events
    WalletCreated,
    WalletStatusChanged,

    // Guardian events
    GuardianAdded,
    GuardianActivated,
    GuardianRevoked,

    // Recovery events
    RecoveryInitiated,
    RecoveryConfirmed,
    RecoveryExecuted,
    RecoveryCancelled,
    RecoveryExpired,

    // Access events
    PermissionDenied,
    AdminAccess,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User who triggered the event (if known).
    pub user_id: Option<String>,
    /// Resource affected (wallet_id, recovery_id, etc.).
    pub resource_id: Option<String>,
    /// Resource type (wallet, guardian, recovery, etc.).
    pub resource_type: Option<String>,
    /// IP address of the request (if available).
    pub ip_address: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            ip_address: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_ip(mut self, ip: Option<&str>) -> Self {
        self.ip_address = ip.map(str::to_string);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Filters for audit queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub event_type: Option<AuditEventType>,
}

impl AuditFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        fn field_matches(filter: &Option<String>, value: &Option<String>) -> bool {
            filter
                .as_deref()
                .is_none_or(|wanted| value.as_deref() == Some(wanted))
        }

        field_matches(&self.user_id, &event.user_id)
            && field_matches(&self.resource_type, &event.resource_type)
            && field_matches(&self.resource_id, &event.resource_id)
            && self.event_type.is_none_or(|t| t == event.event_type)
    }
}

/// Repository for audit events.
pub struct AuditRepository<'a> {
    storage: &'a DocumentStorage,
}

impl<'a> AuditRepository<'a> {
    pub fn new(storage: &'a DocumentStorage) -> Self {
        Self { storage }
    }

    /// Append an event to the daily log file as one JSON line.
    pub fn log(&self, event: &AuditEvent) -> StorageResult<()> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        let path = self.storage.paths().audit_events_file(&date);

        let mut line = serde_json::to_vec(event).map_err(|e| {
            StorageError::SerializationError(format!("Failed to serialize audit event: {e}"))
        })?;
        line.push(b'\n');

        self.storage.append_raw(&path, &line)
    }

    /// Read audit events for a specific date.
    pub fn read_events(&self, date: &str) -> StorageResult<Vec<AuditEvent>> {
        let path = self.storage.paths().audit_events_file(date);
        let content = self.storage.read_raw(&path)?;

        let content_str = String::from_utf8(content).map_err(|e| {
            StorageError::SerializationError(format!("Invalid UTF-8 in audit log: {e}"))
        })?;

        let mut events = Vec::new();
        for line in content_str.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(line).map_err(|e| {
                StorageError::SerializationError(format!("Failed to deserialize audit event: {e}"))
            })?;
            events.push(event);
        }

        Ok(events)
    }

    /// Read events for an inclusive date range (`YYYY-MM-DD`), skipping days with no log.
    pub fn read_events_range(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> StorageResult<Vec<AuditEvent>> {
        let start = parse_date(start_date)?;
        let end = parse_date(end_date)?;

        let mut all_events = Vec::new();
        let mut current = start;

        while current <= end {
            let date_str = current.format("%Y-%m-%d").to_string();
            match self.read_events(&date_str) {
                Ok(events) => all_events.extend(events),
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            current = current
                .succ_opt()
                .ok_or_else(|| StorageError::SerializationError("Date overflow".to_string()))?;
        }

        Ok(all_events)
    }

    /// Read a date range and keep the events matching `filter`.
    pub fn search(
        &self,
        start_date: &str,
        end_date: &str,
        filter: &AuditFilter,
    ) -> StorageResult<Vec<AuditEvent>> {
        Ok(self
            .read_events_range(start_date, end_date)?
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect())
    }
}

fn parse_date(date: &str) -> StorageResult<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| StorageError::SerializationError(format!("Invalid date {date}: {e}")))
}

/// Append an audit event, logging (not propagating) storage failures.
///
/// ```rust,ignore
/// audit_log!(storage, AuditEventType::GuardianAdded, actor, "guardian", &guardian_id);
/// ```
#[macro_export]
macro_rules! audit_log {
    ($storage:expr, $event:expr) => {{
        let repo = $crate::storage::AuditRepository::new($storage);
        let event: $crate::storage::AuditEvent = $event;
        if let Err(e) = repo.log(&event) {
            tracing::warn!(error = %e, event_type = ?event.event_type, "Failed to write audit event");
        }
    }};
    ($storage:expr, $event_type:expr, $user_id:expr, $resource_type:expr, $resource_id:expr) => {{
        $crate::audit_log!(
            $storage,
            $crate::storage::AuditEvent::new($event_type)
                .with_user($user_id)
                .with_resource($resource_type, $resource_id)
        )
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DocumentStorage) {
        let temp = TempDir::new().unwrap();
        let mut storage = DocumentStorage::new(StoragePaths::new(temp.path()));
        storage.initialize().unwrap();
        (temp, storage)
    }

    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    #[test]
    fn failed_event_records_error() {
        let event = AuditEvent::new(AuditEventType::LoginFailed)
            .with_user("user_123")
            .with_ip(Some("10.0.0.1"))
            .failed("Invalid credentials");

        assert!(!event.success);
        assert_eq!(event.error.as_deref(), Some("Invalid credentials"));
        assert_eq!(event.ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn log_appends_in_order() {
        let (_temp, storage) = setup();
        let repo = AuditRepository::new(&storage);

        repo.log(&AuditEvent::new(AuditEventType::RecoveryInitiated).with_user("u1"))
            .unwrap();
        repo.log(&AuditEvent::new(AuditEventType::RecoveryConfirmed).with_user("u2"))
            .unwrap();

        let events = repo.read_events(&today()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::RecoveryInitiated);
        assert_eq!(events[1].event_type, AuditEventType::RecoveryConfirmed);
    }

    #[test]
    fn search_applies_filter() {
        let (_temp, storage) = setup();
        let repo = AuditRepository::new(&storage);

        audit_log!(&storage, AuditEventType::GuardianAdded, "u1", "guardian", "g1");
        audit_log!(&storage, AuditEventType::GuardianRevoked, "u1", "guardian", "g1");
        audit_log!(&storage, AuditEventType::WalletCreated, "u2", "wallet", "w1");

        let day = today();
        let by_user = AuditFilter {
            user_id: Some("u1".to_string()),
            ..Default::default()
        };
        assert_eq!(repo.search(&day, &day, &by_user).unwrap().len(), 2);

        let by_type = AuditFilter {
            event_type: Some(AuditEventType::WalletCreated),
            ..Default::default()
        };
        let events = repo.search(&day, &day, &by_type).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].resource_id.as_deref(), Some("w1"));
    }

    #[test]
    fn range_skips_days_without_logs() {
        let (_temp, storage) = setup();
        let repo = AuditRepository::new(&storage);

        let events = repo.read_events_range("2020-01-01", "2020-01-03").unwrap();
        assert!(events.is_empty());
        assert!(repo.read_events_range("not-a-date", "2020-01-03").is_err());
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state lives under `DATA_DIR` (default `/data`) as one JSON
//! document per record, plus an embedded redb database for the lookups that
//! need atomic check-and-insert.
//!
//! ## Storage Layout
//!
//! ```text
//! /data/
//!   index.redb                  # email index, login attempts, active recoveries, OAuth links
//!   users/{user_id}.json
//!   sessions/{session_id}.json
//!   two_factor/{user_id}.json
//!   wallets/{wallet_id}/
//!     meta.json                 # Wallet metadata (owner, kind, status)
//!     key.pem                   # Custodial private key (NEVER exposed via API)
//!   guardians/{guardian_id}.json
//!   recoveries/{recovery_id}.json
//!   notifications/{notification_id}.json
//!   audit/
//!     {date}/events.jsonl       # Daily audit logs
//! ```

pub mod audit;
pub mod documents;
pub mod index_db;
pub mod ownership;
pub mod paths;
pub mod repository;

pub use audit::{AuditEvent, AuditEventType, AuditFilter, AuditRepository};
pub use documents::{DocumentStorage, StorageError, StorageResult};
pub use index_db::{Claim, IndexDatabase, IndexError, IndexResult, OAuthAccount};
pub use ownership::{OwnedResource, OwnershipEnforcer};
pub use paths::StoragePaths;
pub use repository::{
    guardian_id_for, GuardianRepository, GuardianStatus, NotificationRepository,
    NotificationStatus, NotificationType, RecoveryRepository, RecoveryStatus, SessionRepository,
    SessionResponse, StoredGuardian, StoredNotification, StoredRecovery, StoredSession,
    StoredTwoFactor, StoredUser, TwoFactorMethod, TwoFactorRepository, TwoFactorStatus,
    UserRepository, UserResponse, WalletKind, WalletMetadata, WalletRepository, WalletStatus,
};

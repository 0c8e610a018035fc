// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the document store.
//!
//! Each repository provides CRUD operations for a specific entity type,
//! using [`DocumentStorage`](super::DocumentStorage) for all file operations.

pub mod guardians;
pub mod notifications;
pub mod recoveries;
pub mod sessions;
pub mod two_factor;
pub mod users;
pub mod wallets;

pub use guardians::{guardian_id_for, GuardianRepository, GuardianStatus, StoredGuardian};
pub use notifications::{
    NotificationRepository, NotificationStatus, NotificationType, StoredNotification,
};
pub use recoveries::{RecoveryRepository, RecoveryStatus, StoredRecovery};
pub use sessions::{SessionRepository, SessionResponse, StoredSession};
pub use two_factor::{StoredTwoFactor, TwoFactorMethod, TwoFactorRepository, TwoFactorStatus};
pub use users::{StoredUser, UserRepository, UserResponse};
pub use wallets::{WalletKind, WalletMetadata, WalletRepository, WalletStatus};

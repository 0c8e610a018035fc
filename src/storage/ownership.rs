// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ownership enforcement for stored resources.

use crate::auth::AuthenticatedUser;

use super::{StorageError, StorageResult};

/// Trait for resources that have an owner.
pub trait OwnedResource {
    /// Get the owner's user ID.
    fn owner_user_id(&self) -> &str;

    /// Resource name used in permission errors.
    fn resource_name(&self) -> String {
        "resource".to_string()
    }
}

/// Trait for enforcing ownership on storage operations.
pub trait OwnershipEnforcer {
    /// Verify that the user owns this resource.
    ///
    /// # Errors
    /// Returns `StorageError::PermissionDenied` if the user doesn't own the resource.
    fn verify_ownership(&self, user: &AuthenticatedUser) -> StorageResult<()>;

    /// Like `verify_ownership`, but admins always pass.
    fn verify_owner_or_admin(&self, user: &AuthenticatedUser) -> StorageResult<()> {
        if user.is_admin() {
            return Ok(());
        }
        self.verify_ownership(user)
    }
}

impl<T: OwnedResource> OwnershipEnforcer for T {
    fn verify_ownership(&self, user: &AuthenticatedUser) -> StorageResult<()> {
        if self.owner_user_id() == user.user_id {
            Ok(())
        } else {
            Err(StorageError::PermissionDenied {
                user_id: user.user_id.clone(),
                resource: self.resource_name(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    struct TestResource {
        owner: String,
    }

    impl OwnedResource for TestResource {
        fn owner_user_id(&self) -> &str {
            &self.owner
        }
    }

    fn make_user(user_id: &str, role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: user_id.to_string(),
            role,
            session_id: "sess_1".to_string(),
            expires_at: 0,
        }
    }

    #[test]
    fn ownership_verification_passes_for_owner() {
        let resource = TestResource {
            owner: "user_123".to_string(),
        };
        assert!(resource
            .verify_ownership(&make_user("user_123", Role::User))
            .is_ok());
    }

    #[test]
    fn ownership_verification_fails_for_non_owner() {
        let resource = TestResource {
            owner: "user_123".to_string(),
        };

        let result = resource.verify_ownership(&make_user("user_456", Role::User));
        assert!(matches!(result, Err(StorageError::PermissionDenied { .. })));
    }

    #[test]
    fn admin_bypasses_ownership() {
        let resource = TestResource {
            owner: "user_123".to_string(),
        };

        assert!(resource
            .verify_owner_or_admin(&make_user("admin_1", Role::Admin))
            .is_ok());
        assert!(resource
            .verify_owner_or_admin(&make_user("user_456", Role::User))
            .is_err());
    }
}

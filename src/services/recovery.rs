// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Guardian-threshold social recovery.
//!
//! ## State machine
//!
//! ```text
//! INITIATED ──(confirmations ≥ required)──► CONFIRMED ──(now ≥ expires_at)──► EXECUTED
//!     │                                        │
//!     └──────────(cancel / stale)──────────────┴──► EXPIRED
//! ```
//!
//! `expires_at` is the earliest instant a confirmed recovery may execute.
//! A recovery still open `execution_window` after that is stale: the reaper
//! expires it, and so does any confirm or execute that finds it first.
//!
//! Each wallet has at most one open recovery. The slot is claimed in the
//! index database before the record is written and released when the
//! recovery reaches a terminal state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::guardians::{guardian_recipient, GuardianService};
use super::notifications::{log_failure, NotificationService};
use super::{ServiceError, ServiceResult};
use crate::audit_log;
use crate::auth::tokens::random_token;
use crate::auth::AuthenticatedUser;
use crate::models::WalletAddress;
use crate::storage::{
    AuditEvent, AuditEventType, Claim, DocumentStorage, GuardianRepository, GuardianStatus,
    IndexDatabase, OwnershipEnforcer, RecoveryRepository, RecoveryStatus, StorageError,
    StoredRecovery, WalletMetadata, WalletRepository,
};

/// Entropy of a recovery id in bytes.
const RECOVERY_ID_BYTES: usize = 32;

/// Parameters of a new recovery.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InitiateRecoveryRequest {
    /// User id that receives the wallet when the recovery executes
    pub new_owner: String,
    /// Distinct guardian confirmations needed (at least 1)
    pub required_confirmations: u32,
    /// Seconds between initiation and the earliest execution
    pub recovery_delay: u64,
}

pub struct RecoveryService<'a> {
    storage: &'a DocumentStorage,
    index: &'a IndexDatabase,
    execution_window: Duration,
}

impl<'a> RecoveryService<'a> {
    pub fn new(storage: &'a DocumentStorage, index: &'a IndexDatabase, execution_window: Duration) -> Self {
        Self {
            storage,
            index,
            execution_window,
        }
    }

    // ========== Initiate ==========

    pub fn initiate_recovery(
        &self,
        actor: &AuthenticatedUser,
        wallet_id: &str,
        request: InitiateRecoveryRequest,
    ) -> ServiceResult<StoredRecovery> {
        self.initiate_recovery_at(actor, wallet_id, request, Utc::now())
    }

    pub fn initiate_recovery_at(
        &self,
        actor: &AuthenticatedUser,
        wallet_id: &str,
        request: InitiateRecoveryRequest,
        now: DateTime<Utc>,
    ) -> ServiceResult<StoredRecovery> {
        let wallet = WalletRepository::new(self.storage).get(wallet_id)?;

        let new_owner = request.new_owner.trim();
        if new_owner.is_empty() {
            return Err(ServiceError::BadRequest("new_owner is required".to_string()));
        }
        if request.required_confirmations == 0 {
            return Err(ServiceError::BadRequest(
                "required_confirmations must be at least 1".to_string(),
            ));
        }
        let expires_at = i64::try_from(request.recovery_delay)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .filter(|expires_at| expires_at.checked_add_signed(self.execution_window).is_some())
            .ok_or_else(|| ServiceError::BadRequest("recovery_delay is too large".to_string()))?;

        let recovery_id = random_token(RECOVERY_ID_BYTES)?;
        self.claim_slot(wallet_id, &recovery_id)?;

        let recovery = StoredRecovery {
            recovery_id: recovery_id.clone(),
            wallet_id: wallet_id.to_string(),
            initiated_by: actor.user_id.clone(),
            new_owner: new_owner.to_string(),
            previous_owner: wallet.owner_user_id.clone(),
            guardian_confirmations: Vec::new(),
            confirmation_count: 0,
            required_confirmations: request.required_confirmations,
            recovery_delay: request.recovery_delay,
            status: RecoveryStatus::Initiated,
            initiated_at: now,
            expires_at,
            executed_at: None,
            cancelled_at: None,
        };
        if let Err(e) = RecoveryRepository::new(self.storage).create(&recovery) {
            self.release_slot(&recovery);
            return Err(e.into());
        }

        audit_log!(
            self.storage,
            AuditEvent::new(AuditEventType::RecoveryInitiated)
                .with_user(&actor.user_id)
                .with_resource("recovery", &recovery_id)
                .with_details(serde_json::json!({
                    "walletId": wallet_id,
                    "requiredConfirmations": recovery.required_confirmations,
                    "recoveryDelay": recovery.recovery_delay,
                }))
        );
        tracing::info!(
            wallet_id,
            initiated_by = %actor.user_id,
            required = recovery.required_confirmations,
            "Recovery initiated"
        );

        self.notify_guardians(
            &recovery,
            "Wallet recovery requested",
            "A recovery was requested for a wallet you guard. Confirm it if you recognize the request.",
        );
        self.notify(
            &wallet.owner_user_id,
            &recovery,
            "Wallet recovery started",
            "A recovery of your wallet was started. Cancel it if you did not request it.",
        );
        Ok(recovery)
    }

    // ========== Confirm ==========

    pub fn confirm_recovery(
        &self,
        actor: &AuthenticatedUser,
        recovery_id: &str,
        guardian_address: &str,
    ) -> ServiceResult<StoredRecovery> {
        self.confirm_recovery_at(actor, recovery_id, guardian_address, Utc::now())
    }

    /// Record one guardian's confirmation.
    ///
    /// The address must be an ACTIVE guardian of the wallet and the actor must
    /// control it (own the wallet at that address) or be an admin.
    pub fn confirm_recovery_at(
        &self,
        actor: &AuthenticatedUser,
        recovery_id: &str,
        guardian_address: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<StoredRecovery> {
        let current = RecoveryRepository::new(self.storage).get(recovery_id)?;
        let address = WalletAddress::parse(guardian_address)
            .map_err(|e| ServiceError::BadRequest(e.to_string()))?;

        if GuardianService::new(self.storage)
            .active_guardian(&current.wallet_id, address.as_str())?
            .is_none()
        {
            return Err(ServiceError::BadRequest(
                "Address is not an active guardian of this wallet".to_string(),
            ));
        }
        if !actor.is_admin() && !self.controls_address(&actor.user_id, address.as_str())? {
            self.deny(actor, recovery_id, "guardian address not controlled by caller");
            return Err(ServiceError::Forbidden(
                "Caller does not control this guardian address".to_string(),
            ));
        }

        self.expire_if_stale(&current, now)?;

        let recovery = RecoveryRepository::new(self.storage).modify(recovery_id, |r| {
            if r.status.is_terminal() {
                return Err(ServiceError::BadRequest(format!(
                    "Recovery is already {}",
                    status_name(r.status)
                )));
            }
            if r.has_confirmation_from(address.as_str()) {
                return Err(ServiceError::BadRequest(
                    "Guardian has already confirmed this recovery".to_string(),
                ));
            }
            r.guardian_confirmations.push(address.to_string());
            r.confirmation_count = r.guardian_confirmations.len() as u32;
            if r.status == RecoveryStatus::Initiated
                && r.confirmation_count >= r.required_confirmations
            {
                r.status = RecoveryStatus::Confirmed;
            }
            Ok(r.clone())
        })?;

        audit_log!(
            self.storage,
            AuditEvent::new(AuditEventType::RecoveryConfirmed)
                .with_user(&actor.user_id)
                .with_resource("recovery", recovery_id)
                .with_details(serde_json::json!({
                    "guardian": address.as_str(),
                    "confirmationCount": recovery.confirmation_count,
                    "status": recovery.status,
                }))
        );
        tracing::info!(
            wallet_id = %recovery.wallet_id,
            confirmations = recovery.confirmation_count,
            required = recovery.required_confirmations,
            status = ?recovery.status,
            "Recovery confirmed by guardian"
        );

        if let Ok(wallet) = WalletRepository::new(self.storage).get(&recovery.wallet_id) {
            self.notify(
                &wallet.owner_user_id,
                &recovery,
                "Recovery confirmation received",
                &format!(
                    "Guardian {address} confirmed the recovery of your wallet ({}/{}).",
                    recovery.confirmation_count, recovery.required_confirmations
                ),
            );
        }
        Ok(recovery)
    }

    // ========== Execute ==========

    pub fn execute_recovery(&self, actor: &AuthenticatedUser, recovery_id: &str) -> ServiceResult<StoredRecovery> {
        self.execute_recovery_at(actor, recovery_id, Utc::now())
    }

    /// Hand the wallet to the new owner. Allowed for the initiator, the new
    /// owner and admins, once CONFIRMED and the delay has elapsed.
    pub fn execute_recovery_at(
        &self,
        actor: &AuthenticatedUser,
        recovery_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<StoredRecovery> {
        let current = RecoveryRepository::new(self.storage).get(recovery_id)?;
        if !actor.is_admin() && actor.user_id != current.initiated_by && actor.user_id != current.new_owner {
            self.deny(actor, recovery_id, "not initiator, new owner or admin");
            return Err(ServiceError::Forbidden(
                "Only the initiator, the new owner or an admin can execute a recovery".to_string(),
            ));
        }

        self.expire_if_stale(&current, now)?;

        let recovery = RecoveryRepository::new(self.storage).modify(recovery_id, |r| {
            if r.status != RecoveryStatus::Confirmed {
                return Err(ServiceError::BadRequest(format!(
                    "Recovery is {}, not confirmed",
                    status_name(r.status)
                )));
            }
            if now < r.expires_at {
                return Err(ServiceError::BadRequest(
                    "Recovery delay has not elapsed".to_string(),
                ));
            }
            r.status = RecoveryStatus::Executed;
            r.executed_at = Some(now);
            Ok(r.clone())
        })?;

        let transfer = WalletRepository::new(self.storage).modify(&recovery.wallet_id, |w| {
            w.owner_user_id = recovery.new_owner.clone();
            Ok::<_, ServiceError>(())
        });
        if let Err(e) = transfer {
            // Put the recovery back so it can be retried.
            let restored = RecoveryRepository::new(self.storage).modify(recovery_id, |r| {
                r.status = RecoveryStatus::Confirmed;
                r.executed_at = None;
                Ok::<_, ServiceError>(())
            });
            if let Err(restore_err) = restored {
                tracing::error!(error = %restore_err, recovery_id, "Failed to restore recovery after transfer failure");
            }
            return Err(e);
        }
        self.release_slot(&recovery);

        audit_log!(
            self.storage,
            AuditEvent::new(AuditEventType::RecoveryExecuted)
                .with_user(&actor.user_id)
                .with_resource("recovery", recovery_id)
                .with_details(serde_json::json!({
                    "walletId": recovery.wallet_id,
                    "previousOwner": recovery.previous_owner,
                    "newOwner": recovery.new_owner,
                }))
        );
        tracing::info!(
            wallet_id = %recovery.wallet_id,
            new_owner = %recovery.new_owner,
            "Recovery executed, wallet ownership transferred"
        );

        self.notify(
            &recovery.previous_owner,
            &recovery,
            "Wallet recovered",
            "Ownership of your wallet was transferred by a completed recovery.",
        );
        self.notify(
            &recovery.new_owner,
            &recovery,
            "Wallet recovered",
            "A recovery completed and you now own the wallet.",
        );
        self.notify_guardians(
            &recovery,
            "Wallet recovery completed",
            "A recovery you guarded has been executed.",
        );
        Ok(recovery)
    }

    // ========== Cancel ==========

    pub fn cancel_recovery(&self, actor: &AuthenticatedUser, recovery_id: &str) -> ServiceResult<StoredRecovery> {
        self.cancel_recovery_at(actor, recovery_id, Utc::now())
    }

    /// Expire an open recovery. Cancelling an expired recovery returns it
    /// unchanged; an executed one cannot be cancelled.
    pub fn cancel_recovery_at(
        &self,
        actor: &AuthenticatedUser,
        recovery_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<StoredRecovery> {
        let current = RecoveryRepository::new(self.storage).get(recovery_id)?;
        let wallet = WalletRepository::new(self.storage).get(&current.wallet_id)?;
        let allowed = actor.is_admin()
            || actor.user_id == wallet.owner_user_id
            || actor.user_id == current.initiated_by;
        if !allowed {
            self.deny(actor, recovery_id, "not owner, initiator or admin");
            return Err(ServiceError::Forbidden(
                "Only the wallet owner, the initiator or an admin can cancel a recovery".to_string(),
            ));
        }

        let (changed, recovery) = RecoveryRepository::new(self.storage).modify(recovery_id, |r| {
            match r.status {
                RecoveryStatus::Executed => Err(ServiceError::BadRequest(
                    "Executed recoveries cannot be cancelled".to_string(),
                )),
                RecoveryStatus::Expired => Ok((false, r.clone())),
                RecoveryStatus::Initiated | RecoveryStatus::Confirmed => {
                    r.status = RecoveryStatus::Expired;
                    r.cancelled_at = Some(now);
                    Ok((true, r.clone()))
                }
            }
        })?;

        if changed {
            self.release_slot(&recovery);
            audit_log!(
                self.storage,
                AuditEventType::RecoveryCancelled,
                &actor.user_id,
                "recovery",
                recovery_id
            );
            tracing::info!(wallet_id = %recovery.wallet_id, cancelled_by = %actor.user_id, "Recovery cancelled");

            self.notify(
                &wallet.owner_user_id,
                &recovery,
                "Wallet recovery cancelled",
                "The recovery of your wallet was cancelled.",
            );
            if recovery.initiated_by != wallet.owner_user_id {
                self.notify(
                    &recovery.initiated_by,
                    &recovery,
                    "Wallet recovery cancelled",
                    "A recovery you started was cancelled.",
                );
            }
            self.notify_guardians(
                &recovery,
                "Wallet recovery cancelled",
                "A recovery you were asked to confirm was cancelled.",
            );
        }
        Ok(recovery)
    }

    // ========== Queries ==========

    /// A recovery, visible to admins, the wallet owner, the initiator, the new
    /// owner and users controlling one of the wallet's guardian addresses.
    pub fn get_recovery(&self, actor: &AuthenticatedUser, recovery_id: &str) -> ServiceResult<StoredRecovery> {
        let recovery = RecoveryRepository::new(self.storage).get(recovery_id)?;
        if actor.is_admin()
            || actor.user_id == recovery.initiated_by
            || actor.user_id == recovery.new_owner
            || actor.user_id == recovery.previous_owner
        {
            return Ok(recovery);
        }

        let wallet = WalletRepository::new(self.storage).get(&recovery.wallet_id)?;
        if wallet.owner_user_id == actor.user_id || self.guards_wallet(&actor.user_id, &wallet)? {
            return Ok(recovery);
        }
        Err(ServiceError::not_found(format!("Recovery {recovery_id}")))
    }

    /// Recoveries of a wallet, newest first (owner or admin).
    pub fn list_for_wallet(&self, actor: &AuthenticatedUser, wallet_id: &str) -> ServiceResult<Vec<StoredRecovery>> {
        let wallet = WalletRepository::new(self.storage).get(wallet_id)?;
        wallet.verify_owner_or_admin(actor)?;
        Ok(RecoveryRepository::new(self.storage).list_by_wallet(wallet_id)?)
    }

    // ========== Expiry ==========

    fn is_stale(&self, recovery: &StoredRecovery, now: DateTime<Utc>) -> bool {
        // A deadline past the representable range never arrives.
        !recovery.status.is_terminal()
            && recovery
                .expires_at
                .checked_add_signed(self.execution_window)
                .is_some_and(|deadline| now > deadline)
    }

    /// Expire every open recovery past its execution window. Returns the
    /// recoveries that were expired by this call.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> ServiceResult<Vec<StoredRecovery>> {
        let mut expired = Vec::new();
        for recovery in RecoveryRepository::new(self.storage).list_open()? {
            if !self.is_stale(&recovery, now) {
                continue;
            }
            match self.expire(&recovery.recovery_id, now) {
                Ok(Some(r)) => expired.push(r),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, recovery_id = %recovery.recovery_id, "Failed to expire stale recovery");
                }
            }
        }
        Ok(expired)
    }

    /// Expire `current` if it is stale and fail with BadRequest in that case.
    fn expire_if_stale(&self, current: &StoredRecovery, now: DateTime<Utc>) -> ServiceResult<()> {
        if self.is_stale(current, now) {
            self.expire(&current.recovery_id, now)?;
            return Err(ServiceError::BadRequest("Recovery has expired".to_string()));
        }
        Ok(())
    }

    /// Move a stale recovery to EXPIRED. `None` if it changed state meanwhile.
    fn expire(&self, recovery_id: &str, now: DateTime<Utc>) -> ServiceResult<Option<StoredRecovery>> {
        let expired = RecoveryRepository::new(self.storage).modify(recovery_id, |r| {
            if !self.is_stale(r, now) {
                return Ok::<_, ServiceError>(None);
            }
            r.status = RecoveryStatus::Expired;
            Ok(Some(r.clone()))
        })?;

        if let Some(recovery) = &expired {
            self.release_slot(recovery);
            audit_log!(
                self.storage,
                AuditEvent::new(AuditEventType::RecoveryExpired).with_resource("recovery", recovery_id)
            );
            tracing::info!(wallet_id = %recovery.wallet_id, recovery_id, "Stale recovery expired");
            self.notify(
                &recovery.previous_owner,
                recovery,
                "Wallet recovery expired",
                "A recovery of your wallet was not executed in time and has expired.",
            );
        }
        Ok(expired)
    }

    // ========== Helpers ==========

    /// Claim the wallet's recovery slot. A slot left behind by a recovery that
    /// is already terminal (or missing) is reclaimed.
    fn claim_slot(&self, wallet_id: &str, recovery_id: &str) -> ServiceResult<()> {
        let holder = match self.index.claim_active_recovery(wallet_id, recovery_id)? {
            Claim::Claimed => return Ok(()),
            Claim::Held(holder) => holder,
        };

        let holder_open = match RecoveryRepository::new(self.storage).get(&holder) {
            Ok(existing) => !existing.status.is_terminal(),
            Err(StorageError::NotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };
        if !holder_open {
            tracing::warn!(wallet_id, holder = %holder, "Reclaiming recovery slot held by a closed recovery");
            self.index.release_active_recovery(wallet_id, &holder)?;
            if self.index.claim_active_recovery(wallet_id, recovery_id)? == Claim::Claimed {
                return Ok(());
            }
        }
        Err(ServiceError::BadRequest(
            "An active recovery already exists for this wallet".to_string(),
        ))
    }

    fn release_slot(&self, recovery: &StoredRecovery) {
        if let Err(e) = self
            .index
            .release_active_recovery(&recovery.wallet_id, &recovery.recovery_id)
        {
            tracing::warn!(error = %e, wallet_id = %recovery.wallet_id, "Failed to release recovery slot");
        }
    }

    /// Whether `user_id` owns a wallet whose address is `address`.
    fn controls_address(&self, user_id: &str, address: &str) -> ServiceResult<bool> {
        Ok(WalletRepository::new(self.storage)
            .find_by_address(address)?
            .is_some_and(|w| w.owner_user_id == user_id))
    }

    fn guards_wallet(&self, user_id: &str, wallet: &WalletMetadata) -> ServiceResult<bool> {
        for guardian in GuardianRepository::new(self.storage).list_by_wallet(&wallet.wallet_id)? {
            if guardian.status != GuardianStatus::Revoked && self.controls_address(user_id, &guardian.address)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn deny(&self, actor: &AuthenticatedUser, recovery_id: &str, reason: &str) {
        audit_log!(
            self.storage,
            AuditEvent::new(AuditEventType::PermissionDenied)
                .with_user(&actor.user_id)
                .with_resource("recovery", recovery_id)
                .failed(reason)
        );
    }

    fn notify(&self, user_id: &str, recovery: &StoredRecovery, title: &str, message: &str) {
        log_failure(
            NotificationService::new(self.storage).create_recovery_notification(
                user_id,
                &recovery.wallet_id,
                &recovery.recovery_id,
                title,
                message,
            ),
            title,
        );
    }

    /// Notify every non-revoked guardian of the recovery's wallet.
    fn notify_guardians(&self, recovery: &StoredRecovery, title: &str, message: &str) {
        let guardians = match GuardianRepository::new(self.storage).list_by_wallet(&recovery.wallet_id) {
            Ok(guardians) => guardians,
            Err(e) => {
                tracing::warn!(error = %e, wallet_id = %recovery.wallet_id, "Failed to list guardians for notification");
                return;
            }
        };
        for guardian in guardians.iter().filter(|g| g.status != GuardianStatus::Revoked) {
            let recipient = guardian_recipient(self.storage, &guardian.address);
            self.notify(&recipient, recovery, title, message);
        }
    }
}

fn status_name(status: RecoveryStatus) -> &'static str {
    match status {
        RecoveryStatus::Initiated => "initiated",
        RecoveryStatus::Confirmed => "confirmed",
        RecoveryStatus::Executed => "executed",
        RecoveryStatus::Expired => "expired",
    }
}

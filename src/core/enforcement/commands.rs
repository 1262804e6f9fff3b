// Typed command surface for chat staff.
//
// The text-command plumbing (parsing, reply targets, rendering) lives with
// the platform adapter; this service owns validation, authorization and the
// actual state changes. Unlike event handling, store failures here propagate
// to the caller so the invoking user sees that their command did not stick.

use crate::core::enforcement::admin_directory::{AdminDirectory, ReloadError};
use crate::core::enforcement::locks::{LockChange, LockError, LockOverview, LockService};
use crate::core::enforcement::stores::{
    ApprovalEntry, ApprovalStore, ConfigStore, Module, StoreError, ViolationLedger,
    ViolationRecord,
};
use crate::core::enforcement::tier::{
    EnforcementMode, InvalidMode, PrivilegeResolver, ResolveError, Tier,
};
use crate::core::platform::{AdminRecord, PlatformError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("you need to be {required} or above to do that")]
    NotAuthorized { required: Tier },

    #[error(transparent)]
    InvalidMode(#[from] InvalidMode),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Reload(#[from] ReloadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Idempotent approve/unapprove results, for user-facing replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalChange {
    Changed,
    /// The target was already in the requested state.
    AlreadyThere,
}

pub struct CommandService {
    config: Arc<dyn ConfigStore>,
    approvals: Arc<dyn ApprovalStore>,
    ledger: Arc<dyn ViolationLedger>,
    resolver: Arc<PrivilegeResolver>,
    locks: Arc<LockService>,
    admins: Arc<AdminDirectory>,
}

impl CommandService {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        approvals: Arc<dyn ApprovalStore>,
        ledger: Arc<dyn ViolationLedger>,
        resolver: Arc<PrivilegeResolver>,
        locks: Arc<LockService>,
        admins: Arc<AdminDirectory>,
    ) -> Self {
        Self {
            config,
            approvals,
            ledger,
            resolver,
            locks,
            admins,
        }
    }

    async fn require(
        &self,
        chat_id: i64,
        caller_id: i64,
        module: Module,
        required: Tier,
    ) -> Result<Tier, CommandError> {
        let tier = self.resolver.resolve(chat_id, caller_id, module).await?;
        if tier < required {
            return Err(CommandError::NotAuthorized { required });
        }
        Ok(tier)
    }

    // ========================================================================
    // MODULE CONFIGURATION
    // ========================================================================

    /// Set a module's enforcement mode from a user-supplied token. Invalid
    /// tokens are a validation error, never a crash.
    pub async fn set_mode(
        &self,
        chat_id: i64,
        caller_id: i64,
        module: Module,
        token: &str,
    ) -> Result<EnforcementMode, CommandError> {
        self.require(chat_id, caller_id, module, Tier::ChatOwner).await?;
        let mode: EnforcementMode = token.parse()?;
        self.config.set_mode(chat_id, module, mode).await?;
        Ok(mode)
    }

    pub async fn set_long_limit(
        &self,
        chat_id: i64,
        caller_id: i64,
        limit: u32,
    ) -> Result<(), CommandError> {
        self.require(chat_id, caller_id, Module::AntiLong, Tier::ChatOwner)
            .await?;
        self.config.set_long_limit(chat_id, limit).await?;
        Ok(())
    }

    // ========================================================================
    // APPROVALS
    // ========================================================================

    pub async fn approve(
        &self,
        chat_id: i64,
        caller_id: i64,
        module: Module,
        target_id: i64,
    ) -> Result<ApprovalChange, CommandError> {
        self.require(chat_id, caller_id, module, Tier::ChatOwner).await?;
        let changed = self
            .approvals
            .approve(chat_id, module, target_id, caller_id)
            .await?;
        Ok(if changed {
            ApprovalChange::Changed
        } else {
            ApprovalChange::AlreadyThere
        })
    }

    pub async fn unapprove(
        &self,
        chat_id: i64,
        caller_id: i64,
        module: Module,
        target_id: i64,
    ) -> Result<ApprovalChange, CommandError> {
        self.require(chat_id, caller_id, module, Tier::ChatOwner).await?;
        let changed = self.approvals.unapprove(chat_id, module, target_id).await?;
        Ok(if changed {
            ApprovalChange::Changed
        } else {
            ApprovalChange::AlreadyThere
        })
    }

    pub async fn list_approved(
        &self,
        chat_id: i64,
        caller_id: i64,
        module: Module,
    ) -> Result<Vec<ApprovalEntry>, CommandError> {
        self.require(chat_id, caller_id, module, Tier::ChatAdmin).await?;
        Ok(self.approvals.list_approved(chat_id, module).await?)
    }

    // ========================================================================
    // LOCKS
    // ========================================================================

    pub async fn lock(
        &self,
        chat_id: i64,
        caller_id: i64,
        token: &str,
    ) -> Result<LockChange, CommandError> {
        self.require(chat_id, caller_id, Module::Locks, Tier::ChatAdmin)
            .await?;
        Ok(self.locks.lock(chat_id, token).await?)
    }

    pub async fn unlock(
        &self,
        chat_id: i64,
        caller_id: i64,
        token: &str,
    ) -> Result<LockChange, CommandError> {
        self.require(chat_id, caller_id, Module::Locks, Tier::ChatAdmin)
            .await?;
        Ok(self.locks.unlock(chat_id, token).await?)
    }

    pub async fn lock_overview(
        &self,
        chat_id: i64,
        caller_id: i64,
    ) -> Result<LockOverview, CommandError> {
        self.require(chat_id, caller_id, Module::Locks, Tier::ChatAdmin)
            .await?;
        Ok(self.locks.overview(chat_id).await?)
    }

    // ========================================================================
    // STATS / CACHE
    // ========================================================================

    /// Violation counters for a user, for the stats command.
    pub async fn stats(
        &self,
        chat_id: i64,
        caller_id: i64,
        target_id: i64,
    ) -> Result<Vec<ViolationRecord>, CommandError> {
        self.require(chat_id, caller_id, Module::Nsfw, Tier::ChatAdmin)
            .await?;
        Ok(self.ledger.violations(chat_id, target_id).await?)
    }

    /// Manual admin-cache refresh; the directory's cool-down gate applies.
    pub async fn refresh_admins(
        &self,
        chat_id: i64,
        caller_id: i64,
    ) -> Result<Vec<AdminRecord>, CommandError> {
        let tier = self
            .resolver
            .resolve(chat_id, caller_id, Module::Locks)
            .await?;
        Ok(self
            .admins
            .manual_reload(chat_id, tier, self.resolver.platform())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enforcement::stores::testing::{
        MemoryApprovalStore, MemoryConfigStore, MemoryLedger, MemoryLockStore,
    };
    use crate::core::enforcement::tier::StaticAuthority;
    use crate::core::platform::testing::FakePlatform;
    use std::collections::HashSet;

    const CHAT: i64 = -200;
    const OWNER: i64 = 1;
    const ADMIN: i64 = 2;
    const MEMBER: i64 = 3;

    struct Harness {
        config: Arc<MemoryConfigStore>,
        approvals: Arc<MemoryApprovalStore>,
        platform: Arc<FakePlatform>,
        service: CommandService,
    }

    fn harness() -> Harness {
        let platform = Arc::new(FakePlatform::new());
        platform.owners.insert(CHAT, OWNER);
        platform.admins.insert(
            CHAT,
            vec![AdminRecord {
                chat_id: CHAT,
                user_id: ADMIN,
                display_name: "mod".into(),
                is_anonymous: false,
            }],
        );

        let config = Arc::new(MemoryConfigStore::default());
        let approvals = Arc::new(MemoryApprovalStore::default());
        let ledger = Arc::new(MemoryLedger::default());
        let lock_store = Arc::new(MemoryLockStore::default());
        let admins = Arc::new(AdminDirectory::new());
        let resolver = Arc::new(PrivilegeResolver::new(
            StaticAuthority::new(0, HashSet::new(), HashSet::new()),
            admins.clone(),
            approvals.clone(),
            platform.clone(),
        ));
        let locks = Arc::new(LockService::new(lock_store, platform.clone()));
        let service = CommandService::new(
            config.clone(),
            approvals.clone(),
            ledger,
            resolver,
            locks,
            admins,
        );
        Harness {
            config,
            approvals,
            platform,
            service,
        }
    }

    #[tokio::test]
    async fn set_mode_validates_the_token() {
        let h = harness();
        let mode = h
            .service
            .set_mode(CHAT, OWNER, Module::Nsfw, "strict")
            .await
            .unwrap();
        assert_eq!(mode, EnforcementMode::Strict);
        assert_eq!(
            h.config.get_config(CHAT, Module::Nsfw).await.unwrap().mode,
            EnforcementMode::Strict
        );

        let err = h
            .service
            .set_mode(CHAT, OWNER, Module::Nsfw, "medium")
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidMode(_)));
        // The stored mode is untouched.
        assert_eq!(
            h.config.get_config(CHAT, Module::Nsfw).await.unwrap().mode,
            EnforcementMode::Strict
        );
    }

    #[tokio::test]
    async fn mode_changes_need_the_chat_owner() {
        let h = harness();
        let err = h
            .service
            .set_mode(CHAT, ADMIN, Module::Nsfw, "strict")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::NotAuthorized {
                required: Tier::ChatOwner
            }
        ));
    }

    #[tokio::test]
    async fn approve_and_unapprove_report_idempotent_outcomes() {
        let h = harness();
        assert_eq!(
            h.service
                .approve(CHAT, OWNER, Module::BioLink, MEMBER)
                .await
                .unwrap(),
            ApprovalChange::Changed
        );
        assert_eq!(
            h.service
                .approve(CHAT, OWNER, Module::BioLink, MEMBER)
                .await
                .unwrap(),
            ApprovalChange::AlreadyThere
        );

        assert_eq!(
            h.service
                .unapprove(CHAT, OWNER, Module::BioLink, MEMBER)
                .await
                .unwrap(),
            ApprovalChange::Changed
        );
        // Already gone: a no-op, and the store is unchanged.
        assert_eq!(
            h.service
                .unapprove(CHAT, OWNER, Module::BioLink, MEMBER)
                .await
                .unwrap(),
            ApprovalChange::AlreadyThere
        );
        assert!(h
            .approvals
            .list_approved(CHAT, Module::BioLink)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn admins_can_lock_but_members_cannot() {
        let h = harness();
        assert!(matches!(
            h.service.lock(CHAT, ADMIN, "url").await.unwrap(),
            LockChange::Applied(_)
        ));
        assert!(matches!(
            h.service.lock(CHAT, MEMBER, "url").await.unwrap_err(),
            CommandError::NotAuthorized { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_lock_tokens_are_rejected() {
        let h = harness();
        let err = h.service.lock(CHAT, ADMIN, "everything").await.unwrap_err();
        assert!(matches!(err, CommandError::Lock(LockError::UnknownTag(_))));
    }

    #[tokio::test]
    async fn refresh_admins_is_gated_for_regular_staff() {
        let h = harness();
        h.service.refresh_admins(CHAT, ADMIN).await.unwrap();
        let second = h.service.refresh_admins(CHAT, ADMIN).await;
        assert!(matches!(
            second,
            Err(CommandError::Reload(ReloadError::CooldownActive { .. }))
        ));
        // Roster fetches: resolver miss-reload + manual reload.
        assert!(h.platform.roster_fetches.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }
}

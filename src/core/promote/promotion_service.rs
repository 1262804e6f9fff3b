// Interactive promotion sessions.
//
// A session is a rights bitset under construction: created by a staff
// command, mutated one toggle at a time through callbacks, then either
// applied (platform promotion) or cancelled. Sessions are keyed by
// (chat, target user); concurrent sessions for the same key race
// last-writer-wins like the rest of the shared caches.

use crate::core::enforcement::admin_directory::AdminDirectory;
use crate::core::enforcement::stores::{ApprovalStore, Module, StoreError};
use crate::core::enforcement::tier::{PrivilegeResolver, ResolveError, Tier};
use crate::core::platform::{
    with_flood_retry, AdminRecord, AdminRight, AdminRights, ChatPlatform, PlatformError,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Abandoned sessions expire after this long; expiry is lazy on access,
/// with [`PromotionService::purge_expired`] for periodic cleanup.
const SESSION_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("you need to be {required} or above to promote members")]
    NotAuthorized { required: Tier },

    #[error("that user already holds a staff position")]
    TargetAlreadyStaff,

    #[error("no open promotion for that user")]
    NoSession,

    /// Someone other than the requester pressed a session button. The
    /// session is left untouched.
    #[error("only the requester can change this promotion")]
    NotRequester,

    #[error("select at least one right before applying")]
    NoRightsSelected,

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[derive(Debug, Clone)]
pub struct PromotionSession {
    pub requester_id: i64,
    pub target_id: i64,
    pub target_name: String,
    pub rights: AdminRights,
    created_at: Instant,
}

impl PromotionSession {
    fn expired(&self) -> bool {
        self.created_at.elapsed() >= SESSION_TTL
    }
}

pub struct PromotionService {
    sessions: DashMap<(i64, i64), PromotionSession>,
    platform: Arc<dyn ChatPlatform>,
    resolver: Arc<PrivilegeResolver>,
    approvals: Arc<dyn ApprovalStore>,
    admins: Arc<AdminDirectory>,
}

impl PromotionService {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        resolver: Arc<PrivilegeResolver>,
        approvals: Arc<dyn ApprovalStore>,
        admins: Arc<AdminDirectory>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            platform,
            resolver,
            approvals,
            admins,
        }
    }

    /// Open a session for `target`. All rights start off.
    pub async fn begin(
        &self,
        chat_id: i64,
        requester_id: i64,
        target_id: i64,
        target_name: &str,
    ) -> Result<PromotionSession, PromotionError> {
        let tier = self
            .resolver
            .resolve(chat_id, requester_id, Module::Locks)
            .await?;
        if tier < Tier::ChatOwner {
            return Err(PromotionError::NotAuthorized {
                required: Tier::ChatOwner,
            });
        }

        let target_tier = self
            .resolver
            .resolve(chat_id, target_id, Module::Locks)
            .await?;
        if target_tier >= Tier::ChatAdmin {
            return Err(PromotionError::TargetAlreadyStaff);
        }

        let session = PromotionSession {
            requester_id,
            target_id,
            target_name: target_name.to_string(),
            rights: AdminRights::default(),
            created_at: Instant::now(),
        };
        self.sessions.insert((chat_id, target_id), session.clone());
        Ok(session)
    }

    /// Flip one right. Only the requester's callbacks are accepted.
    pub fn toggle(
        &self,
        chat_id: i64,
        target_id: i64,
        actor_id: i64,
        right: AdminRight,
    ) -> Result<AdminRights, PromotionError> {
        let mut session = self.live_session(chat_id, target_id)?;
        if session.requester_id != actor_id {
            return Err(PromotionError::NotRequester);
        }
        session.rights.toggle(right);
        Ok(session.rights)
    }

    /// Commit the session: promote on the platform, drop the user's module
    /// approvals (staff outrank them now), append to the admin cache
    /// without a full roster fetch, and discard the session.
    pub async fn apply(
        &self,
        chat_id: i64,
        target_id: i64,
        actor_id: i64,
    ) -> Result<AdminRights, PromotionError> {
        let (requester_id, rights, target_name) = {
            let session = self.live_session(chat_id, target_id)?;
            (
                session.requester_id,
                session.rights,
                session.target_name.clone(),
            )
        };
        if requester_id != actor_id {
            return Err(PromotionError::NotRequester);
        }
        if !rights.any() {
            return Err(PromotionError::NoRightsSelected);
        }

        with_flood_retry(|| self.platform.promote_member(chat_id, target_id, rights)).await?;

        let revoked = self.approvals.revoke_all(chat_id, target_id).await?;
        if revoked > 0 {
            tracing::debug!("dropped {revoked} approvals for {target_id} in {chat_id} on promotion");
        }
        self.admins.append(AdminRecord {
            chat_id,
            user_id: target_id,
            display_name: target_name,
            is_anonymous: false,
        });

        self.sessions.remove(&(chat_id, target_id));
        Ok(rights)
    }

    /// Discard the session without side effects.
    pub fn cancel(&self, chat_id: i64, target_id: i64, actor_id: i64) -> Result<(), PromotionError> {
        let requester_id = self.live_session(chat_id, target_id)?.requester_id;
        if requester_id != actor_id {
            return Err(PromotionError::NotRequester);
        }
        self.sessions.remove(&(chat_id, target_id));
        Ok(())
    }

    /// Drop every expired session; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let keep = !session.expired();
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    fn live_session(
        &self,
        chat_id: i64,
        target_id: i64,
    ) -> Result<dashmap::mapref::one::RefMut<'_, (i64, i64), PromotionSession>, PromotionError>
    {
        let key = (chat_id, target_id);
        let expired = self
            .sessions
            .get(&key)
            .map(|s| s.expired())
            .unwrap_or(false);
        if expired {
            self.sessions.remove(&key);
        }
        self.sessions.get_mut(&key).ok_or(PromotionError::NoSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::enforcement::stores::testing::MemoryApprovalStore;
    use crate::core::enforcement::tier::StaticAuthority;
    use crate::core::platform::testing::FakePlatform;

    const CHAT: i64 = -300;
    const OWNER: i64 = 1;
    const TARGET: i64 = 50;

    struct Harness {
        platform: Arc<FakePlatform>,
        approvals: Arc<MemoryApprovalStore>,
        admins: Arc<AdminDirectory>,
        service: PromotionService,
    }

    fn harness() -> Harness {
        let platform = Arc::new(FakePlatform::new());
        platform.owners.insert(CHAT, OWNER);
        platform.admins.insert(CHAT, Vec::new());

        let approvals = Arc::new(MemoryApprovalStore::default());
        let admins = Arc::new(AdminDirectory::new());
        let resolver = Arc::new(PrivilegeResolver::new(
            StaticAuthority::default(),
            admins.clone(),
            approvals.clone(),
            platform.clone(),
        ));
        let service = PromotionService::new(
            platform.clone(),
            resolver,
            approvals.clone(),
            admins.clone(),
        );
        Harness {
            platform,
            approvals,
            admins,
            service,
        }
    }

    #[tokio::test]
    async fn only_the_requester_may_touch_the_session() {
        let h = harness();
        h.service.begin(CHAT, OWNER, TARGET, "newmod").await.unwrap();

        let err = h
            .service
            .toggle(CHAT, TARGET, 999, AdminRight::DeleteMessages)
            .unwrap_err();
        assert!(matches!(err, PromotionError::NotRequester));
        // State unchanged: the requester's next toggle starts from all-off.
        let rights = h
            .service
            .toggle(CHAT, TARGET, OWNER, AdminRight::DeleteMessages)
            .unwrap();
        assert!(rights.can_delete_messages);
        assert!(!rights.can_pin_messages);
    }

    #[tokio::test]
    async fn apply_needs_at_least_one_right() {
        let h = harness();
        h.service.begin(CHAT, OWNER, TARGET, "newmod").await.unwrap();

        let err = h.service.apply(CHAT, TARGET, OWNER).await.unwrap_err();
        assert!(matches!(err, PromotionError::NoRightsSelected));
        // The session survives a refused apply.
        h.service
            .toggle(CHAT, TARGET, OWNER, AdminRight::PinMessages)
            .unwrap();
        h.service.apply(CHAT, TARGET, OWNER).await.unwrap();
    }

    #[tokio::test]
    async fn apply_promotes_revokes_approvals_and_appends_the_cache() {
        let h = harness();
        h.approvals
            .approve(CHAT, Module::BioLink, TARGET, OWNER)
            .await
            .unwrap();
        h.approvals
            .approve(CHAT, Module::Nsfw, TARGET, OWNER)
            .await
            .unwrap();
        // Prime the cache so the append is observable.
        h.admins.reload(CHAT, h.platform.as_ref()).await.unwrap();

        h.service.begin(CHAT, OWNER, TARGET, "newmod").await.unwrap();
        h.service
            .toggle(CHAT, TARGET, OWNER, AdminRight::RestrictMembers)
            .unwrap();
        let rights = h.service.apply(CHAT, TARGET, OWNER).await.unwrap();
        assert!(rights.can_restrict_members);

        let promoted = h.platform.promoted.lock().unwrap().clone();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].1, TARGET);

        assert!(!h
            .approvals
            .is_approved(CHAT, Module::BioLink, TARGET)
            .await
            .unwrap());
        assert!(!h
            .approvals
            .is_approved(CHAT, Module::Nsfw, TARGET)
            .await
            .unwrap());

        // Incremental append, no extra roster fetch.
        assert!(h
            .admins
            .lookup(CHAT)
            .unwrap()
            .iter()
            .any(|a| a.user_id == TARGET));
        assert_eq!(
            h.platform
                .roster_fetches
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );

        // Session is gone.
        assert!(matches!(
            h.service.apply(CHAT, TARGET, OWNER).await.unwrap_err(),
            PromotionError::NoSession
        ));
    }

    #[tokio::test]
    async fn cancel_discards_without_side_effects() {
        let h = harness();
        h.service.begin(CHAT, OWNER, TARGET, "newmod").await.unwrap();
        h.service
            .toggle(CHAT, TARGET, OWNER, AdminRight::ManageChat)
            .unwrap();
        h.service.cancel(CHAT, TARGET, OWNER).unwrap();

        assert!(h.platform.promoted.lock().unwrap().is_empty());
        assert!(matches!(
            h.service.cancel(CHAT, TARGET, OWNER).unwrap_err(),
            PromotionError::NoSession
        ));
    }

    #[tokio::test]
    async fn cannot_promote_existing_staff() {
        let h = harness();
        let err = h.service.begin(CHAT, OWNER, OWNER, "boss").await.unwrap_err();
        assert!(matches!(err, PromotionError::TargetAlreadyStaff));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_sessions_behave_as_missing() {
        let h = harness();
        h.service.begin(CHAT, OWNER, TARGET, "newmod").await.unwrap();

        tokio::time::advance(SESSION_TTL + Duration::from_secs(1)).await;
        assert!(matches!(
            h.service
                .toggle(CHAT, TARGET, OWNER, AdminRight::PinMessages)
                .unwrap_err(),
            PromotionError::NoSession
        ));

        // purge_expired drops abandoned sessions wholesale.
        h.service.begin(CHAT, OWNER, TARGET, "newmod").await.unwrap();
        tokio::time::advance(SESSION_TTL + Duration::from_secs(1)).await;
        assert_eq!(h.service.purge_expired(), 1);
        assert_eq!(h.service.purge_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_counts_only_what_it_evicts() {
        let h = harness();
        h.service.begin(CHAT, OWNER, TARGET, "stale").await.unwrap();
        tokio::time::advance(SESSION_TTL + Duration::from_secs(1)).await;
        h.service.begin(CHAT, OWNER, TARGET + 1, "fresh").await.unwrap();

        assert_eq!(h.service.purge_expired(), 1);
        // The live session survives the sweep.
        h.service
            .toggle(CHAT, TARGET + 1, OWNER, AdminRight::PinMessages)
            .unwrap();
    }
}

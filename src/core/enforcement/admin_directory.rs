// Per-chat privileged-member cache.
//
// Eventually consistent by design: entries are wholesale-replaced on reload,
// and concurrent reloads of the same chat race last-writer-wins. An absent
// entry is a cache miss, not "no admins".

use crate::core::enforcement::tier::Tier;
use crate::core::platform::{AdminRecord, ChatPlatform, PlatformError};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Non-privileged actors may trigger a manual roster refresh at most once
/// per window.
const MANUAL_RELOAD_COOLDOWN: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("admin cache was manually reloaded recently, try again in {remaining:?}")]
    CooldownActive { remaining: Duration },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

pub struct AdminDirectory {
    cache: DashMap<i64, Vec<AdminRecord>>,
    manual_reload_at: DashMap<i64, Instant>,
}

impl AdminDirectory {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            manual_reload_at: DashMap::new(),
        }
    }

    /// Cached roster for a chat, or `None` on a miss.
    pub fn lookup(&self, chat_id: i64) -> Option<Vec<AdminRecord>> {
        self.cache.get(&chat_id).map(|r| r.clone())
    }

    /// Fetch the full roster from the platform and atomically replace the
    /// cached entry. On failure the prior entry (if any) is kept; the caller
    /// decides whether to retry.
    pub async fn reload(
        &self,
        chat_id: i64,
        platform: &dyn ChatPlatform,
    ) -> Result<Vec<AdminRecord>, PlatformError> {
        let roster = platform.chat_admins(chat_id).await?;
        self.cache.insert(chat_id, roster.clone());
        Ok(roster)
    }

    /// Reload triggered by the manual refresh command.
    ///
    /// Non-privileged actors are blocked while the cool-down window is
    /// active. Privileged actors (Sudo and above) bypass the block check but
    /// still reset the window when their reload succeeds.
    pub async fn manual_reload(
        &self,
        chat_id: i64,
        actor_tier: Tier,
        platform: &dyn ChatPlatform,
    ) -> Result<Vec<AdminRecord>, ReloadError> {
        if !actor_tier.is_privileged() {
            if let Some(at) = self.manual_reload_at.get(&chat_id) {
                let elapsed = at.elapsed();
                if elapsed < MANUAL_RELOAD_COOLDOWN {
                    return Err(ReloadError::CooldownActive {
                        remaining: MANUAL_RELOAD_COOLDOWN - elapsed,
                    });
                }
            }
        }

        let roster = self.reload(chat_id, platform).await?;
        self.manual_reload_at.insert(chat_id, Instant::now());
        Ok(roster)
    }

    /// Append a freshly promoted member without a full roster fetch.
    pub fn append(&self, record: AdminRecord) {
        if let Some(mut roster) = self.cache.get_mut(&record.chat_id) {
            if !roster.iter().any(|a| a.user_id == record.user_id) {
                roster.push(record);
            }
        }
        // A miss stays a miss; the next lookup reloads the whole roster.
    }
}

impl Default for AdminDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::testing::FakePlatform;
    use std::sync::atomic::Ordering;

    fn admin(chat_id: i64, user_id: i64, name: &str) -> AdminRecord {
        AdminRecord {
            chat_id,
            user_id,
            display_name: name.to_string(),
            is_anonymous: false,
        }
    }

    #[tokio::test]
    async fn reload_then_lookup_returns_fresh_roster() {
        let platform = FakePlatform::new();
        platform.admins.insert(7, vec![admin(7, 1, "a")]);
        let dir = AdminDirectory::new();

        dir.reload(7, &platform).await.unwrap();
        assert_eq!(dir.lookup(7).unwrap().len(), 1);

        // Roster changes upstream; a reload must replace, not merge.
        platform
            .admins
            .insert(7, vec![admin(7, 2, "b"), admin(7, 3, "c")]);
        let fresh = dir.reload(7, &platform).await.unwrap();
        assert_eq!(fresh.len(), 2);
        assert_eq!(dir.lookup(7).unwrap(), fresh);
    }

    #[tokio::test]
    async fn failed_reload_keeps_prior_entry() {
        let platform = FakePlatform::new();
        platform.admins.insert(7, vec![admin(7, 1, "a")]);
        let dir = AdminDirectory::new();
        dir.reload(7, &platform).await.unwrap();

        platform.fail_roster.store(true, Ordering::SeqCst);
        assert!(dir.reload(7, &platform).await.is_err());
        assert_eq!(dir.lookup(7).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn never_cached_chat_misses_until_a_reload_succeeds() {
        let platform = FakePlatform::new();
        platform.fail_roster.store(true, Ordering::SeqCst);
        let dir = AdminDirectory::new();

        assert!(dir.lookup(9).is_none());
        assert!(dir.reload(9, &platform).await.is_err());
        assert!(dir.lookup(9).is_none());

        platform.fail_roster.store(false, Ordering::SeqCst);
        dir.reload(9, &platform).await.unwrap();
        assert!(dir.lookup(9).is_some());
    }

    #[tokio::test]
    async fn manual_reload_gate_blocks_second_unprivileged_attempt() {
        let platform = FakePlatform::new();
        let dir = AdminDirectory::new();

        dir.manual_reload(7, Tier::ChatAdmin, &platform).await.unwrap();
        let second = dir.manual_reload(7, Tier::ChatAdmin, &platform).await;
        assert!(matches!(second, Err(ReloadError::CooldownActive { .. })));

        // A privileged actor gets through inside the window.
        dir.manual_reload(7, Tier::Sudo, &platform).await.unwrap();

        // And their reload re-armed the window for everyone else.
        let third = dir.manual_reload(7, Tier::Member, &platform).await;
        assert!(matches!(third, Err(ReloadError::CooldownActive { .. })));
    }

    #[tokio::test]
    async fn append_is_incremental_and_ignores_duplicates() {
        let platform = FakePlatform::new();
        platform.admins.insert(7, vec![admin(7, 1, "a")]);
        let dir = AdminDirectory::new();
        dir.reload(7, &platform).await.unwrap();

        dir.append(admin(7, 2, "b"));
        dir.append(admin(7, 2, "b"));
        assert_eq!(dir.lookup(7).unwrap().len(), 2);
        // No extra roster fetch happened.
        assert_eq!(platform.roster_fetches.load(Ordering::SeqCst), 1);
    }
}

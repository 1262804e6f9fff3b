// Storage ports for the enforcement engine.
//
// Persistence is an external collaborator; the core only sees these traits.
// Infra provides the SQLite implementations, tests provide dashmap-backed
// mocks.

use crate::core::enforcement::locks::LockTag;
use crate::core::enforcement::tier::EnforcementMode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(String),
}

// ============================================================================
// MODELS
// ============================================================================

/// The independently-configured enforcement modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Module {
    Locks,
    Nsfw,
    BioLink,
    AntiEdit,
    AntiLong,
}

impl Module {
    pub const ALL: [Module; 5] = [
        Module::Locks,
        Module::Nsfw,
        Module::BioLink,
        Module::AntiEdit,
        Module::AntiLong,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Locks => "locks",
            Module::Nsfw => "nsfw",
            Module::BioLink => "biolink",
            Module::AntiEdit => "antiedit",
            Module::AntiLong => "antilong",
        }
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-chat, per-module configuration. Rows are created lazily on the first
/// write; reads of missing rows return [`ModuleConfig::default_for`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub mode: EnforcementMode,
    /// Token limit for the anti-long module; ignored by the others.
    pub long_limit: u32,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            mode: EnforcementMode::Off,
            long_limit: 200,
        }
    }
}

impl ModuleConfig {
    /// Defaults for a chat that has never configured the module. Locks are
    /// live out of the box (admins are exempt anyway); the heavier modules
    /// start disabled.
    pub fn default_for(module: Module) -> Self {
        let mode = match module {
            Module::Locks => EnforcementMode::Admin,
            _ => EnforcementMode::Off,
        };
        Self {
            mode,
            ..Self::default()
        }
    }
}

/// A per-module exemption row. Presence means bypass for that module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalEntry {
    pub chat_id: i64,
    pub user_id: i64,
    pub granted_by: Option<i64>,
    pub granted_at: DateTime<Utc>,
}

/// Recorded (chat, user, category) infraction counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub chat_id: i64,
    pub user_id: i64,
    pub category: String,
    pub count: u32,
    pub last_seen: DateTime<Utc>,
}

// ============================================================================
// PORTS
// ============================================================================

/// Per-chat per-module mode and parameters.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, chat_id: i64, module: Module) -> Result<ModuleConfig, StoreError>;

    async fn set_mode(
        &self,
        chat_id: i64,
        module: Module,
        mode: EnforcementMode,
    ) -> Result<(), StoreError>;

    /// Anti-long token limit. Stored on the anti-long module row.
    async fn set_long_limit(&self, chat_id: i64, limit: u32) -> Result<(), StoreError>;
}

/// Per-module chat+user exemption rows. Insert and remove are idempotent:
/// the bool reports whether anything changed.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn approve(
        &self,
        chat_id: i64,
        module: Module,
        user_id: i64,
        granted_by: i64,
    ) -> Result<bool, StoreError>;

    async fn unapprove(&self, chat_id: i64, module: Module, user_id: i64)
        -> Result<bool, StoreError>;

    async fn is_approved(&self, chat_id: i64, module: Module, user_id: i64)
        -> Result<bool, StoreError>;

    async fn list_approved(
        &self,
        chat_id: i64,
        module: Module,
    ) -> Result<Vec<ApprovalEntry>, StoreError>;

    /// Drop the user's exemptions for every module in this chat. Used when a
    /// promotion makes module approvals redundant. Returns rows removed.
    async fn revoke_all(&self, chat_id: i64, user_id: i64) -> Result<u64, StoreError>;
}

/// Per chat/user/category counters. `record` must be an atomic
/// upsert-increment: no read-then-write on the hot path.
#[async_trait]
pub trait ViolationLedger: Send + Sync {
    /// Increment and return the new count for the key.
    async fn record(&self, chat_id: i64, user_id: i64, category: &str)
        -> Result<u32, StoreError>;

    async fn violations(&self, chat_id: i64, user_id: i64)
        -> Result<Vec<ViolationRecord>, StoreError>;
}

/// Classifier-driven lock tags persisted per chat. Native-permission locks
/// are held by the platform itself and never stored here (except `all`).
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Returns false if the tag was already locked.
    async fn insert_lock(&self, chat_id: i64, tag: LockTag) -> Result<bool, StoreError>;

    /// Returns false if the tag was not locked.
    async fn remove_lock(&self, chat_id: i64, tag: LockTag) -> Result<bool, StoreError>;

    async fn active_locks(&self, chat_id: i64) -> Result<HashSet<LockTag>, StoreError>;
}

// ============================================================================
// TEST SUPPORT
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Dashmap-backed config store.
    #[derive(Default)]
    pub struct MemoryConfigStore {
        rows: DashMap<(i64, Module), ModuleConfig>,
    }

    #[async_trait]
    impl ConfigStore for MemoryConfigStore {
        async fn get_config(
            &self,
            chat_id: i64,
            module: Module,
        ) -> Result<ModuleConfig, StoreError> {
            Ok(self
                .rows
                .get(&(chat_id, module))
                .map(|r| r.clone())
                .unwrap_or_else(|| ModuleConfig::default_for(module)))
        }

        async fn set_mode(
            &self,
            chat_id: i64,
            module: Module,
            mode: EnforcementMode,
        ) -> Result<(), StoreError> {
            self.rows
                .entry((chat_id, module))
                .or_insert_with(|| ModuleConfig::default_for(module))
                .mode = mode;
            Ok(())
        }

        async fn set_long_limit(&self, chat_id: i64, limit: u32) -> Result<(), StoreError> {
            self.rows
                .entry((chat_id, Module::AntiLong))
                .or_insert_with(|| ModuleConfig::default_for(Module::AntiLong))
                .long_limit = limit;
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MemoryApprovalStore {
        rows: DashMap<(i64, Module), Vec<ApprovalEntry>>,
    }

    #[async_trait]
    impl ApprovalStore for MemoryApprovalStore {
        async fn approve(
            &self,
            chat_id: i64,
            module: Module,
            user_id: i64,
            granted_by: i64,
        ) -> Result<bool, StoreError> {
            let mut rows = self.rows.entry((chat_id, module)).or_default();
            if rows.iter().any(|e| e.user_id == user_id) {
                return Ok(false);
            }
            rows.push(ApprovalEntry {
                chat_id,
                user_id,
                granted_by: Some(granted_by),
                granted_at: Utc::now(),
            });
            Ok(true)
        }

        async fn unapprove(
            &self,
            chat_id: i64,
            module: Module,
            user_id: i64,
        ) -> Result<bool, StoreError> {
            let mut rows = self.rows.entry((chat_id, module)).or_default();
            let before = rows.len();
            rows.retain(|e| e.user_id != user_id);
            Ok(rows.len() < before)
        }

        async fn is_approved(
            &self,
            chat_id: i64,
            module: Module,
            user_id: i64,
        ) -> Result<bool, StoreError> {
            Ok(self
                .rows
                .get(&(chat_id, module))
                .map(|rows| rows.iter().any(|e| e.user_id == user_id))
                .unwrap_or(false))
        }

        async fn list_approved(
            &self,
            chat_id: i64,
            module: Module,
        ) -> Result<Vec<ApprovalEntry>, StoreError> {
            Ok(self
                .rows
                .get(&(chat_id, module))
                .map(|rows| rows.clone())
                .unwrap_or_default())
        }

        async fn revoke_all(&self, chat_id: i64, user_id: i64) -> Result<u64, StoreError> {
            let mut removed = 0;
            for mut entry in self.rows.iter_mut() {
                if entry.key().0 != chat_id {
                    continue;
                }
                let before = entry.len();
                entry.retain(|e| e.user_id != user_id);
                removed += (before - entry.len()) as u64;
            }
            Ok(removed)
        }
    }

    #[derive(Default)]
    pub struct MemoryLedger {
        counts: DashMap<(i64, i64, String), u32>,
        /// Flip on to make every write fail.
        pub fail_writes: AtomicBool,
    }

    #[async_trait]
    impl ViolationLedger for MemoryLedger {
        async fn record(
            &self,
            chat_id: i64,
            user_id: i64,
            category: &str,
        ) -> Result<u32, StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("ledger unavailable".into()));
            }
            let mut entry = self
                .counts
                .entry((chat_id, user_id, category.to_string()))
                .or_insert(0);
            *entry += 1;
            Ok(*entry)
        }

        async fn violations(
            &self,
            chat_id: i64,
            user_id: i64,
        ) -> Result<Vec<ViolationRecord>, StoreError> {
            Ok(self
                .counts
                .iter()
                .filter(|e| e.key().0 == chat_id && e.key().1 == user_id)
                .map(|e| ViolationRecord {
                    chat_id,
                    user_id,
                    category: e.key().2.clone(),
                    count: *e.value(),
                    last_seen: Utc::now(),
                })
                .collect())
        }
    }

    #[derive(Default)]
    pub struct MemoryLockStore {
        locks: DashMap<i64, HashSet<LockTag>>,
    }

    #[async_trait]
    impl LockStore for MemoryLockStore {
        async fn insert_lock(&self, chat_id: i64, tag: LockTag) -> Result<bool, StoreError> {
            Ok(self.locks.entry(chat_id).or_default().insert(tag))
        }

        async fn remove_lock(&self, chat_id: i64, tag: LockTag) -> Result<bool, StoreError> {
            Ok(self
                .locks
                .get_mut(&chat_id)
                .map(|mut set| set.remove(&tag))
                .unwrap_or(false))
        }

        async fn active_locks(&self, chat_id: i64) -> Result<HashSet<LockTag>, StoreError> {
            Ok(self
                .locks
                .get(&chat_id)
                .map(|set| set.clone())
                .unwrap_or_default())
        }
    }
}

// Authorization tiers and per-module enforcement modes.
//
// Every enforcement module shares this resolver; none of them carry their
// own privilege logic. Tiers are computed on demand and never persisted.

use crate::core::enforcement::admin_directory::AdminDirectory;
use crate::core::enforcement::stores::{ApprovalStore, Module, StoreError};
use crate::core::platform::{ChatPlatform, PlatformError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// TIERS
// ============================================================================

/// Ordered privilege classification. Higher variants outrank lower ones;
/// the derived ordering is relied on by `should_enforce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Member,
    /// Module-scoped exemption row exists for this user.
    Approved,
    ChatAdmin,
    ChatOwner,
    Whitelist,
    Sudo,
    BotOwner,
}

impl Tier {
    /// Sudo and above bypass everything, including the manual-reload gate.
    pub fn is_privileged(&self) -> bool {
        *self >= Tier::Sudo
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::Member => "member",
            Tier::Approved => "approved",
            Tier::ChatAdmin => "admin",
            Tier::ChatOwner => "owner",
            Tier::Whitelist => "whitelist",
            Tier::Sudo => "sudo",
            Tier::BotOwner => "bot owner",
        };
        f.write_str(s)
    }
}

// ============================================================================
// MODES
// ============================================================================

/// Per-chat per-module enforcement strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    Off,
    Admin,
    Normal,
    Strict,
}

impl EnforcementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementMode::Off => "off",
            EnforcementMode::Admin => "admin",
            EnforcementMode::Normal => "normal",
            EnforcementMode::Strict => "strict",
        }
    }
}

impl std::fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid mode {0:?}, expected one of: off | admin | normal | strict")]
pub struct InvalidMode(pub String);

impl FromStr for EnforcementMode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(EnforcementMode::Off),
            "admin" => Ok(EnforcementMode::Admin),
            "normal" => Ok(EnforcementMode::Normal),
            "strict" => Ok(EnforcementMode::Strict),
            other => Err(InvalidMode(other.to_string())),
        }
    }
}

/// Whether a module in `mode` applies to a user of `tier`.
///
/// BotOwner, Sudo and Approved bypass every mode; `admin` additionally
/// exempts ChatAdmin and above, `normal` exempts ChatOwner and above,
/// `strict` exempts nobody else.
pub fn should_enforce(tier: Tier, mode: EnforcementMode) -> bool {
    match mode {
        EnforcementMode::Off => false,
        _ if matches!(tier, Tier::BotOwner | Tier::Sudo | Tier::Approved) => false,
        EnforcementMode::Admin => tier < Tier::ChatAdmin,
        EnforcementMode::Normal => tier < Tier::ChatOwner,
        EnforcementMode::Strict => true,
    }
}

// ============================================================================
// STATIC AUTHORITY
// ============================================================================

/// Deployment-level privilege lists, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthority {
    pub owner_id: i64,
    pub sudo_users: HashSet<i64>,
    pub whitelist_users: HashSet<i64>,
}

impl StaticAuthority {
    pub fn new(owner_id: i64, sudo_users: HashSet<i64>, whitelist_users: HashSet<i64>) -> Self {
        Self {
            owner_id,
            sudo_users,
            whitelist_users,
        }
    }

    /// Load from `OWNER_ID`, `SUDO_USERS`, `WHITELIST_USERS` env vars
    /// (comma-separated ids). Missing vars yield empty lists.
    pub fn from_env() -> Self {
        fn id_set(var: &str) -> HashSet<i64> {
            std::env::var(var)
                .unwrap_or_default()
                .split(',')
                .filter_map(|s| s.trim().parse::<i64>().ok())
                .collect()
        }

        Self {
            owner_id: std::env::var("OWNER_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            sudo_users: id_set("SUDO_USERS"),
            whitelist_users: id_set("WHITELIST_USERS"),
        }
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves a user's single highest tier in strict precedence order:
/// BotOwner > Sudo > Whitelist > ChatOwner > ChatAdmin > Approved > Member.
/// Read-only over its inputs.
pub struct PrivilegeResolver {
    authority: StaticAuthority,
    admins: Arc<AdminDirectory>,
    approvals: Arc<dyn ApprovalStore>,
    platform: Arc<dyn ChatPlatform>,
}

impl PrivilegeResolver {
    pub fn new(
        authority: StaticAuthority,
        admins: Arc<AdminDirectory>,
        approvals: Arc<dyn ApprovalStore>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Self {
        Self {
            authority,
            admins,
            approvals,
            platform,
        }
    }

    pub fn authority(&self) -> &StaticAuthority {
        &self.authority
    }

    pub fn platform(&self) -> &dyn ChatPlatform {
        self.platform.as_ref()
    }

    /// Resolve the tier of `user_id` in `chat_id` for `module`.
    ///
    /// The ownership query and admin-cache reload are the only platform
    /// calls; a failed ownership query downgrades to the admin check rather
    /// than failing resolution.
    pub async fn resolve(
        &self,
        chat_id: i64,
        user_id: i64,
        module: Module,
    ) -> Result<Tier, ResolveError> {
        if user_id == self.authority.owner_id {
            return Ok(Tier::BotOwner);
        }
        if self.authority.sudo_users.contains(&user_id) {
            return Ok(Tier::Sudo);
        }
        if self.authority.whitelist_users.contains(&user_id) {
            return Ok(Tier::Whitelist);
        }

        match self.platform.is_chat_owner(chat_id, user_id).await {
            Ok(true) => return Ok(Tier::ChatOwner),
            Ok(false) => {}
            Err(e) => tracing::debug!("ownership query failed for {user_id} in {chat_id}: {e}"),
        }

        let roster = match self.admins.lookup(chat_id) {
            Some(roster) => roster,
            None => self.admins.reload(chat_id, self.platform.as_ref()).await?,
        };
        if roster.iter().any(|a| a.user_id == user_id) {
            return Ok(Tier::ChatAdmin);
        }

        if self.approvals.is_approved(chat_id, module, user_id).await? {
            return Ok(Tier::Approved);
        }

        Ok(Tier::Member)
    }
}

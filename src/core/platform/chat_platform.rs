// Messaging-platform port - the only boundary the core talks to the chat
// service through.
//
// The concrete client (gateway, HTTP transport, update polling) lives outside
// this crate; tests use in-file mocks. Everything here is platform-agnostic
// except for the shape of the permission bitset and admin rights, which
// mirror what group-chat platforms expose.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors surfaced by the platform collaborator. All of these are transient
/// from the engine's point of view: they are swallowed or retried, never
/// allowed to abort unrelated event handling.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform asked us to back off. Callers sleep `retry_after` and
    /// retry at most once.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("bot lacks the required admin right")]
    AdminRequired,

    /// Requested state already matches current state (e.g. setting the
    /// permission bitset to its current value).
    #[error("nothing to modify")]
    NotModified,

    /// The target user cannot be acted on (another admin, left the chat, ...).
    #[error("cannot act on this user")]
    InvalidTarget,

    #[error("platform API error: {0}")]
    Api(String),
}

/// Run a platform call, honoring a single rate-limit backoff.
///
/// On `RateLimited` the caller sleeps the indicated duration and retries
/// exactly once; a second rate limit propagates. No other error is retried.
pub async fn with_flood_retry<T, F, Fut>(op: F) -> Result<T, PlatformError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    match op().await {
        Err(PlatformError::RateLimited { retry_after }) => {
            tokio::time::sleep(retry_after).await;
            op().await
        }
        other => other,
    }
}

// ============================================================================
// DOMAIN TYPES
// ============================================================================

/// One privileged member of a chat, as reported by the platform roster query.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminRecord {
    pub chat_id: i64,
    pub user_id: i64,
    pub display_name: String,
    pub is_anonymous: bool,
}

/// Minimal sender identity carried on events.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRef {
    pub user_id: i64,
    pub display_name: String,
    pub is_bot: bool,
}

/// Profile data fetched through the side-channel user lookup.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub display_name: String,
    pub biography: Option<String>,
}

/// The chat-wide permission bitset. Each field is a native permission flag
/// settable in a single platform mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatPermissions {
    pub can_send_messages: bool,
    pub can_send_media: bool,
    pub can_send_stickers: bool,
    pub can_send_animations: bool,
    pub can_send_games: bool,
    pub can_use_inline_bots: bool,
    pub can_add_web_previews: bool,
    pub can_send_polls: bool,
    pub can_change_info: bool,
    pub can_invite_users: bool,
    pub can_pin_messages: bool,
}

impl ChatPermissions {
    /// Everything allowed.
    pub fn all_open() -> Self {
        Self {
            can_send_messages: true,
            can_send_media: true,
            can_send_stickers: true,
            can_send_animations: true,
            can_send_games: true,
            can_use_inline_bots: true,
            can_add_web_previews: true,
            can_send_polls: true,
            can_change_info: true,
            can_invite_users: true,
            can_pin_messages: true,
        }
    }

    /// Everything locked - the "lock all" bitset.
    pub fn all_locked() -> Self {
        Self {
            can_send_messages: false,
            can_send_media: false,
            can_send_stickers: false,
            can_send_animations: false,
            can_send_games: false,
            can_use_inline_bots: false,
            can_add_web_previews: false,
            can_send_polls: false,
            can_change_info: false,
            can_invite_users: false,
            can_pin_messages: false,
        }
    }
}

impl Default for ChatPermissions {
    fn default() -> Self {
        Self::all_open()
    }
}

/// Rights granted when promoting a member. All default off; the promotion
/// session toggles them one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdminRights {
    pub can_manage_chat: bool,
    pub can_delete_messages: bool,
    pub can_restrict_members: bool,
    pub can_invite_users: bool,
    pub can_pin_messages: bool,
    pub can_change_info: bool,
    pub can_manage_video_chats: bool,
    pub can_post_messages: bool,
    pub can_edit_messages: bool,
}

impl AdminRights {
    pub fn any(&self) -> bool {
        self.can_manage_chat
            || self.can_delete_messages
            || self.can_restrict_members
            || self.can_invite_users
            || self.can_pin_messages
            || self.can_change_info
            || self.can_manage_video_chats
            || self.can_post_messages
            || self.can_edit_messages
    }
}

/// One togglable right, addressable from promotion-session callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRight {
    ManageChat,
    DeleteMessages,
    RestrictMembers,
    InviteUsers,
    PinMessages,
    ChangeInfo,
    ManageVideoChats,
    PostMessages,
    EditMessages,
}

impl AdminRights {
    pub fn toggle(&mut self, right: AdminRight) {
        let flag = match right {
            AdminRight::ManageChat => &mut self.can_manage_chat,
            AdminRight::DeleteMessages => &mut self.can_delete_messages,
            AdminRight::RestrictMembers => &mut self.can_restrict_members,
            AdminRight::InviteUsers => &mut self.can_invite_users,
            AdminRight::PinMessages => &mut self.can_pin_messages,
            AdminRight::ChangeInfo => &mut self.can_change_info,
            AdminRight::ManageVideoChats => &mut self.can_manage_video_chats,
            AdminRight::PostMessages => &mut self.can_post_messages,
            AdminRight::EditMessages => &mut self.can_edit_messages,
        };
        *flag = !*flag;
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Kind of attachment carried on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Photo,
    Video,
    VideoNote,
    Animation,
    Audio,
    Voice,
    Document,
    StickerStatic,
    StickerAnimated,
    StickerVideo,
    StickerPremium,
    Contact,
    Location,
    Poll,
    Game,
}

/// A media payload on an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub file_id: String,
    pub file_name: Option<String>,
    /// Declared dimensions, when the platform reports them (stickers, video
    /// notes). Zero when unknown.
    pub width: u32,
    pub height: u32,
}

/// Decoded forward-origin metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOrigin {
    User(i64),
    Channel(i64),
    Bot(i64),
    /// Linked-channel posts mirrored into the discussion group by the
    /// platform itself.
    AutomaticChannel,
}

/// Message entities reported by the platform alongside the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEntity {
    Url,
    TextLink,
    Mention,
    Email,
    Phone,
    Cashtag,
    BotCommand,
    Spoiler,
    CustomEmoji,
}

/// Platform-originated service notices (not authored by a member).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    MembersJoined,
    JoinedByLink,
    Other,
}

/// A normalized inbound message event. Both fresh messages and edits are
/// delivered in this shape; `edited` distinguishes them.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub chat_id: i64,
    pub message_id: i64,
    /// Absent for anonymous channel posts.
    pub sender: Option<UserRef>,
    /// Set when the message was posted on behalf of a chat rather than a
    /// user ("send as channel").
    pub sender_is_chat: bool,
    pub text: Option<String>,
    pub entities: Vec<TextEntity>,
    pub attachment: Option<Attachment>,
    /// Set when the message is part of a grouped-media album.
    pub media_group: bool,
    pub forward: Option<ForwardOrigin>,
    pub service: Option<ServiceKind>,
    pub new_members: Vec<UserRef>,
    pub edited: bool,
}

impl MessageEvent {
    /// Text or caption content, whichever is present.
    pub fn content(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

// ============================================================================
// PLATFORM PORT
// ============================================================================

/// Operations the enforcement engine needs from the messaging platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Full privileged-member roster for a chat.
    async fn chat_admins(&self, chat_id: i64) -> Result<Vec<AdminRecord>, PlatformError>;

    /// Whether the user holds chat ownership (distinct from adminship).
    async fn is_chat_owner(&self, chat_id: i64, user_id: i64) -> Result<bool, PlatformError>;

    async fn chat_permissions(&self, chat_id: i64) -> Result<ChatPermissions, PlatformError>;

    async fn set_chat_permissions(
        &self,
        chat_id: i64,
        permissions: ChatPermissions,
    ) -> Result<(), PlatformError>;

    async fn promote_member(
        &self,
        chat_id: i64,
        user_id: i64,
        rights: AdminRights,
    ) -> Result<(), PlatformError>;

    /// Ban a member, optionally until a given instant (temporary ban).
    async fn ban_member(
        &self,
        chat_id: i64,
        user_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), PlatformError>;

    async fn unban_member(&self, chat_id: i64, user_id: i64) -> Result<(), PlatformError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError>;

    /// Send a plain message; returns the new message id so transient
    /// notifications can delete themselves later.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, PlatformError>;

    /// Side-channel profile lookup (includes the biography text).
    async fn user_profile(&self, user_id: i64) -> Result<UserProfile, PlatformError>;

    /// File id of the user's newest profile photo, if any.
    async fn newest_profile_photo(&self, user_id: i64)
        -> Result<Option<String>, PlatformError>;

    /// Download an attachment to local storage.
    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<(), PlatformError>;
}

// ============================================================================
// TEST SUPPORT
// ============================================================================

/// In-memory platform fake shared by the core test suites.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakePlatform {
        pub admins: DashMap<i64, Vec<AdminRecord>>,
        pub owners: DashMap<i64, i64>,
        pub permissions: DashMap<i64, ChatPermissions>,
        pub profiles: DashMap<i64, UserProfile>,
        pub profile_photos: DashMap<i64, String>,
        pub files: DashMap<String, Vec<u8>>,
        pub deleted: Mutex<Vec<(i64, i64)>>,
        pub sent: Mutex<Vec<(i64, i64, String)>>,
        pub banned: Mutex<Vec<(i64, i64, Option<DateTime<Utc>>)>>,
        pub unbanned: Mutex<Vec<(i64, i64)>>,
        pub promoted: Mutex<Vec<(i64, i64, AdminRights)>>,
        pub fail_roster: AtomicBool,
        pub roster_fetches: AtomicI64,
        next_message_id: AtomicI64,
    }

    impl FakePlatform {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent_texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, _, t)| t.clone())
                .collect()
        }

        pub fn deleted_messages(&self) -> Vec<(i64, i64)> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatPlatform for FakePlatform {
        async fn chat_admins(&self, chat_id: i64) -> Result<Vec<AdminRecord>, PlatformError> {
            self.roster_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_roster.load(Ordering::SeqCst) {
                return Err(PlatformError::Api("roster unavailable".into()));
            }
            Ok(self.admins.get(&chat_id).map(|r| r.clone()).unwrap_or_default())
        }

        async fn is_chat_owner(&self, chat_id: i64, user_id: i64) -> Result<bool, PlatformError> {
            Ok(self.owners.get(&chat_id).map(|o| *o == user_id).unwrap_or(false))
        }

        async fn chat_permissions(&self, chat_id: i64) -> Result<ChatPermissions, PlatformError> {
            Ok(self
                .permissions
                .get(&chat_id)
                .map(|p| *p)
                .unwrap_or_default())
        }

        async fn set_chat_permissions(
            &self,
            chat_id: i64,
            permissions: ChatPermissions,
        ) -> Result<(), PlatformError> {
            self.permissions.insert(chat_id, permissions);
            Ok(())
        }

        async fn promote_member(
            &self,
            chat_id: i64,
            user_id: i64,
            rights: AdminRights,
        ) -> Result<(), PlatformError> {
            self.promoted.lock().unwrap().push((chat_id, user_id, rights));
            Ok(())
        }

        async fn ban_member(
            &self,
            chat_id: i64,
            user_id: i64,
            until: Option<DateTime<Utc>>,
        ) -> Result<(), PlatformError> {
            self.banned.lock().unwrap().push((chat_id, user_id, until));
            Ok(())
        }

        async fn unban_member(&self, chat_id: i64, user_id: i64) -> Result<(), PlatformError> {
            self.unbanned.lock().unwrap().push((chat_id, user_id));
            Ok(())
        }

        async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), PlatformError> {
            self.deleted.lock().unwrap().push((chat_id, message_id));
            Ok(())
        }

        async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, PlatformError> {
            let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1000;
            self.sent.lock().unwrap().push((chat_id, id, text.to_string()));
            Ok(id)
        }

        async fn user_profile(&self, user_id: i64) -> Result<UserProfile, PlatformError> {
            Ok(self
                .profiles
                .get(&user_id)
                .map(|p| p.clone())
                .unwrap_or_default())
        }

        async fn newest_profile_photo(
            &self,
            user_id: i64,
        ) -> Result<Option<String>, PlatformError> {
            Ok(self.profile_photos.get(&user_id).map(|f| f.clone()))
        }

        async fn download_file(&self, file_id: &str, dest: &Path) -> Result<(), PlatformError> {
            let bytes = self
                .files
                .get(file_id)
                .map(|b| b.clone())
                .ok_or_else(|| PlatformError::Api(format!("unknown file {file_id}")))?;
            std::fs::write(dest, bytes).map_err(|e| PlatformError::Api(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn flood_retry_retries_once_after_backoff() {
        let calls = AtomicU32::new(0);
        let result = with_flood_retry(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PlatformError::RateLimited {
                    retry_after: Duration::from_millis(5),
                })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flood_retry_gives_up_on_second_rate_limit() {
        let result: Result<(), _> = with_flood_retry(|| async {
            Err(PlatformError::RateLimited {
                retry_after: Duration::from_millis(1),
            })
        })
        .await;
        assert!(matches!(
            result,
            Err(PlatformError::RateLimited { .. })
        ));
    }

    #[test]
    fn rights_toggle_flips_exactly_one_flag() {
        let mut rights = AdminRights::default();
        assert!(!rights.any());
        rights.toggle(AdminRight::DeleteMessages);
        assert!(rights.can_delete_messages);
        assert!(rights.any());
        rights.toggle(AdminRight::DeleteMessages);
        assert!(!rights.any());
    }
}

// Lock categories and the lock/unlock service.
//
// A lock tag is a named class of content a chat can block independently.
// A small subset maps onto native permission bits and is enforced by the
// platform itself; the rest are classifier-driven and enforced by deleting
// offending messages. Alias tokens resolve through one table here and
// nowhere else.

use crate::core::enforcement::stores::{LockStore, StoreError};
use crate::core::platform::{ChatPermissions, ChatPlatform, PlatformError};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// TAGS
// ============================================================================

/// Canonical lock categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTag {
    All,
    Messages,
    Media,
    Photo,
    Video,
    Audio,
    Document,
    Gif,
    Sticker,
    StickerAnimated,
    StickerPremium,
    Voice,
    VideoNote,
    Poll,
    Invite,
    Pin,
    Info,
    WebPreview,
    InlineBots,
    Games,
    AnonChannel,
    ForwardAll,
    ForwardUser,
    ForwardChannel,
    ForwardBot,
    ForwardStory,
    Url,
    Bot,
    BotLink,
    Emoji,
    EmojiCustom,
    EmojiGame,
    EmojiOnly,
    Spoiler,
    Cashtag,
    Email,
    Phone,
    Contact,
    Location,
    Rtl,
    Cjk,
    Cyrillic,
    Zalgo,
    Command,
    Comment,
    Button,
    Checklist,
    Album,
    Text,
    ExternalReply,
}

impl LockTag {
    /// Canonical token, used for persistence and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockTag::All => "all",
            LockTag::Messages => "msg",
            LockTag::Media => "media",
            LockTag::Photo => "photo",
            LockTag::Video => "video",
            LockTag::Audio => "audio",
            LockTag::Document => "document",
            LockTag::Gif => "gif",
            LockTag::Sticker => "sticker",
            LockTag::StickerAnimated => "stickeranimate",
            LockTag::StickerPremium => "stickerpremium",
            LockTag::Voice => "voice",
            LockTag::VideoNote => "videonote",
            LockTag::Poll => "poll",
            LockTag::Invite => "invite",
            LockTag::Pin => "pin",
            LockTag::Info => "info",
            LockTag::WebPreview => "webprev",
            LockTag::InlineBots => "inline",
            LockTag::Games => "games",
            LockTag::AnonChannel => "anonchannel",
            LockTag::ForwardAll => "forward",
            LockTag::ForwardUser => "forwarduser",
            LockTag::ForwardChannel => "forwardchannel",
            LockTag::ForwardBot => "forwardbot",
            LockTag::ForwardStory => "forwardstory",
            LockTag::Url => "url",
            LockTag::Bot => "bot",
            LockTag::BotLink => "botlink",
            LockTag::Emoji => "emoji",
            LockTag::EmojiCustom => "emojicustom",
            LockTag::EmojiGame => "emojigame",
            LockTag::EmojiOnly => "emojionly",
            LockTag::Spoiler => "spoiler",
            LockTag::Cashtag => "cashtag",
            LockTag::Email => "email",
            LockTag::Phone => "phone",
            LockTag::Contact => "contact",
            LockTag::Location => "location",
            LockTag::Rtl => "rtl",
            LockTag::Cjk => "cjk",
            LockTag::Cyrillic => "cyrillic",
            LockTag::Zalgo => "zalgo",
            LockTag::Command => "command",
            LockTag::Comment => "comment",
            LockTag::Button => "button",
            LockTag::Checklist => "checklist",
            LockTag::Album => "album",
            LockTag::Text => "text",
            LockTag::ExternalReply => "externalreply",
        }
    }

    /// Resolve a user-supplied token, including every historical alias.
    pub fn parse(token: &str) -> Option<LockTag> {
        let tag = match token.trim().to_ascii_lowercase().as_str() {
            "all" => LockTag::All,
            "msg" | "messages" => LockTag::Messages,
            "media" => LockTag::Media,
            "photo" => LockTag::Photo,
            "video" => LockTag::Video,
            "audio" => LockTag::Audio,
            "document" => LockTag::Document,
            "gif" | "animations" => LockTag::Gif,
            "sticker" | "stickers" => LockTag::Sticker,
            "stickeranimate" => LockTag::StickerAnimated,
            "stickerpremium" => LockTag::StickerPremium,
            "voice" => LockTag::Voice,
            "videonote" => LockTag::VideoNote,
            "poll" | "polls" => LockTag::Poll,
            "invite" | "invitelink" => LockTag::Invite,
            "pin" => LockTag::Pin,
            "info" => LockTag::Info,
            "webprev" => LockTag::WebPreview,
            "inline" | "inlinebots" => LockTag::InlineBots,
            "games" | "game" => LockTag::Games,
            "anonchannel" => LockTag::AnonChannel,
            "forward" | "forwardall" => LockTag::ForwardAll,
            "forwardu" | "forwarduser" => LockTag::ForwardUser,
            "forwardc" | "forwardchannel" => LockTag::ForwardChannel,
            "forwardbot" => LockTag::ForwardBot,
            "forwardstory" => LockTag::ForwardStory,
            "url" | "links" => LockTag::Url,
            "bot" => LockTag::Bot,
            "botlink" => LockTag::BotLink,
            "emoji" => LockTag::Emoji,
            "emojicustom" => LockTag::EmojiCustom,
            "emojigame" => LockTag::EmojiGame,
            "emojionly" => LockTag::EmojiOnly,
            "spoiler" => LockTag::Spoiler,
            "cashtag" => LockTag::Cashtag,
            "email" => LockTag::Email,
            "phone" => LockTag::Phone,
            "contact" => LockTag::Contact,
            "location" => LockTag::Location,
            "rtl" => LockTag::Rtl,
            "cjk" => LockTag::Cjk,
            "cyrillic" => LockTag::Cyrillic,
            "zalgo" => LockTag::Zalgo,
            "command" => LockTag::Command,
            "comment" => LockTag::Comment,
            "button" => LockTag::Button,
            "checklist" => LockTag::Checklist,
            "album" => LockTag::Album,
            "text" => LockTag::Text,
            "externalreply" => LockTag::ExternalReply,
            _ => return None,
        };
        Some(tag)
    }

    /// Flip this tag's native permission bit, if it has one. Returns false
    /// for classifier-driven tags (nothing changed).
    pub fn set_native(&self, permissions: &mut ChatPermissions, allowed: bool) -> bool {
        let bit = match self {
            LockTag::Messages => &mut permissions.can_send_messages,
            LockTag::Media => &mut permissions.can_send_media,
            LockTag::Sticker => &mut permissions.can_send_stickers,
            LockTag::Gif => &mut permissions.can_send_animations,
            LockTag::Games => &mut permissions.can_send_games,
            LockTag::InlineBots => &mut permissions.can_use_inline_bots,
            LockTag::WebPreview => &mut permissions.can_add_web_previews,
            LockTag::Poll => &mut permissions.can_send_polls,
            LockTag::Info => &mut permissions.can_change_info,
            LockTag::Invite => &mut permissions.can_invite_users,
            LockTag::Pin => &mut permissions.can_pin_messages,
            _ => return false,
        };
        *bit = allowed;
        true
    }

    pub fn is_native(&self) -> bool {
        let mut scratch = ChatPermissions::all_open();
        self.set_native(&mut scratch, false)
    }
}

impl std::fmt::Display for LockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Debug, Error)]
pub enum LockError {
    #[error("unknown lock type {0:?}")]
    UnknownTag(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a lock/unlock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockChange {
    Applied(LockTag),
    /// Idempotent no-op: the tag was already in the requested state.
    Unchanged(LockTag),
}

/// Current lock state of a chat, for the view command.
#[derive(Debug, Clone)]
pub struct LockOverview {
    pub permissions: ChatPermissions,
    pub tags: Vec<LockTag>,
}

pub struct LockService {
    store: Arc<dyn LockStore>,
    platform: Arc<dyn ChatPlatform>,
}

impl LockService {
    pub fn new(store: Arc<dyn LockStore>, platform: Arc<dyn ChatPlatform>) -> Self {
        Self { store, platform }
    }

    pub async fn lock(&self, chat_id: i64, token: &str) -> Result<LockChange, LockError> {
        let tag = LockTag::parse(token).ok_or_else(|| LockError::UnknownTag(token.into()))?;
        self.apply(chat_id, tag, false).await
    }

    pub async fn unlock(&self, chat_id: i64, token: &str) -> Result<LockChange, LockError> {
        let tag = LockTag::parse(token).ok_or_else(|| LockError::UnknownTag(token.into()))?;
        self.apply(chat_id, tag, true).await
    }

    async fn apply(&self, chat_id: i64, tag: LockTag, allow: bool) -> Result<LockChange, LockError> {
        if tag == LockTag::All {
            let bitset = if allow {
                ChatPermissions::all_open()
            } else {
                ChatPermissions::all_locked()
            };
            match self.platform.set_chat_permissions(chat_id, bitset).await {
                Ok(()) | Err(PlatformError::NotModified) => {}
                Err(e) => return Err(e.into()),
            }
            if allow {
                self.store.remove_lock(chat_id, LockTag::All).await?;
            } else {
                self.store.insert_lock(chat_id, LockTag::All).await?;
            }
            return Ok(LockChange::Applied(LockTag::All));
        }

        let mut permissions = self.platform.chat_permissions(chat_id).await?;
        if tag.set_native(&mut permissions, allow) {
            match self.platform.set_chat_permissions(chat_id, permissions).await {
                Ok(()) => Ok(LockChange::Applied(tag)),
                Err(PlatformError::NotModified) => Ok(LockChange::Unchanged(tag)),
                Err(e) => Err(e.into()),
            }
        } else {
            let changed = if allow {
                self.store.remove_lock(chat_id, tag).await?
            } else {
                self.store.insert_lock(chat_id, tag).await?
            };
            Ok(if changed {
                LockChange::Applied(tag)
            } else {
                LockChange::Unchanged(tag)
            })
        }
    }

    pub async fn overview(&self, chat_id: i64) -> Result<LockOverview, LockError> {
        let permissions = self.platform.chat_permissions(chat_id).await?;
        let mut tags: Vec<LockTag> = self.store.active_locks(chat_id).await?.into_iter().collect();
        tags.sort_by_key(|t| t.as_str());
        Ok(LockOverview { permissions, tags })
    }
}

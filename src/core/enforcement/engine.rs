// The enforcement engine: wires config, privilege resolution, content
// classification and side effects together, per module, per event.
//
// Side effects never roll back: a deleted message stays deleted even when
// the follow-up ledger write fails. Platform and classifier failures inside
// event handling are logged and swallowed so one flaky collaborator cannot
// take unrelated moderation down with it.

use crate::core::classify::{
    classify_detections, classify_forward, lock_tags_for, text_patterns, ForwardClass,
    MediaNormalizer, NsfwClassifier, ObjectClassifier, TextPatternClassifier,
};
use crate::core::enforcement::locks::LockTag;
use crate::core::enforcement::stores::{
    ConfigStore, LockStore, Module, ModuleConfig, ViolationLedger,
};
use crate::core::enforcement::tier::{should_enforce, EnforcementMode, PrivilegeResolver};
use crate::core::platform::{
    with_flood_retry, Attachment, AttachmentKind, ChatPlatform, MessageEvent, TextEntity, UserRef,
};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Lock and length warnings: short-lived.
const SHORT_NOTICE: Duration = Duration::from_secs(8);
/// Classification reports: a little longer so the room sees why.
const LONG_NOTICE: Duration = Duration::from_secs(15);

/// Bots added while the `bot` lock is active are banned for this long.
const BOT_JOIN_BAN: chrono::Duration = chrono::Duration::minutes(5);

/// Document extensions deleted before any download or classification.
const BLOCKED_EXTENSIONS: &[&str] = &[
    ".exe", ".bat", ".sh", ".apk", ".ipa", ".cmd", ".vbs", ".msi", ".dll", ".scr",
];

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".gif", ".bmp"];

pub struct EnforcementEngine {
    platform: Arc<dyn ChatPlatform>,
    config: Arc<dyn ConfigStore>,
    resolver: Arc<PrivilegeResolver>,
    locks: Arc<dyn LockStore>,
    ledger: Arc<dyn ViolationLedger>,
    normalizer: Arc<MediaNormalizer>,
    nsfw: Arc<dyn NsfwClassifier>,
    objects: Arc<dyn ObjectClassifier>,
    text: TextPatternClassifier,
}

impl EnforcementEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        config: Arc<dyn ConfigStore>,
        resolver: Arc<PrivilegeResolver>,
        locks: Arc<dyn LockStore>,
        ledger: Arc<dyn ViolationLedger>,
        normalizer: Arc<MediaNormalizer>,
        nsfw: Arc<dyn NsfwClassifier>,
        objects: Arc<dyn ObjectClassifier>,
    ) -> Self {
        Self {
            platform,
            config,
            resolver,
            locks,
            ledger,
            normalizer,
            nsfw,
            objects,
            text: TextPatternClassifier::new(),
        }
    }

    /// Entry point for every inbound event. Each call is independently
    /// schedulable; callers spawn one task per event.
    pub async fn handle_event(&self, event: &MessageEvent) {
        if !event.new_members.is_empty() {
            self.handle_member_join(event).await;
            return;
        }
        if event.edited {
            self.run_anti_edit(event).await;
            return;
        }
        self.run_locks(event).await;
        self.run_nsfw(event).await;
        self.run_biolink(event).await;
        self.run_anti_long(event).await;
    }

    // ========================================================================
    // MODULE GATE
    // ========================================================================

    /// Config + tier gate shared by every module. `None` means the module
    /// does not apply to this user right now.
    async fn module_applies(
        &self,
        chat_id: i64,
        user_id: i64,
        module: Module,
    ) -> Option<ModuleConfig> {
        let config = match self.config.get_config(chat_id, module).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("config read failed for {module} in {chat_id}: {e}");
                return None;
            }
        };
        if config.mode == EnforcementMode::Off {
            return None;
        }

        let tier = match self.resolver.resolve(chat_id, user_id, module).await {
            Ok(tier) => tier,
            Err(e) => {
                tracing::warn!("tier resolution failed for {user_id} in {chat_id}: {e}");
                return None;
            }
        };
        should_enforce(tier, config.mode).then_some(config)
    }

    // ========================================================================
    // LOCKS
    // ========================================================================

    async fn run_locks(&self, event: &MessageEvent) {
        // Platform-originated service notices are exempt from every lock.
        if event.service.is_some() {
            return;
        }

        let active = match self.locks.active_locks(event.chat_id).await {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!("lock read failed for {}: {e}", event.chat_id);
                return;
            }
        };
        if active.is_empty() {
            return;
        }

        // "Send as channel" posts have no user tier; the anonchannel lock
        // is the only one that applies to them.
        if event.sender_is_chat {
            if active.contains(&LockTag::AnonChannel) && self.locks_enabled(event.chat_id).await {
                self.delete_best_effort(event.chat_id, event.message_id).await;
                self.notify_transient(
                    event.chat_id,
                    "Channel posts are not allowed here.".to_string(),
                    SHORT_NOTICE,
                );
            }
            return;
        }

        let Some(sender) = &event.sender else { return };
        if self
            .module_applies(event.chat_id, sender.user_id, Module::Locks)
            .await
            .is_none()
        {
            return;
        }

        let Some(tag) = self.triggered_lock(event, &active) else {
            return;
        };
        self.delete_best_effort(event.chat_id, event.message_id).await;
        self.notify_transient(
            event.chat_id,
            format!("Locked content ({tag}) is not allowed here."),
            SHORT_NOTICE,
        );
    }

    /// Whether the locks module is enabled at all, ignoring tiers. Used for
    /// senders that have no tier (channels).
    async fn locks_enabled(&self, chat_id: i64) -> bool {
        self.config
            .get_config(chat_id, Module::Locks)
            .await
            .map(|c| c.mode != EnforcementMode::Off)
            .unwrap_or(false)
    }

    /// First active lock the message trips, in a fixed check order.
    fn triggered_lock(&self, event: &MessageEvent, active: &HashSet<LockTag>) -> Option<LockTag> {
        let content = event.content();

        if let Some(origin) = &event.forward {
            let class = classify_forward(origin);
            if class != ForwardClass::Automatic {
                if active.contains(&LockTag::ForwardAll) {
                    return Some(LockTag::ForwardAll);
                }
                let specific = match class {
                    ForwardClass::FromUser => LockTag::ForwardUser,
                    ForwardClass::FromChannel => LockTag::ForwardChannel,
                    ForwardClass::FromBot => LockTag::ForwardBot,
                    ForwardClass::Automatic => unreachable!(),
                };
                if active.contains(&specific) {
                    return Some(specific);
                }
            }
        }

        // The album tag is about the grouping, not the media kind; a lone
        // photo or video never trips it.
        if event.media_group && active.contains(&LockTag::Album) {
            return Some(LockTag::Album);
        }

        if let Some(attachment) = &event.attachment {
            for tag in lock_tags_for(attachment.kind) {
                if active.contains(tag) {
                    return Some(*tag);
                }
            }
        }

        for entity in &event.entities {
            let tag = match entity {
                TextEntity::Url | TextEntity::TextLink => LockTag::Url,
                TextEntity::Mention => continue,
                TextEntity::Email => LockTag::Email,
                TextEntity::Phone => LockTag::Phone,
                TextEntity::Cashtag => LockTag::Cashtag,
                TextEntity::BotCommand => LockTag::Command,
                TextEntity::Spoiler => LockTag::Spoiler,
                TextEntity::CustomEmoji => LockTag::EmojiCustom,
            };
            if active.contains(&tag) {
                return Some(tag);
            }
        }

        if !content.is_empty() {
            if active.contains(&LockTag::BotLink) && self.text.has_bot_link(content) {
                return Some(LockTag::BotLink);
            }
            if active.contains(&LockTag::Url) && self.text.has_link(content) {
                return Some(LockTag::Url);
            }
            if active.contains(&LockTag::Rtl) && text_patterns::has_rtl(content) {
                return Some(LockTag::Rtl);
            }
            if active.contains(&LockTag::Cjk) && text_patterns::has_cjk(content) {
                return Some(LockTag::Cjk);
            }
            if active.contains(&LockTag::Cyrillic) && text_patterns::has_cyrillic(content) {
                return Some(LockTag::Cyrillic);
            }
            if active.contains(&LockTag::Zalgo) && text_patterns::is_zalgo(content) {
                return Some(LockTag::Zalgo);
            }
            if active.contains(&LockTag::EmojiOnly) && text_patterns::is_emoji_only(content) {
                return Some(LockTag::EmojiOnly);
            }
            if active.contains(&LockTag::Emoji) && text_patterns::has_emoji(content) {
                return Some(LockTag::Emoji);
            }
            if active.contains(&LockTag::Text) {
                return Some(LockTag::Text);
            }
        }

        None
    }

    // ========================================================================
    // NSFW
    // ========================================================================

    async fn run_nsfw(&self, event: &MessageEvent) {
        let Some(attachment) = &event.attachment else {
            return;
        };
        let Some(sender) = &event.sender else { return };
        if self
            .module_applies(event.chat_id, sender.user_id, Module::Nsfw)
            .await
            .is_none()
        {
            return;
        }

        // Executable attachments go before anything touches the disk.
        if has_blocked_extension(attachment) {
            self.delete_best_effort(event.chat_id, event.message_id).await;
            self.notify_transient(
                event.chat_id,
                "Potentially dangerous file deleted.".to_string(),
                SHORT_NOTICE,
            );
            return;
        }
        if !is_classifiable(attachment) {
            return;
        }

        let Some(image) = self.fetch_and_normalize(attachment).await else {
            return;
        };

        match self.nsfw.score(image.path()).await {
            Ok(scores) => {
                if let Some(category) = scores.triggered() {
                    self.delete_best_effort(event.chat_id, event.message_id).await;
                    let count = self
                        .record_violation(event.chat_id, sender.user_id, category.as_str())
                        .await;
                    self.notify_transient(
                        event.chat_id,
                        format!(
                            "Removed NSFW content ({}) from {}.{}",
                            category.as_str(),
                            sender.display_name,
                            strike_note(count)
                        ),
                        LONG_NOTICE,
                    );
                    return;
                }
            }
            Err(e) => tracing::debug!("nsfw scoring failed: {e}"),
        }

        match self.objects.detect(image.path()).await {
            Ok(detections) => {
                if let Some(kind) = classify_detections(&detections) {
                    self.delete_best_effort(event.chat_id, event.message_id).await;
                    let count = self
                        .record_violation(event.chat_id, sender.user_id, kind.as_str())
                        .await;
                    self.notify_transient(
                        event.chat_id,
                        format!(
                            "Removed prohibited content ({}) from {}.{}",
                            kind.as_str(),
                            sender.display_name,
                            strike_note(count)
                        ),
                        LONG_NOTICE,
                    );
                }
            }
            Err(e) => tracing::debug!("object detection failed: {e}"),
        }
    }

    /// Download an attachment into scratch storage and normalize it to one
    /// still image. Any failure is "nothing to classify".
    async fn fetch_and_normalize(
        &self,
        attachment: &Attachment,
    ) -> Option<crate::core::classify::NormalizedImage> {
        let download = self.normalizer.download_target(attachment_ext(attachment));
        if let Err(e) = self
            .platform
            .download_file(&attachment.file_id, download.path())
            .await
        {
            tracing::debug!("download failed for {}: {e}", attachment.file_id);
            return None;
        }
        // The download guard outlives normalization only; passthrough
        // outputs borrow its path, so hold both in the returned image.
        let image = self.normalizer.normalize(attachment, download.path()).await?;
        Some(crate::core::classify::NormalizedImage::adopt(image, download))
    }

    // ========================================================================
    // BIOLINK
    // ========================================================================

    async fn run_biolink(&self, event: &MessageEvent) {
        let Some(sender) = &event.sender else { return };
        if self
            .module_applies(event.chat_id, sender.user_id, Module::BioLink)
            .await
            .is_none()
        {
            return;
        }

        let profile = match self.platform.user_profile(sender.user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::debug!("profile lookup failed for {}: {e}", sender.user_id);
                return;
            }
        };
        let Some(bio) = profile.biography else { return };
        if !self.text.has_link(&bio) {
            return;
        }

        self.delete_best_effort(event.chat_id, event.message_id).await;
        let count = self
            .record_violation(event.chat_id, sender.user_id, "biolink")
            .await;
        self.notify_transient(
            event.chat_id,
            format!(
                "{}, remove the link from your bio to chat here.{}",
                sender.display_name,
                strike_note(count)
            ),
            LONG_NOTICE,
        );
    }

    // ========================================================================
    // ANTI-EDIT / ANTI-LONG
    // ========================================================================

    async fn run_anti_edit(&self, event: &MessageEvent) {
        let Some(sender) = &event.sender else { return };
        if self
            .module_applies(event.chat_id, sender.user_id, Module::AntiEdit)
            .await
            .is_none()
        {
            return;
        }
        self.delete_best_effort(event.chat_id, event.message_id).await;
        self.notify_transient(
            event.chat_id,
            "Edited messages are not allowed here.".to_string(),
            SHORT_NOTICE,
        );
    }

    async fn run_anti_long(&self, event: &MessageEvent) {
        let Some(sender) = &event.sender else { return };
        let Some(config) = self
            .module_applies(event.chat_id, sender.user_id, Module::AntiLong)
            .await
        else {
            return;
        };
        if !TextPatternClassifier::exceeds_limit(event.content(), config.long_limit) {
            return;
        }
        self.delete_best_effort(event.chat_id, event.message_id).await;
        self.notify_transient(
            event.chat_id,
            format!(
                "Message over the {}-word limit was removed.",
                config.long_limit
            ),
            SHORT_NOTICE,
        );
    }

    // ========================================================================
    // MEMBER JOIN
    // ========================================================================

    async fn handle_member_join(&self, event: &MessageEvent) {
        for member in &event.new_members {
            if member.is_bot {
                self.screen_joining_bot(event, member).await;
            } else {
                self.screen_profile_photo(event.chat_id, member).await;
            }
        }
    }

    /// The `bot` lock: bots added by non-exempt members get a short
    /// temporary ban.
    async fn screen_joining_bot(&self, event: &MessageEvent, bot: &UserRef) {
        let active = match self.locks.active_locks(event.chat_id).await {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!("lock read failed for {}: {e}", event.chat_id);
                return;
            }
        };
        if !active.contains(&LockTag::Bot) {
            return;
        }
        // The adder's tier decides, not the bot's.
        if let Some(adder) = &event.sender {
            if self
                .module_applies(event.chat_id, adder.user_id, Module::Locks)
                .await
                .is_none()
            {
                return;
            }
        }

        let until = Utc::now() + BOT_JOIN_BAN;
        let result = with_flood_retry(|| {
            self.platform
                .ban_member(event.chat_id, bot.user_id, Some(until))
        })
        .await;
        if let Err(e) = result {
            tracing::warn!("bot-join ban failed for {} in {}: {e}", bot.user_id, event.chat_id);
            return;
        }
        self.notify_transient(
            event.chat_id,
            format!("Bots are locked here; {} was removed.", bot.display_name),
            SHORT_NOTICE,
        );
    }

    /// NSFW screening of a joining user's newest profile photo; a hit means
    /// a kick (ban immediately followed by unban) and a `pfp_` violation.
    async fn screen_profile_photo(&self, chat_id: i64, member: &UserRef) {
        if self
            .module_applies(chat_id, member.user_id, Module::Nsfw)
            .await
            .is_none()
        {
            return;
        }
        let file_id = match self.platform.newest_profile_photo(member.user_id).await {
            Ok(Some(file_id)) => file_id,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!("profile photo lookup failed for {}: {e}", member.user_id);
                return;
            }
        };

        let attachment = Attachment {
            kind: AttachmentKind::Photo,
            file_id,
            file_name: None,
            width: 0,
            height: 0,
        };
        let Some(image) = self.fetch_and_normalize(&attachment).await else {
            return;
        };
        let category = match self.nsfw.score(image.path()).await {
            Ok(scores) => scores.triggered(),
            Err(e) => {
                tracing::debug!("pfp scoring failed: {e}");
                None
            }
        };
        let Some(category) = category else { return };

        if let Err(e) = with_flood_retry(|| self.platform.ban_member(chat_id, member.user_id, None)).await
        {
            tracing::warn!("pfp kick (ban) failed for {} in {chat_id}: {e}", member.user_id);
            return;
        }
        if let Err(e) = with_flood_retry(|| self.platform.unban_member(chat_id, member.user_id)).await
        {
            tracing::warn!("pfp kick (unban) failed for {} in {chat_id}: {e}", member.user_id);
        }
        let count = self
            .record_violation(chat_id, member.user_id, &format!("pfp_{}", category.as_str()))
            .await;
        self.notify_transient(
            chat_id,
            format!(
                "{} was removed for an NSFW profile photo ({}).{}",
                member.display_name,
                category.as_str(),
                strike_note(count)
            ),
            LONG_NOTICE,
        );
    }

    // ========================================================================
    // SIDE EFFECTS
    // ========================================================================

    async fn delete_best_effort(&self, chat_id: i64, message_id: i64) {
        let result = with_flood_retry(|| self.platform.delete_message(chat_id, message_id)).await;
        if let Err(e) = result {
            tracing::debug!("delete failed for {message_id} in {chat_id}: {e}");
        }
    }

    /// Ledger failures are logged, never propagated into event handling.
    /// `None` means the strike count is unknown and must not be announced.
    async fn record_violation(&self, chat_id: i64, user_id: i64, category: &str) -> Option<u32> {
        match self.ledger.record(chat_id, user_id, category).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!("violation write failed for {user_id} in {chat_id}: {e}");
                None
            }
        }
    }

    /// Fire-and-forget notice that deletes itself after `ttl`. Dropping the
    /// originating event does not cancel the scheduled deletion.
    fn notify_transient(&self, chat_id: i64, text: String, ttl: Duration) {
        let platform = Arc::clone(&self.platform);
        tokio::spawn(async move {
            let message_id = match with_flood_retry(|| platform.send_message(chat_id, &text)).await
            {
                Ok(id) => id,
                Err(e) => {
                    tracing::debug!("transient notice failed in {chat_id}: {e}");
                    return;
                }
            };
            tokio::time::sleep(ttl).await;
            if let Err(e) = with_flood_retry(|| platform.delete_message(chat_id, message_id)).await
            {
                tracing::debug!("transient notice cleanup failed in {chat_id}: {e}");
            }
        });
    }
}

/// Strike sentence appended to removal notices, empty when the count is
/// unknown.
fn strike_note(count: Option<u32>) -> String {
    match count {
        Some(count) => format!(" Strike {count}."),
        None => String::new(),
    }
}

fn has_blocked_extension(attachment: &Attachment) -> bool {
    let Some(name) = &attachment.file_name else {
        return false;
    };
    let name = name.to_lowercase();
    BLOCKED_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Attachments worth downloading for image classification.
fn is_classifiable(attachment: &Attachment) -> bool {
    match attachment.kind {
        AttachmentKind::Photo
        | AttachmentKind::Video
        | AttachmentKind::VideoNote
        | AttachmentKind::Animation
        | AttachmentKind::StickerStatic
        | AttachmentKind::StickerAnimated
        | AttachmentKind::StickerVideo
        | AttachmentKind::StickerPremium => true,
        AttachmentKind::Document => attachment
            .file_name
            .as_deref()
            .map(|name| {
                let name = name.to_lowercase();
                IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
            })
            .unwrap_or(false),
        _ => false,
    }
}

fn attachment_ext(attachment: &Attachment) -> &'static str {
    match attachment.kind {
        AttachmentKind::Photo | AttachmentKind::Document => "jpg",
        AttachmentKind::StickerStatic | AttachmentKind::StickerPremium => "webp",
        AttachmentKind::StickerAnimated => "tgs",
        AttachmentKind::StickerVideo | AttachmentKind::Video | AttachmentKind::Animation => "webm",
        AttachmentKind::VideoNote => "mp4",
        _ => "bin",
    }
}

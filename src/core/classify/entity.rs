// Attachment-kind classification: maps what a message carries onto the lock
// categories it can trigger.
//
// The full tag superset is recognized here even though only a subset maps
// to native permission bits; which tags actually fire depends on what the
// chat has locked.

use crate::core::enforcement::locks::LockTag;
use crate::core::platform::AttachmentKind;

/// Lock tags an attachment of this kind can trigger, most specific first.
pub fn lock_tags_for(kind: AttachmentKind) -> &'static [LockTag] {
    match kind {
        AttachmentKind::Photo => &[LockTag::Photo],
        AttachmentKind::Video => &[LockTag::Video],
        AttachmentKind::VideoNote => &[LockTag::VideoNote],
        AttachmentKind::Animation => &[LockTag::Gif],
        AttachmentKind::Audio => &[LockTag::Audio],
        AttachmentKind::Voice => &[LockTag::Voice],
        AttachmentKind::Document => &[LockTag::Document],
        AttachmentKind::StickerStatic => &[LockTag::Sticker],
        AttachmentKind::StickerAnimated => &[LockTag::StickerAnimated, LockTag::Sticker],
        AttachmentKind::StickerVideo => &[LockTag::StickerAnimated, LockTag::Sticker],
        AttachmentKind::StickerPremium => &[LockTag::StickerPremium, LockTag::Sticker],
        AttachmentKind::Contact => &[LockTag::Contact],
        AttachmentKind::Location => &[LockTag::Location],
        AttachmentKind::Poll => &[LockTag::Poll],
        AttachmentKind::Game => &[LockTag::Games],
    }
}

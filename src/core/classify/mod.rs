// Content-classification suite: text patterns, forward origins, attachment
// kinds, media normalization and the external image classifiers.

pub mod entity;
pub mod forward;
pub mod media;
pub mod nsfw;
pub mod text_patterns;

pub use entity::lock_tags_for;
pub use forward::{classify_forward, ForwardClass};
pub use media::{FrameDecoder, MediaNormalizer, NormalizedImage, ScratchFile};
pub use nsfw::{
    classify_detections, ContrabandKind, Detection, NsfwCategory, NsfwClassifier, NsfwScores,
    ObjectClassifier,
};
pub use text_patterns::TextPatternClassifier;

use thiserror::Error;

/// Classifier failures are never surfaced to chat; callers treat them as
/// "no classification".
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier backend: {0}")]
    Backend(String),

    #[error("media decode: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

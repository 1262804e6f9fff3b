// Media normalization - turns any attachment into one still image the
// external classifiers can consume.
//
// Static stickers decode directly; vector-animated stickers are gzip-packed
// animation JSON from which we pull the first embedded raster asset (or
// synthesize a blank canvas at the declared size); videos and video stickers
// go through a first-frame decoder with a fallback. Every intermediate file
// we create is deleted on every exit path; normalization failures mean
// "no classification", never an error.

use crate::core::classify::ClassifierError;
use crate::core::platform::{Attachment, AttachmentKind};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A scratch file that is removed when dropped.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// A still image ready for classification. When it owns a scratch file, the
/// file is deleted once the image goes out of scope; pass-through sources
/// (photos, image documents) are left alone.
#[derive(Debug)]
pub struct NormalizedImage {
    path: PathBuf,
    _scratch: Option<ScratchFile>,
    _source: Option<ScratchFile>,
}

impl NormalizedImage {
    fn passthrough(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            _scratch: None,
            _source: None,
        }
    }

    fn scratch(file: ScratchFile) -> Self {
        Self {
            path: file.path().to_path_buf(),
            _scratch: Some(file),
            _source: None,
        }
    }

    /// Tie a caller-managed download to the image's lifetime, so the raw
    /// source file is cleaned up together with the decoded frame.
    pub fn adopt(image: NormalizedImage, source: ScratchFile) -> NormalizedImage {
        NormalizedImage {
            _source: Some(source),
            ..image
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Extracts the first frame of a video container into a still image.
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    async fn first_frame(&self, input: &Path, output: &Path) -> Result<(), ClassifierError>;
}

pub struct MediaNormalizer {
    scratch_dir: PathBuf,
    primary: Arc<dyn FrameDecoder>,
    secondary: Arc<dyn FrameDecoder>,
}

impl MediaNormalizer {
    pub fn new(
        scratch_dir: impl Into<PathBuf>,
        primary: Arc<dyn FrameDecoder>,
        secondary: Arc<dyn FrameDecoder>,
    ) -> Self {
        let scratch_dir = scratch_dir.into();
        let _ = std::fs::create_dir_all(&scratch_dir);
        Self {
            scratch_dir,
            primary,
            secondary,
        }
    }

    /// Convert a downloaded attachment into one still image. `None` means
    /// the attachment cannot be classified; failures are logged, not
    /// surfaced.
    pub async fn normalize(&self, attachment: &Attachment, source: &Path) -> Option<NormalizedImage> {
        match self.try_normalize(attachment, source).await {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!(
                    file_id = %attachment.file_id,
                    "media normalization failed: {e}"
                );
                None
            }
        }
    }

    async fn try_normalize(
        &self,
        attachment: &Attachment,
        source: &Path,
    ) -> Result<Option<NormalizedImage>, ClassifierError> {
        match attachment.kind {
            AttachmentKind::Photo | AttachmentKind::Document => {
                Ok(Some(NormalizedImage::passthrough(source)))
            }

            AttachmentKind::StickerStatic | AttachmentKind::StickerPremium => {
                let scratch = self.frame_target();
                let src = source.to_path_buf();
                let dst = scratch.path().to_path_buf();
                run_blocking(move || decode_still(&src, &dst)).await?;
                Ok(Some(NormalizedImage::scratch(scratch)))
            }

            AttachmentKind::StickerAnimated => {
                let scratch = self.frame_target();
                let src = source.to_path_buf();
                let dst = scratch.path().to_path_buf();
                let declared = (attachment.width, attachment.height);
                run_blocking(move || extract_vector_raster(&src, &dst, declared)).await?;
                Ok(Some(NormalizedImage::scratch(scratch)))
            }

            AttachmentKind::Video
            | AttachmentKind::VideoNote
            | AttachmentKind::Animation
            | AttachmentKind::StickerVideo => {
                let scratch = self.frame_target();
                match self.primary.first_frame(source, scratch.path()).await {
                    Ok(()) if scratch.path().exists() => {
                        return Ok(Some(NormalizedImage::scratch(scratch)))
                    }
                    Ok(()) => {}
                    Err(e) => tracing::debug!("primary frame decoder failed: {e}"),
                }
                self.secondary.first_frame(source, scratch.path()).await?;
                Ok(Some(NormalizedImage::scratch(scratch)))
            }

            // Nothing visual to classify.
            AttachmentKind::Audio
            | AttachmentKind::Voice
            | AttachmentKind::Contact
            | AttachmentKind::Location
            | AttachmentKind::Poll
            | AttachmentKind::Game => Ok(None),
        }
    }

    fn frame_target(&self) -> ScratchFile {
        let name = format!("frame-{:016x}.png", rand::random::<u64>());
        ScratchFile::new(self.scratch_dir.join(name))
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Scratch path for a download the caller manages (guarded the same
    /// way as normalizer-created files).
    pub fn download_target(&self, ext: &str) -> ScratchFile {
        let name = format!("dl-{:016x}.{ext}", rand::random::<u64>());
        ScratchFile::new(self.scratch_dir.join(name))
    }
}

async fn run_blocking<F>(f: F) -> Result<(), ClassifierError>
where
    F: FnOnce() -> Result<(), ClassifierError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ClassifierError::Decode(e.to_string()))?
}

// ============================================================================
// DECODERS
// ============================================================================

/// Decode any raster still (webp, png, jpeg) and re-encode as PNG. The
/// format is sniffed from the bytes, not the extension; downloads are
/// routinely mislabeled.
fn decode_still(src: &Path, dst: &Path) -> Result<(), ClassifierError> {
    let img = image::ImageReader::open(src)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;
    img.save_with_format(dst, image::ImageFormat::Png)
        .map_err(|e| ClassifierError::Decode(e.to_string()))
}

/// A vector-animated sticker is gzip-compressed animation JSON. Pull the
/// first embedded base64 raster asset; with none embedded, synthesize a
/// white canvas at the animation's declared dimensions.
fn extract_vector_raster(
    src: &Path,
    dst: &Path,
    declared: (u32, u32),
) -> Result<(), ClassifierError> {
    let raw = std::fs::read(src)?;
    let mut json = String::new();
    GzDecoder::new(&raw[..])
        .read_to_string(&mut json)
        .map_err(|e| ClassifierError::Decode(format!("gzip: {e}")))?;
    let doc: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| ClassifierError::Decode(format!("json: {e}")))?;

    if let Some(assets) = doc.get("assets").and_then(|a| a.as_array()) {
        for asset in assets {
            let Some(payload) = asset.get("p").and_then(|p| p.as_str()) else {
                continue;
            };
            // Embedded assets are "data:image/...;base64,<bytes>".
            let Some((_, b64)) = payload.split_once(',') else {
                continue;
            };
            if let Ok(bytes) = BASE64.decode(b64.trim()) {
                std::fs::write(dst, &bytes)?;
                return Ok(());
            }
        }
    }

    let width = doc
        .get("w")
        .and_then(serde_json::Value::as_u64)
        .map(|w| w as u32)
        .or(if declared.0 > 0 { Some(declared.0) } else { None })
        .unwrap_or(512);
    let height = doc
        .get("h")
        .and_then(serde_json::Value::as_u64)
        .map(|h| h as u32)
        .or(if declared.1 > 0 { Some(declared.1) } else { None })
        .unwrap_or(512);

    let canvas = image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
    image::DynamicImage::ImageRgb8(canvas)
        .save_with_format(dst, image::ImageFormat::Png)
        .map_err(|e| ClassifierError::Decode(e.to_string()))
}

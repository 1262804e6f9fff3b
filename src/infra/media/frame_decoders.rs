// First-frame decoders for video containers.
//
// The primary decoder shells out to ffmpeg; the fallback decodes the first
// frame of anything the `image` crate can read (covers animated gif/webp
// when ffmpeg is missing or chokes on the container).

use crate::core::classify::{ClassifierError, FrameDecoder};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

pub struct FfmpegFrameDecoder {
    binary: String,
}

impl FfmpegFrameDecoder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegFrameDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl FrameDecoder for FfmpegFrameDecoder {
    async fn first_frame(&self, input: &Path, output: &Path) -> Result<(), ClassifierError> {
        let result = Command::new(&self.binary)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-frames:v")
            .arg("1")
            .arg(output)
            .output()
            .await
            .map_err(|e| ClassifierError::Decode(format!("ffmpeg spawn: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ClassifierError::Decode(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

pub struct ImageFirstFrameDecoder;

#[async_trait]
impl FrameDecoder for ImageFirstFrameDecoder {
    async fn first_frame(&self, input: &Path, output: &Path) -> Result<(), ClassifierError> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || {
            // Decoding yields the first frame of animated formats; sniff the
            // bytes since the extension reflects the declared kind, not the
            // actual payload.
            let img = image::ImageReader::open(&input)
                .map_err(|e| ClassifierError::Decode(e.to_string()))?
                .with_guessed_format()
                .map_err(|e| ClassifierError::Decode(e.to_string()))?
                .decode()
                .map_err(|e| ClassifierError::Decode(e.to_string()))?;
            img.save_with_format(&output, image::ImageFormat::Png)
                .map_err(|e| ClassifierError::Decode(e.to_string()))
        })
        .await
        .map_err(|e| ClassifierError::Decode(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn image_fallback_extracts_a_frame_from_a_gif() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("anim.gif");
        let output = dir.path().join("frame.png");

        let frame = image::RgbaImage::from_pixel(6, 3, image::Rgba([1, 2, 3, 255]));
        frame.save_with_format(&input, image::ImageFormat::Gif).unwrap();

        ImageFirstFrameDecoder
            .first_frame(&input, &output)
            .await
            .unwrap();
        let decoded = image::open(&output).unwrap();
        assert_eq!(decoded.width(), 6);
        assert_eq!(decoded.height(), 3);
    }

    #[tokio::test]
    async fn missing_ffmpeg_binary_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = FfmpegFrameDecoder::new("definitely-not-ffmpeg");
        let err = decoder
            .first_frame(&dir.path().join("in.webm"), &dir.path().join("out.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Decode(_)));
    }
}

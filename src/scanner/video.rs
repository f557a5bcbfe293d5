//! Video thumbnails through an external transcoder (`ffmpeg` compatible).

use image::{DynamicImage, Rgba, RgbaImage};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::thumbnails::{encode_jpeg, scale_to_bound, Thumbnail};
use crate::config::ThumbnailConfig;
use crate::error::{Error, Result};

/// Seek offsets tried in order until a frame is produced.
pub const FRAME_OFFSETS: [u32; 4] = [4, 2, 1, 0];

/// Watermark position on the frame, in pixels.
const WATERMARK_OFFSET: (i64, i64) = (1, 1);

pub struct Transcoder {
    program: PathBuf,
    watermark: DynamicImage,
}

impl Transcoder {
    pub fn new(config: &ThumbnailConfig) -> Result<Self> {
        let watermark = match &config.watermark {
            Some(path) => image::open(path)
                .map_err(|e| Error::Config(format!("watermark {}: {}", path.display(), e)))?,
            None => play_glyph(24),
        };
        Ok(Self {
            program: config.transcoder.clone(),
            watermark,
        })
    }

    /// Arguments for a single frame grab at `offset` seconds.
    pub fn frame_args(offset: u32, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-ss".to_string(),
            offset.to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vf".to_string(),
            "scale=iw*sar:ih".to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    /// Grab a frame, trying each offset until one yields a non-empty JPEG.
    pub fn extract_frame(&self, input: &Path) -> Result<Vec<u8>> {
        let workdir = tempfile::tempdir()?;
        let mut last_error = String::from("no frame produced");

        for offset in FRAME_OFFSETS {
            let output = workdir.path().join(format!("frame-{}.jpg", offset));
            let result = Command::new(&self.program)
                .args(Self::frame_args(offset, input, &output))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output();

            match result {
                Ok(out) if out.status.success() => match std::fs::read(&output) {
                    Ok(frame) if !frame.is_empty() => {
                        tracing::debug!(input = %input.display(), offset, "frame extracted");
                        return Ok(frame);
                    }
                    _ => last_error = format!("no frame at {}s", offset),
                },
                Ok(out) => {
                    last_error = format!(
                        "{} exited with {}: {}",
                        self.program.display(),
                        out.status,
                        String::from_utf8_lossy(&out.stderr).trim()
                    );
                }
                Err(e) => {
                    return Err(Error::Io(std::io::Error::new(
                        e.kind(),
                        format!("cannot run {}: {}", self.program.display(), e),
                    )));
                }
            }
        }

        Err(Error::Decode(last_error))
    }

    /// Frame → bounded JPEG with the watermark at (1,1).
    pub fn thumbnail(&self, input: &Path, bound: u32) -> Result<Thumbnail> {
        let frame = self.extract_frame(input)?;
        let img = image::load_from_memory_with_format(&frame, image::ImageFormat::Jpeg)?;
        let mut scaled = scale_to_bound(&img, bound).to_rgba8();
        image::imageops::overlay(
            &mut scaled,
            &self.watermark.to_rgba8(),
            WATERMARK_OFFSET.0,
            WATERMARK_OFFSET.1,
        );
        encode_jpeg(&DynamicImage::ImageRgba8(scaled))
    }

    /// Spill `media` to a temporary file, keeping an extension the transcoder recognizes.
    pub fn thumbnail_from_bytes(&self, media: &[u8], mime_type: &str, bound: u32) -> Result<Thumbnail> {
        let ext = mime_type.rsplit('/').next().unwrap_or("bin");
        let mut file = tempfile::Builder::new()
            .suffix(&format!(".{}", ext))
            .tempfile()?;
        file.write_all(media)?;
        file.flush()?;
        self.thumbnail(file.path(), bound)
    }
}

/// Semi-transparent "play" triangle used when no watermark file is configured.
fn play_glyph(size: u32) -> DynamicImage {
    let mut img = RgbaImage::new(size, size);
    let half = size as f32 / 2.0;
    for (x, y, px) in img.enumerate_pixels_mut() {
        let (fx, fy) = (x as f32, y as f32);
        let inside = fx >= size as f32 * 0.25
            && fx <= size as f32 * 0.8
            && (fy - half).abs() <= (size as f32 * 0.8 - fx) * 0.7;
        *px = if inside {
            Rgba([255, 255, 255, 200])
        } else {
            Rgba([0, 0, 0, 90])
        };
    }
    DynamicImage::ImageRgba8(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_args_contract() {
        let args = Transcoder::frame_args(4, Path::new("/v/clip.mp4"), Path::new("/t/out.jpg"));
        assert_eq!(
            args,
            vec![
                "-ss", "4", "-i", "/v/clip.mp4", "-vf", "scale=iw*sar:ih", "-frames:v", "1",
                "/t/out.jpg"
            ]
        );
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let config = ThumbnailConfig {
            transcoder: PathBuf::from("/nonexistent/transcoder"),
            ..ThumbnailConfig::default()
        };
        let transcoder = Transcoder::new(&config).unwrap();
        assert!(matches!(
            transcoder.extract_frame(Path::new("/v/clip.mp4")),
            Err(Error::Io(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program_tries_every_offset() {
        let config = ThumbnailConfig {
            transcoder: PathBuf::from("false"),
            ..ThumbnailConfig::default()
        };
        let transcoder = Transcoder::new(&config).unwrap();
        assert!(matches!(
            transcoder.extract_frame(Path::new("/v/clip.mp4")),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_play_glyph_size() {
        let glyph = play_glyph(24);
        assert_eq!((glyph.width(), glyph.height()), (24, 24));
    }
}

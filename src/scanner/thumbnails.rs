use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;

use super::decode::decode_image;
use super::hashing::md5_hex;
use super::metadata::{extract_exif, ExifInfo};
use super::reader::{is_image_mime, is_video_mime};
use super::video::Transcoder;
use crate::config::ThumbnailConfig;
use crate::error::Result;

/// An encoded JPEG thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub checksum: String,
}

/// Derived fields produced for one media buffer.
#[derive(Debug, Clone, Default)]
pub struct Derived {
    pub thumbnail: Option<Thumbnail>,
    pub exif: Option<ExifInfo>,
}

impl Derived {
    pub fn is_filled(&self) -> bool {
        self.thumbnail.is_some() || self.exif.is_some()
    }
}

/// Resize so the larger dimension equals `bound`, keeping the aspect ratio.
pub fn scale_to_bound(img: &DynamicImage, bound: u32) -> DynamicImage {
    img.resize(bound, bound, FilterType::Lanczos3)
}

/// Encode as JPEG at the encoder's default quality.
pub fn encode_jpeg(img: &DynamicImage) -> Result<Thumbnail> {
    let rgb = img.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new(&mut jpeg).encode_image(&rgb)?;

    Ok(Thumbnail {
        checksum: md5_hex(&jpeg),
        width: rgb.width(),
        height: rgb.height(),
        jpeg,
    })
}

/// Generates thumbnails and EXIF for images and videos.
pub struct Thumbnailer {
    bound: u32,
    transcoder: Transcoder,
}

impl Thumbnailer {
    pub fn new(config: &ThumbnailConfig) -> Result<Self> {
        Ok(Self {
            bound: config.size,
            transcoder: Transcoder::new(config)?,
        })
    }

    pub fn bound(&self) -> u32 {
        self.bound
    }

    pub fn image_thumbnail(&self, media: &[u8], mime_type: &str) -> Result<Thumbnail> {
        let img = decode_image(media, mime_type)?;
        encode_jpeg(&scale_to_bound(&img, self.bound))
    }

    /// Album-scale rendition (larger bound, same pipeline).
    pub fn scaled(&self, media: &[u8], mime_type: &str, bound: u32) -> Result<Thumbnail> {
        let img = decode_image(media, mime_type)?;
        encode_jpeg(&scale_to_bound(&img, bound))
    }

    /// Thumbnail for a video file on disk.
    pub fn video_thumbnail(&self, path: &Path) -> Result<Thumbnail> {
        self.transcoder.thumbnail(path, self.bound)
    }

    /// Thumbnail for video bytes that only exist in memory.
    pub fn video_thumbnail_from_bytes(&self, media: &[u8], mime_type: &str) -> Result<Thumbnail> {
        self.transcoder.thumbnail_from_bytes(media, mime_type, self.bound)
    }

    /// Fill thumbnail and EXIF; failures are logged and leave the field unset.
    ///
    /// `path` is used for videos, which the transcoder reads from disk;
    /// without it the media is spilled to a temporary file.
    pub fn derive(&self, media: &[u8], mime_type: &str, path: Option<&Path>) -> Derived {
        let mut derived = Derived::default();

        if is_image_mime(mime_type) {
            match self.image_thumbnail(media, mime_type) {
                Ok(thumb) => derived.thumbnail = Some(thumb),
                Err(e) => tracing::warn!(mime = mime_type, error = %e, "thumbnail failed"),
            }
            match extract_exif(media) {
                Ok(info) => derived.exif = Some(info),
                Err(e) => tracing::debug!(mime = mime_type, error = %e, "no exif"),
            }
        } else if is_video_mime(mime_type) {
            let result = match path {
                Some(path) => self.video_thumbnail(path),
                None => self.video_thumbnail_from_bytes(media, mime_type),
            };
            match result {
                Ok(thumb) => derived.thumbnail = Some(thumb),
                Err(e) => tracing::warn!(mime = mime_type, error = %e, "video thumbnail failed"),
            }
        } else {
            tracing::debug!(mime = mime_type, "no derived fields for type");
        }

        derived
    }
}

//! Reads a candidate file into memory and derives its identity.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::hashing::{digest, ContentDigest};
use crate::error::{Error, Result};

/// MIME type for a lowercase extension, or `None` when not on the allow-list.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "png" => "image/png",
        "heic" | "heif" => "image/heic",
        "tif" => "image/tiff",
        "mp4" => "video/mp4",
        "mov" => "video/mov",
        "m4v" => "video/m4v",
        "webm" => "video/webm",
        "avi" => "video/avi",
        "mpg" => "video/mpg",
        _ => return None,
    };
    Some(mime)
}

pub fn mime_for_path(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    mime_for_extension(&ext).ok_or_else(|| Error::UnsupportedType(path.display().to_string()))
}

pub fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/")
}

pub fn is_video_mime(mime: &str) -> bool {
    mime.starts_with("video/")
}

/// A file read into memory together with its derived metadata.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    /// Parent directory, possibly shortened to its last component.
    pub directory: String,
    pub basename: String,
    pub mime_type: &'static str,
    pub size: u64,
    pub media: Vec<u8>,
    pub digest: ContentDigest,
}

/// Parent directory as stored, optionally only its last component.
pub fn directory_of(path: &Path, shorten: bool) -> String {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    if shorten {
        parent
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| parent.to_string_lossy().to_string())
    } else {
        parent.to_string_lossy().to_string()
    }
}

pub fn basename_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub struct FileReader {
    max_blob_size: u64,
    shorten_directory: bool,
}

impl FileReader {
    pub fn new(max_blob_size: u64, shorten_directory: bool) -> Self {
        Self {
            max_blob_size,
            shorten_directory,
        }
    }

    pub fn max_blob_size(&self) -> u64 {
        self.max_blob_size
    }

    /// Open, size-check, type-check and read `path`.
    pub fn read(&self, path: &Path) -> Result<LoadedFile> {
        let mut file = File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let size = file.metadata()?.len();
        if size == 0 {
            return Err(Error::Empty);
        }
        if size > self.max_blob_size {
            return Err(Error::Oversize {
                size,
                limit: self.max_blob_size,
            });
        }

        let mime_type = mime_for_path(path)?;

        let mut media = Vec::with_capacity(size as usize);
        file.read_to_end(&mut media)?;
        let digest = digest(&media);

        Ok(LoadedFile {
            path: path.to_path_buf(),
            directory: directory_of(path, self.shorten_directory),
            basename: basename_of(path),
            mime_type,
            size,
            media,
            digest,
        })
    }
}

//! Row types for pictures and their locations.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::scanner::{ExifInfo, Thumbnail};

/// Where the media bytes of a picture live (`pictures.picture_option`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageOption {
    #[default]
    SqlStore,
    WebStore,
    Original,
    Duplicate,
}

impl StorageOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOption::SqlStore => "sqlstore",
            StorageOption::WebStore => "webstore",
            StorageOption::Original => "original",
            StorageOption::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for StorageOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlstore" | "" => Ok(StorageOption::SqlStore),
            "webstore" => Ok(StorageOption::WebStore),
            "original" => Ok(StorageOption::Original),
            "duplicate" => Ok(StorageOption::Duplicate),
            other => Err(Error::Config(format!("unknown picture option: {}", other))),
        }
    }
}

/// A picture ready for insertion.
#[derive(Debug, Clone)]
pub struct NewPicture {
    pub md5: String,
    pub sha256: String,
    pub title: String,
    pub directory: String,
    pub mime_type: String,
    pub media: Vec<u8>,
    pub fill: bool,
    pub thumbnail: Option<Thumbnail>,
    pub exif: Option<ExifInfo>,
    pub option: StorageOption,
}

impl NewPicture {
    pub fn width(&self) -> Option<u32> {
        self.thumbnail.as_ref().map(|t| t.width)
    }

    pub fn height(&self) -> Option<u32> {
        self.thumbnail.as_ref().map(|t| t.height)
    }
}

/// `(md5, host, directory, basename)` row of `picturelocations`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub md5: String,
    pub host: String,
    pub directory: String,
    pub basename: String,
}

/// One row of the pictures ⟕ picturelocations join for a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLocation {
    pub sha256: String,
    pub host: Option<String>,
    pub directory: Option<String>,
    pub basename: Option<String>,
}

impl StoredLocation {
    pub fn matches(&self, host: &str, directory: &str, basename: &str) -> bool {
        self.host.as_deref() == Some(host)
            && self.directory.as_deref() == Some(directory)
            && self.basename.as_deref() == Some(basename)
    }
}

/// Album row attached to each stored picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumEntry {
    pub album_id: i64,
    pub index: i64,
}

/// One unit of work for a storer.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// `None` when the picture row is known to exist and only the location is new.
    pub picture: Option<NewPicture>,
    pub location: Location,
    pub album: Option<AlbumEntry>,
}

/// Result of a committed store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// New picture row and location row.
    Inserted,
    /// Picture already present; a new location row was added.
    LocationAdded,
    /// Picture row appeared concurrently; its insert was rolled back and the
    /// location row was added.
    Raced,
    /// Both rows already present; nothing was written.
    Duplicate,
}

/// Stored digests and media, for validation.
#[derive(Debug, Clone)]
pub struct MediaRow {
    pub md5: String,
    pub sha256: String,
    pub media: Vec<u8>,
}

/// Fields needed to export a picture.
#[derive(Debug, Clone)]
pub struct ExportRow {
    pub mime_type: String,
    pub title: String,
    pub original_time: Option<DateTime<Utc>>,
    pub md5: String,
    pub media: Vec<u8>,
}

/// Image waiting for a perceptual hash.
#[derive(Debug, Clone)]
pub struct HashCandidate {
    pub md5: String,
    pub title: String,
    pub mime_type: String,
    pub media: Vec<u8>,
}

/// Picture missing derived fields.
#[derive(Debug, Clone)]
pub struct BackfillRow {
    pub md5: String,
    pub title: String,
    pub mime_type: String,
    pub media: Vec<u8>,
}

/// Summary of a stored picture, without media.
#[derive(Debug, Clone, PartialEq)]
pub struct PictureSummary {
    pub md5: String,
    pub title: String,
    pub directory: String,
    pub mime_type: String,
    pub fill: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_thumbnail: bool,
    pub checksum_thumbnail: Option<String>,
    pub original_time: Option<DateTime<Utc>>,
    pub option: StorageOption,
    pub mark_delete: bool,
}

/// Rows streamed page by page are ordered and resumed by md5.
pub trait PageKey {
    fn page_key(&self) -> &str;
}

impl PageKey for MediaRow {
    fn page_key(&self) -> &str {
        &self.md5
    }
}

impl PageKey for ExportRow {
    fn page_key(&self) -> &str {
        &self.md5
    }
}

impl PageKey for HashCandidate {
    fn page_key(&self) -> &str {
        &self.md5
    }
}

impl PageKey for BackfillRow {
    fn page_key(&self) -> &str {
        &self.md5
    }
}

/// Escape `%`, `_` and `\` for a `LIKE … ESCAPE '\'` pattern.
pub fn like_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_option_round_trip() {
        for option in [
            StorageOption::SqlStore,
            StorageOption::WebStore,
            StorageOption::Original,
            StorageOption::Duplicate,
        ] {
            assert_eq!(option.as_str().parse::<StorageOption>().unwrap(), option);
        }
        assert_eq!("".parse::<StorageOption>().unwrap(), StorageOption::SqlStore);
        assert!("cloud".parse::<StorageOption>().is_err());
    }

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("_1_105_c.jpeg"), "\\_1\\_105\\_c.jpeg");
        assert_eq!(like_escape("50%"), "50\\%");
        assert_eq!(like_escape("IMG"), "IMG");
    }

    #[test]
    fn test_location_match() {
        let stored = StoredLocation {
            sha256: "AA".into(),
            host: Some("nas".into()),
            directory: Some("/a".into()),
            basename: Some("x.jpg".into()),
        };
        assert!(stored.matches("nas", "/a", "x.jpg"));
        assert!(!stored.matches("nas", "/b", "x.jpg"));
    }
}

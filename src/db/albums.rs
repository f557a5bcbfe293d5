//! Types for albums.

use crate::scanner::md5_hex;

/// An album row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: i64,
    pub title: String,
    pub album_key: String,
    pub directory: Option<String>,
}

/// Albums are keyed by the MD5 of their title.
pub fn album_key(title: &str) -> String {
    md5_hex(title.as_bytes())
}

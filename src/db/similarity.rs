//! Types for perceptual-hash grouping and duplicate resolution.

/// Tag that pins a picture as canonical; pinned pictures are never marked.
pub const CANONICAL_TAG: &str = "bitgarten";

/// Separator of the aggregated tag list (ASCII unit separator).
pub const TAG_SEPARATOR: char = '\u{1f}';

/// A hash value shared by several live pictures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashGroup {
    pub hash: u64,
    pub count: i64,
}

/// A live picture inside a hash group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub md5: String,
    pub title: String,
    pub mime_type: String,
    pub hash: u64,
    pub width: u32,
    pub height: u32,
    pub media_size: i64,
    pub tags: Vec<String>,
}

impl GroupMember {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_heic(&self) -> bool {
        self.mime_type == "image/heic"
    }
}

/// What to write for one resolved group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPlan {
    pub canonical: String,
    pub add_tags: Vec<String>,
    pub delete: Vec<String>,
}

/// Counts of a written resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionCounts {
    pub tags_added: u64,
    pub tags_removed: u64,
    pub marked: u64,
}

/// Split a tag list aggregated with [`TAG_SEPARATOR`]. Tag names are kept verbatim.
pub fn parse_tag_list(aggregated: Option<&str>) -> Vec<String> {
    let Some(list) = aggregated else {
        return Vec::new();
    };
    list.split(TAG_SEPARATOR)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stored hashes are signed 64-bit integers; keep the bit pattern.
pub fn hash_to_db(hash: u64) -> i64 {
    hash as i64
}

pub fn hash_from_db(value: i64) -> u64 {
    value as u64
}

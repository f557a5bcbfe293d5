use crate::db::StoredLocation;

/// What the database already holds for a candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Absent,
    /// Digest known but the stored sha256 differs; stored like `Absent`.
    ShaMismatch,
    /// Digest known under other locations only.
    ContentPresent,
    /// Digest known at exactly this location.
    FullyPresent,
}

impl Availability {
    /// Whether the picture row still has to be written.
    pub fn needs_picture(&self) -> bool {
        matches!(self, Availability::Absent | Availability::ShaMismatch)
    }
}

/// Classify the rows returned for a digest.
pub fn classify(
    rows: &[StoredLocation],
    sha256: &str,
    host: &str,
    directory: &str,
    basename: &str,
) -> Availability {
    if rows.is_empty() {
        return Availability::Absent;
    }
    if rows.iter().any(|r| r.sha256 != sha256) {
        return Availability::ShaMismatch;
    }
    if rows.iter().any(|r| r.matches(host, directory, basename)) {
        Availability::FullyPresent
    } else {
        Availability::ContentPresent
    }
}

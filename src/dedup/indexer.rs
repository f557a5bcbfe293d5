//! Perceptual-hash indexing of stored images.

use serde::Serialize;

use crate::db::{Database, HashCandidate};
use crate::error::{Error, Result};
use crate::scanner::{decode_image, HashKind, PerceptualHashes};

#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Kinds to store; one `picturehash` row per kind.
    pub kinds: Vec<HashKind>,
    pub title_prefix: Option<String>,
    pub limit: Option<u64>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            kinds: HashKind::IMPLEMENTED.to_vec(),
            title_prefix: None,
            limit: None,
        }
    }
}

impl IndexOptions {
    /// Kind whose freshness decides whether a picture is re-hashed.
    fn fresh_kind(&self) -> HashKind {
        if self.kinds.contains(&HashKind::Perception) || self.kinds.is_empty() {
            HashKind::Perception
        } else {
            self.kinds[0]
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub checked: u64,
    pub hashed: u64,
    pub failed: u64,
}

/// Hashes for one stored image.
pub fn hash_candidate(candidate: &HashCandidate) -> Result<PerceptualHashes> {
    let img = decode_image(&candidate.media, &candidate.mime_type)?;
    PerceptualHashes::compute(&img)
}

/// Hash every live image without a fresh row and upsert the results.
/// Rows are independent; a decode failure is logged and skipped.
pub fn index(db: &Database, options: &IndexOptions) -> Result<IndexReport> {
    for kind in &options.kinds {
        kind.ensure_implemented()?;
    }
    let kinds = if options.kinds.is_empty() {
        HashKind::IMPLEMENTED.to_vec()
    } else {
        options.kinds.clone()
    };

    let mut report = IndexReport::default();
    db.for_each_hash_candidate(
        options.fresh_kind(),
        options.title_prefix.as_deref(),
        options.limit,
        &mut |candidate| {
            report.checked += 1;
            let hashes = match hash_candidate(&candidate) {
                Ok(hashes) => hashes,
                Err(e) => {
                    tracing::warn!(md5 = %candidate.md5, title = %candidate.title, error = %e, "cannot hash");
                    report.failed += 1;
                    return Ok(true);
                }
            };
            for kind in &kinds {
                match db.upsert_hash(&candidate.md5, *kind, &hashes) {
                    Ok(()) => {}
                    Err(e @ Error::Db { .. }) if e.is_fatal_db() => return Err(e),
                    Err(e) => {
                        tracing::warn!(md5 = %candidate.md5, error = %e, "hash upsert failed");
                        report.failed += 1;
                        return Ok(true);
                    }
                }
            }
            tracing::debug!(md5 = %candidate.md5, perception = hashes.perception, "hashed");
            report.hashed += 1;
            Ok(true)
        },
    )?;

    tracing::info!(
        checked = report.checked,
        hashed = report.hashed,
        failed = report.failed,
        "hash pass finished"
    );
    Ok(report)
}

//! Fill thumbnails and EXIF for pictures stored without them.

use serde::Serialize;

use crate::db::Database;
use crate::error::Result;
use crate::scanner::Thumbnailer;

/// Failed runs after which a picture is no longer retried.
pub const MAX_FILL_ATTEMPTS: i64 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub checked: u64,
    pub updated: u64,
    /// Nothing could be derived from the stored media.
    pub failed: u64,
}

/// Recompute derived fields from stored media and write them back.
///
/// Pictures already filled are skipped. A picture yielding nothing is retried
/// on later runs until it has failed [`MAX_FILL_ATTEMPTS`] times.
pub fn backfill(db: &Database, thumbnailer: &Thumbnailer, limit: Option<u64>) -> Result<BackfillReport> {
    let mut report = BackfillReport::default();
    db.for_each_backfill(MAX_FILL_ATTEMPTS, limit, &mut |row| {
        report.checked += 1;
        let derived = thumbnailer.derive(&row.media, &row.mime_type, None);
        if !derived.is_filled() {
            tracing::warn!(md5 = %row.md5, title = %row.title, "nothing derived");
            db.record_fill_failure(&row.md5)?;
            report.failed += 1;
            return Ok(true);
        }
        db.update_derived(&row.md5, &derived)?;
        report.updated += 1;
        Ok(true)
    })?;
    tracing::info!(
        checked = report.checked,
        updated = report.updated,
        failed = report.failed,
        "backfill finished"
    );
    Ok(report)
}

//! Export stored pictures to a dated directory tree.
//!
//! Layout: `<root>/<YYYY-MM-DD>/<title>/<md5>`. The date is the EXIF original
//! time; pictures without one land under the epoch date.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};

use crate::db::{Database, ExportRow};
use crate::error::{Error, Result};

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;

/// Date directory used when no original time is recorded.
pub const EPOCH_DATE: &str = "1970-01-01";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub exported: u64,
    pub failed: u64,
    pub bytes: u64,
}

pub fn date_directory(original_time: Option<&DateTime<Utc>>) -> String {
    original_time
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| EPOCH_DATE.to_string())
}

/// Target path of one row below `root`.
pub fn export_path(root: &Path, row: &ExportRow) -> PathBuf {
    // Titles are basenames; a separator would escape the date directory.
    let title = match row.title.replace('/', "_") {
        t if t.is_empty() || t == "." || t == ".." => "untitled".to_string(),
        t => t,
    };
    root.join(date_directory(row.original_time.as_ref()))
        .join(title)
        .join(&row.md5)
}

fn create_dirs(path: &Path) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder.create(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn create_file(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    options.open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// An overwritten file keeps its old mode otherwise.
#[cfg(unix)]
fn reset_mode(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))?;
    Ok(())
}

#[cfg(not(unix))]
fn reset_mode(_path: &Path) -> Result<()> {
    Ok(())
}

/// Write one row, replacing an existing file.
pub fn write_row(root: &Path, row: &ExportRow) -> Result<PathBuf> {
    let path = export_path(root, row);
    let parent = path
        .parent()
        .ok_or_else(|| Error::Config(format!("invalid export path {}", path.display())))?;
    create_dirs(parent)?;

    let mut file = create_file(&path)?;
    file.write_all(&row.media)?;
    reset_mode(&path)?;
    Ok(path)
}

/// Export every live picture below `root`.
pub fn export(db: &Database, root: &Path, limit: Option<u64>) -> Result<ExportReport> {
    create_dirs(root)?;

    let mut report = ExportReport::default();
    db.for_each_export(&mut |row| {
        if limit.is_some_and(|l| report.exported + report.failed >= l) {
            return Ok(false);
        }
        match write_row(root, &row) {
            Ok(path) => {
                tracing::debug!(md5 = %row.md5, path = %path.display(), "exported");
                report.exported += 1;
                report.bytes += row.media.len() as u64;
            }
            Err(e) => {
                tracing::warn!(md5 = %row.md5, title = %row.title, error = %e, "export failed");
                report.failed += 1;
            }
        }
        Ok(true)
    })?;

    tracing::info!(
        exported = report.exported,
        failed = report.failed,
        root = %root.display(),
        "export finished"
    );
    Ok(report)
}

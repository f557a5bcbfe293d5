//! Media validation: recompute both digests of every stored picture.

use serde::Serialize;
use std::fmt;

use crate::db::{Database, MediaRow};
use crate::error::Result;
use crate::scanner::digest;

/// One problem found on a stored picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    EmptyMedia { md5: String },
    Md5Mismatch { md5: String, actual: String },
    ShaMismatch { md5: String, stored: String, actual: String },
}

impl Issue {
    pub fn md5(&self) -> &str {
        match self {
            Issue::EmptyMedia { md5 } | Issue::Md5Mismatch { md5, .. } | Issue::ShaMismatch { md5, .. } => md5,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::EmptyMedia { md5 } => write!(f, "{}: empty media", md5),
            Issue::Md5Mismatch { md5, actual } => write!(f, "{}: md5 error (media hashes to {})", md5, actual),
            Issue::ShaMismatch { md5, stored, actual } => {
                write!(f, "{}: sha error (stored {}, media {})", md5, stored, actual)
            }
        }
    }
}

/// Problems of one row; empty when the row is sound.
pub fn check_row(row: &MediaRow) -> Vec<Issue> {
    if row.media.is_empty() {
        return vec![Issue::EmptyMedia { md5: row.md5.clone() }];
    }
    let actual = digest(&row.media);
    let mut issues = Vec::new();
    if !actual.md5.eq_ignore_ascii_case(&row.md5) {
        issues.push(Issue::Md5Mismatch {
            md5: row.md5.clone(),
            actual: actual.md5,
        });
    }
    if !actual.sha256.eq_ignore_ascii_case(&row.sha256) {
        issues.push(Issue::ShaMismatch {
            md5: row.md5.clone(),
            stored: row.sha256.clone(),
            actual: actual.sha256,
        });
    }
    issues
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidateReport {
    pub checked: u64,
    pub errors: u64,
    pub issues: Vec<Issue>,
}

impl ValidateReport {
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

/// Stream every picture and report digest problems. Problems do not stop the pass.
pub fn validate(db: &Database, limit: Option<u64>) -> Result<ValidateReport> {
    let mut report = ValidateReport::default();
    db.for_each_media(limit, &mut |row| {
        report.checked += 1;
        for issue in check_row(&row) {
            tracing::error!(md5 = %issue.md5(), "{}", issue);
            report.errors += 1;
            report.issues.push(issue);
        }
        Ok(true)
    })?;
    tracing::info!(checked = report.checked, errors = report.errors, "validation finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Location, NewPicture, StorageOption, StoreRequest};

    fn store(db: &Database, media: &[u8]) -> String {
        let d = digest(media);
        db.store(&StoreRequest {
            picture: Some(NewPicture {
                md5: d.md5.clone(),
                sha256: d.sha256,
                title: "x.jpg".into(),
                directory: "/a".into(),
                mime_type: "image/jpeg".into(),
                media: media.to_vec(),
                fill: false,
                thumbnail: None,
                exif: None,
                option: StorageOption::SqlStore,
            }),
            location: Location {
                md5: d.md5.clone(),
                host: "h".into(),
                directory: "/a".into(),
                basename: "x.jpg".into(),
            },
            album: None,
        })
        .unwrap();
        d.md5
    }

    #[test]
    fn test_sound_rows_pass() {
        let db = Database::open_in_memory().unwrap();
        store(&db, b"0123456789");
        store(&db, b"other bytes");
        let report = validate(&db, None).unwrap();
        assert_eq!(report.checked, 2);
        assert!(report.is_clean());
    }

    #[test]
    fn test_zeroed_media_reports_both_digests() {
        let db = Database::open_in_memory().unwrap();
        let md5 = store(&db, b"0123456789");
        db.execute_raw(
            "UPDATE pictures SET media = ?1 WHERE md5 = ?2",
            &[&vec![0u8; 10], &md5],
        )
        .unwrap();

        let report = validate(&db, None).unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.errors, 2);
        assert!(matches!(report.issues[0], Issue::Md5Mismatch { .. }));
        assert!(matches!(report.issues[1], Issue::ShaMismatch { .. }));
        assert!(report.issues.iter().all(|i| i.md5() == md5));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_empty_media() {
        let row = MediaRow {
            md5: "D41D8CD98F00B204E9800998ECF8427E".into(),
            sha256: String::new(),
            media: Vec::new(),
        };
        assert_eq!(check_row(&row), vec![Issue::EmptyMedia { md5: row.md5.clone() }]);
    }

    #[test]
    fn test_limit() {
        let db = Database::open_in_memory().unwrap();
        store(&db, b"a");
        store(&db, b"b");
        store(&db, b"c");
        assert_eq!(validate(&db, Some(2)).unwrap().checked, 2);
    }
}

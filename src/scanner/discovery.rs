use regex::{RegexSet, RegexSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Exclude list compiled once at startup.
#[derive(Debug, Clone)]
pub struct ExcludeFilter {
    set: RegexSet,
}

impl ExcludeFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns: Vec<&str> = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .collect();
        let set = RegexSetBuilder::new(&patterns)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Config(format!("invalid exclude filter: {}", e)))?;
        Ok(Self { set })
    }

    /// Parse a comma-separated list as given on the command line.
    pub fn from_comma_list(list: &str) -> Result<Self> {
        let patterns: Vec<&str> = list.split(',').collect();
        Self::new(&patterns)
    }

    /// Patterns match case-insensitively anywhere in the path.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.set.is_match(&path.to_string_lossy())
    }
}

/// A file found by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovered {
    Included(PathBuf),
    Excluded(PathBuf),
}

/// Walk `root` and hand every regular file to `visit`, classified by `filter`.
///
/// Per-entry errors are logged and skipped. `visit` returning `false` stops the walk.
pub fn walk<F>(root: &Path, filter: &ExcludeFilter, mut visit: F) -> usize
where
    F: FnMut(Discovered) -> bool,
{
    let mut seen = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "walk error");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        seen += 1;
        let path = entry.into_path();
        let item = if filter.is_excluded(&path) {
            Discovered::Excluded(path)
        } else {
            Discovered::Included(path)
        };

        if !visit(item) {
            break;
        }
    }

    seen
}

mod schema;
pub mod albums;
pub mod pictures;
pub mod similarity;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod postgres_schema;

use std::path::PathBuf;

pub use albums::{album_key, Album};
pub use pictures::{
    like_escape, AlbumEntry, BackfillRow, ExportRow, HashCandidate, Location, MediaRow,
    NewPicture, PictureSummary, StorageOption, StoreOutcome, StoreRequest, StoredLocation,
};
pub use similarity::{
    GroupMember, HashGroup, ResolutionCounts, ResolutionPlan, CANONICAL_TAG, TAG_SEPARATOR,
};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::scanner::metadata::format_exif_time;
use crate::scanner::{Derived, ExifInfo, HashKind, PerceptualHashes, Thumbnail};

/// Rows fetched per round trip when streaming.
pub(crate) const PAGE_SIZE: i64 = 64;

/// Optional picture columns filled from a thumbnail and EXIF.
pub(crate) struct DerivedColumns<'a> {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub thumbnail: Option<&'a [u8]>,
    pub checksum: Option<&'a str>,
    pub model: Option<&'a str>,
    pub make: Option<&'a str>,
    pub taken: Option<String>,
    pub original: Option<String>,
    pub x_dim: Option<i32>,
    pub y_dim: Option<i32>,
    pub orientation: Option<&'a str>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub coords: Option<&'a str>,
    pub raw: Option<&'a str>,
}

impl<'a> DerivedColumns<'a> {
    pub fn new(thumbnail: Option<&'a Thumbnail>, exif: Option<&'a ExifInfo>) -> Self {
        Self {
            width: thumbnail.map(|t| t.width as i32),
            height: thumbnail.map(|t| t.height as i32),
            thumbnail: thumbnail.map(|t| t.jpeg.as_slice()),
            checksum: thumbnail.map(|t| t.checksum.as_str()),
            model: exif.and_then(|e| e.model.as_deref()),
            make: exif.and_then(|e| e.make.as_deref()),
            taken: exif.and_then(|e| e.taken_time.as_ref()).map(format_exif_time),
            original: exif.and_then(|e| e.original_time.as_ref()).map(format_exif_time),
            x_dim: exif.and_then(|e| e.x_dim).map(|v| v as i32),
            y_dim: exif.and_then(|e| e.y_dim).map(|v| v as i32),
            orientation: exif.and_then(|e| e.orientation.as_deref()),
            latitude: exif.and_then(|e| e.gps_latitude),
            longitude: exif.and_then(|e| e.gps_longitude),
            coords: exif.and_then(|e| e.gps_coords.as_deref()),
            raw: exif.and_then(|e| e.raw.as_deref()),
        }
    }
}

/// Stored value for `kind`, bit-cast for the signed column.
pub(crate) fn hash_value(kind: HashKind, hashes: &PerceptualHashes) -> Result<i64> {
    hashes
        .get(kind)
        .map(similarity::hash_to_db)
        .ok_or(Error::Unimplemented("wavelet hash"))
}

/// Macro to dispatch a method call to the active backend variant.
macro_rules! dispatch {
    // No arguments beyond self
    ($self:expr, $method:ident()) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method(),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method(),
        }
    };
    // With arguments
    ($self:expr, $method:ident($($arg:expr),+ $(,)?)) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method($($arg),+),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method($($arg),+),
        }
    };
}

enum DatabaseInner {
    Sqlite(sqlite::SqliteDb),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgDb),
}

/// Where a database URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    SqliteMemory,
    SqliteFile(PathBuf),
    Postgres(String),
}

impl Target {
    /// `postgres://…` / `postgresql://…`, `sqlite::memory:`, `sqlite:<path>`
    /// or a bare file path.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::Config("database url is empty".to_string()));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(Target::Postgres(url.to_string()));
        }
        match url.strip_prefix("sqlite:") {
            Some(":memory:") | Some("//:memory:") => Ok(Target::SqliteMemory),
            Some(path) => Ok(Target::SqliteFile(PathBuf::from(
                path.strip_prefix("//").unwrap_or(path),
            ))),
            None if url.contains("://") => {
                Err(Error::Config(format!("unsupported database url: {}", url)))
            }
            None => Ok(Target::SqliteFile(PathBuf::from(url))),
        }
    }
}

pub struct Database {
    inner: DatabaseInner,
}

impl Database {
    /// Open the configured database. `workers` sizes the PostgreSQL pool
    /// (one connection per worker plus two for the driver and ticker).
    pub fn open(config: &DatabaseConfig, workers: u32) -> Result<Self> {
        match Target::parse(&config.url)? {
            Target::SqliteMemory => Self::open_in_memory(),
            Target::SqliteFile(path) => {
                let db = sqlite::SqliteDb::open(&path)?;
                Ok(Self {
                    inner: DatabaseInner::Sqlite(db),
                })
            }
            #[cfg(feature = "postgres")]
            Target::Postgres(url) => {
                let pg_config = postgres::connection_config(&url, config.password.as_deref())?;
                let pool_size = config.pool_size.unwrap_or(workers + 2).max(2);
                let pg = postgres::PgDb::open(pg_config, pool_size)?;
                Ok(Self {
                    inner: DatabaseInner::Postgres(pg),
                })
            }
            #[cfg(not(feature = "postgres"))]
            Target::Postgres(_) => {
                let _ = workers;
                Err(Error::Config(
                    "PostgreSQL support not compiled in (enable the `postgres` feature)".to_string(),
                ))
            }
        }
    }

    /// Private SQLite database with the schema in place.
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            inner: DatabaseInner::Sqlite(sqlite::SqliteDb::open_in_memory()?),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Create tables and indexes if missing.
    pub fn initialize(&self) -> Result<()> {
        dispatch!(self, initialize())
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Stored sha256 and every known location for `md5`; empty when absent.
    pub fn locations(&self, md5: &str) -> Result<Vec<StoredLocation>> {
        dispatch!(self, locations(md5))
    }

    /// Write one record in a single transaction.
    ///
    /// A unique violation on the picture row is absorbed by a savepoint and the
    /// location row is still written; a unique violation on the location row
    /// rolls the whole transaction back and reports [`StoreOutcome::Duplicate`].
    pub fn store(&self, request: &StoreRequest) -> Result<StoreOutcome> {
        dispatch!(self, store(request))
    }

    pub fn remove_location(&self, host: &str, directory: &str, basename: &str) -> Result<u64> {
        dispatch!(self, remove_location(host, directory, basename))
    }

    /// Create the album for `title` or return the existing one.
    pub fn ensure_album(&self, title: &str, directory: &str) -> Result<Album> {
        dispatch!(self, ensure_album(title, directory))
    }

    pub fn album(&self, id: i64) -> Result<Option<Album>> {
        dispatch!(self, album(id))
    }

    // ========================================================================
    // Perceptual hashes and resolution
    // ========================================================================

    /// Stream live images without a `fresh_kind` hash newer than seven days.
    /// The callback returns `false` to stop.
    pub fn for_each_hash_candidate(
        &self,
        fresh_kind: HashKind,
        title_prefix: Option<&str>,
        limit: Option<u64>,
        f: &mut dyn FnMut(HashCandidate) -> Result<bool>,
    ) -> Result<u64> {
        let pattern = format!("{}%", like_escape(title_prefix.unwrap_or("")));
        dispatch!(self, for_each_hash_candidate(fresh_kind, &pattern, limit, f))
    }

    pub fn upsert_hash(&self, md5: &str, kind: HashKind, hashes: &PerceptualHashes) -> Result<()> {
        dispatch!(self, upsert_hash(md5, kind, hashes))
    }

    /// Largest groups of live pictures sharing a hash, skipping groups
    /// in which every member is pinned with [`CANONICAL_TAG`].
    pub fn top_hash_groups(&self, kind: HashKind, min_count: i64, limit: i64) -> Result<Vec<HashGroup>> {
        dispatch!(self, top_hash_groups(kind, min_count, limit))
    }

    pub fn group_members(&self, kind: HashKind, hash: u64) -> Result<Vec<GroupMember>> {
        dispatch!(self, group_members(kind, hash))
    }

    /// Live hashed pictures whose title ends with `suffix`.
    pub fn members_with_title_suffix(&self, kind: HashKind, suffix: &str) -> Result<Vec<GroupMember>> {
        let pattern = format!("%{}", like_escape(suffix));
        dispatch!(self, members_by_title(kind, &pattern))
    }

    /// Live hashed pictures whose title is `stem` followed by an extension.
    pub fn members_with_title_stem(&self, kind: HashKind, stem: &str) -> Result<Vec<GroupMember>> {
        let pattern = format!("{}.%", like_escape(stem));
        dispatch!(self, members_by_title(kind, &pattern))
    }

    /// Apply a plan in one transaction; rolled back unless `commit`.
    pub fn apply_resolution(&self, plan: &ResolutionPlan, commit: bool) -> Result<ResolutionCounts> {
        dispatch!(self, apply_resolution(plan, commit))
    }

    // ========================================================================
    // Tags
    // ========================================================================

    pub fn add_tag(&self, md5: &str, tag: &str) -> Result<bool> {
        dispatch!(self, add_tag(md5, tag))
    }

    pub fn tags(&self, md5: &str) -> Result<Vec<String>> {
        dispatch!(self, tags(md5))
    }

    // ========================================================================
    // Validation, export, backfill
    // ========================================================================

    pub fn for_each_media(&self, limit: Option<u64>, f: &mut dyn FnMut(MediaRow) -> Result<bool>) -> Result<u64> {
        dispatch!(self, for_each_media(limit, f))
    }

    pub fn for_each_export(&self, f: &mut dyn FnMut(ExportRow) -> Result<bool>) -> Result<u64> {
        dispatch!(self, for_each_export(f))
    }

    /// Stream live unfilled pictures that failed fewer than `max_attempts` backfills.
    pub fn for_each_backfill(
        &self,
        max_attempts: i64,
        limit: Option<u64>,
        f: &mut dyn FnMut(BackfillRow) -> Result<bool>,
    ) -> Result<u64> {
        dispatch!(self, for_each_backfill(max_attempts, limit, f))
    }

    /// Count a backfill that derived nothing from the stored media.
    pub fn record_fill_failure(&self, md5: &str) -> Result<u64> {
        dispatch!(self, record_fill_failure(md5))
    }

    /// Fill derived columns; existing values are kept where `derived` has none.
    pub fn update_derived(&self, md5: &str, derived: &Derived) -> Result<u64> {
        dispatch!(self, update_derived(md5, derived))
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn picture(&self, md5: &str) -> Result<Option<PictureSummary>> {
        dispatch!(self, picture(md5))
    }

    pub fn count_pictures(&self) -> Result<i64> {
        dispatch!(self, count_pictures())
    }

    pub fn count_locations(&self) -> Result<i64> {
        dispatch!(self, count_locations())
    }

    /// Run a statement against the SQLite backend.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str, values: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        match &self.inner {
            DatabaseInner::Sqlite(db) => db.execute_raw(sql, values),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(_) => Err(Error::Unimplemented("raw statements on postgres")),
        }
    }
}

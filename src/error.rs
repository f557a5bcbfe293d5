//! Error kinds shared by every tool.
//!
//! Counters and retry decisions key off the variant (see [`Error::bucket`]),
//! never off the rendered message.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Classification of a database failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// Unique violation on `pictures.md5` or a location/tag/album key.
    Constraint,
    /// Connection loss or pool exhaustion; the operation may be retried.
    Transient,
    /// Schema, permission or any other unrecoverable failure.
    Fatal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("file too big: {size} bytes exceeds limit of {limit} bytes")]
    Oversize { size: u64, limit: u64 },

    #[error("empty file")]
    Empty,

    #[error("database error ({kind:?}): {message}")]
    Db { kind: DbErrorKind, message: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
}

impl Error {
    pub fn db(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Error::Db {
            kind,
            message: message.into(),
        }
    }

    /// Stable counter key for the statistics error map.
    pub fn bucket(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Open { .. } => "open",
            Error::Io(_) => "io",
            Error::UnsupportedType(_) => "unsupported",
            Error::Decode(_) => "decode",
            Error::Oversize { .. } => "too_big",
            Error::Empty => "empty",
            Error::Db { kind: DbErrorKind::Constraint, .. } => "db_constraint",
            Error::Db { kind: DbErrorKind::Transient, .. } => "db_transient",
            Error::Db { kind: DbErrorKind::Fatal, .. } => "db_fatal",
            Error::Validation(_) => "validation",
            Error::Unimplemented(_) => "unimplemented",
        }
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, Error::Db { kind: DbErrorKind::Constraint, .. })
    }

    pub fn is_fatal_db(&self) -> bool {
        matches!(self, Error::Db { kind: DbErrorKind::Fatal, .. })
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        let kind = match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    DbErrorKind::Constraint
                }
                _ if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked =>
                {
                    DbErrorKind::Transient
                }
                _ => DbErrorKind::Fatal,
            },
            _ => DbErrorKind::Fatal,
        };
        Error::db(kind, e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<postgres::Error> for Error {
    fn from(e: postgres::Error) -> Self {
        use postgres::error::SqlState;

        let kind = match e.code() {
            Some(code) if *code == SqlState::UNIQUE_VIOLATION => DbErrorKind::Constraint,
            Some(code) if code.code().starts_with("08") || *code == SqlState::ADMIN_SHUTDOWN => {
                DbErrorKind::Transient
            }
            None if e.is_closed() => DbErrorKind::Transient,
            _ => DbErrorKind::Fatal,
        };
        Error::db(kind, e.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error::db(DbErrorKind::Transient, e.to_string())
    }
}

//! Batch tools for a photo and video archive kept in a relational database.
//!
//! Pictures are identified by the MD5 of their bytes; every place a file was
//! seen is recorded as a location. Besides ingest the crate indexes
//! perceptual hashes, resolves near-duplicates, validates stored media,
//! exports to a dated tree and backfills thumbnails.

pub mod backfill;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod report;
pub mod scanner;
pub mod validate;

pub use config::Config;
pub use db::Database;
pub use error::{DbErrorKind, Error, Result};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

pub const DEFAULT_MAX_BLOB_SIZE: u64 = 500 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default ingest roots when none are given on the command line.
    #[serde(default)]
    pub directories: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres://…` or `sqlite:<path>`
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub pool_size: Option<u32>,
}

fn default_database_url() -> String {
    "sqlite:bitgarten.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            password: None,
            pool_size: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_reader_threads")]
    pub reader_threads: usize,

    #[serde(default = "default_storer_threads")]
    pub storer_threads: usize,

    #[serde(default = "default_storer_queue")]
    pub storer_queue: usize,

    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,

    /// Regular expressions; a path matching any of them is not ingested.
    #[serde(default = "default_exclude_filters")]
    pub exclude_filters: Vec<String>,

    /// Store only the last component of the parent directory.
    #[serde(default)]
    pub shorten_directory: bool,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_reader_threads() -> usize {
    5
}

fn default_storer_threads() -> usize {
    5
}

fn default_storer_queue() -> usize {
    4
}

fn default_max_blob_size() -> u64 {
    DEFAULT_MAX_BLOB_SIZE
}

fn default_exclude_filters() -> Vec<String> {
    vec![".*@eadir.*".to_string(), ".*/._[^/]*".to_string()]
}

fn default_host() -> String {
    if let Ok(host) = std::env::var("HOSTNAME") {
        if !host.is_empty() {
            return host;
        }
    }
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|h| h.trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            reader_threads: default_reader_threads(),
            storer_threads: default_storer_threads(),
            storer_queue: default_storer_queue(),
            max_blob_size: default_max_blob_size(),
            exclude_filters: default_exclude_filters(),
            shorten_directory: false,
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumb_size")]
    pub size: u32,

    #[serde(default = "default_album_size")]
    pub album_size: u32,

    /// External transcoder used for video frames.
    #[serde(default = "default_transcoder")]
    pub transcoder: PathBuf,

    /// PNG overlaid on video thumbnails; a built-in glyph is used when unset.
    #[serde(default)]
    pub watermark: Option<PathBuf>,
}

fn default_thumb_size() -> u32 {
    200
}

fn default_album_size() -> u32 {
    1280
}

fn default_transcoder() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            size: default_thumb_size(),
            album_size: default_album_size(),
            transcoder: default_transcoder(),
            watermark: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Error,
}

impl LogLevel {
    /// `ENABLE_DEBUG`: `1` debug, `2` info, anything else error.
    pub fn from_enable_debug(value: &str) -> Self {
        match value.trim() {
            "1" => LogLevel::Debug,
            "2" => LogLevel::Info,
            _ => LogLevel::Error,
        }
    }

    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub level: LogLevel,
}

fn default_log_path() -> PathBuf {
    PathBuf::from(".")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            level: LogLevel::default(),
        }
    }
}

/// Parse a human-readable size such as `500MB`; multiples are binary.
pub fn parse_blob_size(value: &str) -> Result<u64> {
    parse_size::Config::new()
        .with_binary()
        .parse_size(value.trim())
        .map_err(|e| Error::Config(format!("invalid size {:?}: {}", value, e)))
}

impl Config {
    /// Load the optional TOML file, then overlay the environment.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("BITGARTEN_CONFIG") {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join("bitgarten").join("config.toml"))
    }

    /// Overlay environment variables through `lookup` so tests need not touch the process env.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("POSTGRES_URL").filter(|v| !v.is_empty()) {
            self.database.url = url;
        }
        if let Some(password) = lookup("POSTGRES_PASSWORD").filter(|v| !v.is_empty()) {
            self.database.password = Some(password);
        }
        if let Some(path) = lookup("LOGPATH").filter(|v| !v.is_empty()) {
            self.logging.path = PathBuf::from(path);
        }
        if let Some(level) = lookup("ENABLE_DEBUG") {
            self.logging.level = LogLevel::from_enable_debug(&level);
        }
        if let Some(dirs) = lookup("BITGARTEN_DIRECTORIES") {
            let roots: Vec<PathBuf> = dirs
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect();
            if !roots.is_empty() {
                self.directories = roots;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ingest.reader_threads, 5);
        assert_eq!(config.ingest.storer_threads, 5);
        assert_eq!(config.ingest.storer_queue, 4);
        assert_eq!(config.ingest.max_blob_size, 500 * 1024 * 1024);
        assert_eq!(config.thumbnails.size, 200);
        assert_eq!(config.thumbnails.album_size, 1280);
        assert_eq!(config.logging.level, LogLevel::Error);
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("POSTGRES_URL", "postgres://archive@db/pictures"),
            ("POSTGRES_PASSWORD", "secret"),
            ("LOGPATH", "/var/log/bitgarten"),
            ("ENABLE_DEBUG", "2"),
            ("BITGARTEN_DIRECTORIES", "/photos/a, /photos/b,"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.database.url, "postgres://archive@db/pictures");
        assert_eq!(config.database.password.as_deref(), Some("secret"));
        assert_eq!(config.logging.path, PathBuf::from("/var/log/bitgarten"));
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(
            config.directories,
            vec![PathBuf::from("/photos/a"), PathBuf::from("/photos/b")]
        );
    }

    #[test]
    fn test_enable_debug_levels() {
        assert_eq!(LogLevel::from_enable_debug("1"), LogLevel::Debug);
        assert_eq!(LogLevel::from_enable_debug("2"), LogLevel::Info);
        assert_eq!(LogLevel::from_enable_debug("3"), LogLevel::Error);
        assert_eq!(LogLevel::from_enable_debug(""), LogLevel::Error);
    }

    #[test]
    fn test_parse_blob_size() {
        assert_eq!(parse_blob_size("500MB").unwrap(), 500 * 1024 * 1024);
        assert_eq!(parse_blob_size("1024").unwrap(), 1024);
        assert!(parse_blob_size("lots").is_err());
    }

    #[test]
    fn test_toml_partial() {
        let config: Config = toml::from_str(
            r#"
            [ingest]
            reader_threads = 2
            exclude_filters = [".*\\.tmp"]

            [thumbnails]
            size = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.ingest.reader_threads, 2);
        assert_eq!(config.ingest.storer_threads, 5);
        assert_eq!(config.ingest.exclude_filters, vec![".*\\.tmp".to_string()]);
        assert_eq!(config.thumbnails.size, 128);
        assert_eq!(config.thumbnails.album_size, 1280);
    }
}

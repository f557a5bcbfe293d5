//! Logging configuration.
//!
//! Every tool writes to a daily rolling file inside the log directory
//! (`LOGPATH`, default `.`). The level comes from `ENABLE_DEBUG`;
//! `BITGARTEN_LOG` may carry a full `EnvFilter` directive instead.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogLevel;
use crate::error::Result;

/// Initialize the logging system. Call once at startup.
pub fn init(log_dir: &Path, level: LogLevel) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("BITGARTEN_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "bitgarten.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the writer thread, so keep it for the process lifetime.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!("Logging initialized at {:?} ({:?})", log_dir, level);
    Ok(())
}

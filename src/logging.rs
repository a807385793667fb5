//! Structured logging setup. Console output goes to stderr so `--json`
//! results on stdout stay machine-readable.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, TallyError};

/// Environment variable that overrides the configured level, in `EnvFilter`
/// syntax (`debug`, `tally=trace`, ...).
pub const LOG_ENV: &str = "TALLY_LOG";

const LOG_FILE_PREFIX: &str = "tally.log";

pub fn build_filter(level: &str) -> Result<EnvFilter> {
    match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .map_err(|e| TallyError::Settings(format!("invalid {LOG_ENV}: {e}"))),
        _ => EnvFilter::try_new(level)
            .map_err(|e| TallyError::Settings(format!("invalid log_level '{level}': {e}"))),
    }
}

/// Installs the global subscriber. When `log_dir` is given, a daily-rolling
/// file is written there too; the returned guard flushes it on drop and must
/// live until the program exits.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(level)?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| TallyError::Other(format!("logging already initialized: {e}")))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_levels_and_directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("warn,tally=debug").is_ok());
    }

    #[test]
    fn test_build_filter_rejects_garbage() {
        if std::env::var(LOG_ENV).is_err() {
            assert!(build_filter("tally=[[[").is_err());
        }
    }
}

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, DEFAULT_LOG_LEVEL};

const LOG_FILE_PREFIX: &str = "capsule.log";

/// Keeps the non-blocking file writer alive; dropping it flushes the log.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

fn daily_file_writer(dir: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the global subscriber: stdout always, plus a daily rolling file
/// when `config.file_dir` is set. A log directory that cannot be created
/// leaves stdout logging in place and is reported once the subscriber is up.
pub fn init_tracing(config: &LogConfig) -> Option<FileLogGuard> {
    let env_filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let file = config
        .file_dir
        .as_deref()
        .map(|dir| daily_file_writer(dir).map_err(|err| (dir, err)));

    let (writer, guard, failure) = match file {
        Some(Ok((writer, guard))) => (Some(writer), Some(guard), None),
        Some(Err(failure)) => (None, None, Some(failure)),
        None => (None, None, None),
    };

    let file_layer = writer.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    if let Some((dir, err)) = failure {
        tracing::warn!(dir = %dir.display(), error = %err, "file logging disabled");
    }

    guard.map(|guard| FileLogGuard { _guard: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_writer_creates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("logs");
        let (_writer, _guard) = daily_file_writer(&dir).unwrap();
        assert!(dir.is_dir());
    }
}

//! Tracing setup for the connector
//!
//! Console output goes to stderr so it never mixes with the shell's own
//! stdout. File output rolls per `LogSettings::rotation` into
//! `<log_dir>/<prefix>.<date>.log` and keeps at most `max_log_files` files.

use crate::domain::settings::LogSettings;
use std::path::Path;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE_SUFFIX: &str = "log";

pub struct LoggingGuard {
    // Dropping the guards flushes and stops the file writers
    _guards: Vec<WorkerGuard>,
}

fn parse_rotation(rotation: &str) -> Rotation {
    match rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn file_appender(settings: &LogSettings) -> anyhow::Result<RollingFileAppender> {
    let log_dir = Path::new(&settings.log_dir);
    std::fs::create_dir_all(log_dir)?;

    let mut builder = RollingFileAppender::builder()
        .rotation(parse_rotation(&settings.rotation))
        .filename_prefix(settings.file_name_prefix.as_str())
        .filename_suffix(LOG_FILE_SUFFIX);
    if settings.max_log_files > 0 {
        builder = builder.max_log_files(settings.max_log_files);
    }
    Ok(builder.build(log_dir)?)
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    let console_layer = if settings.console_logging_enabled {
        Some(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target)
                .with_ansi(settings.ansi_colors),
        )
    } else {
        None
    };

    let file_layer = if settings.file_logging_enabled {
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(settings)?);
        guards.push(guard);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter(&settings.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if settings.file_logging_enabled {
        tracing::info!(log_dir = %settings.log_dir, "Logging to file");
    }
    tracing::info!("Logging initialized successfully");

    Ok(LoggingGuard { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rotation() {
        assert_eq!(parse_rotation("Hourly"), Rotation::HOURLY);
        assert_eq!(parse_rotation("minutely"), Rotation::MINUTELY);
        assert_eq!(parse_rotation("never"), Rotation::NEVER);
        assert_eq!(parse_rotation("weekly"), Rotation::DAILY);
    }

    #[test]
    fn test_file_logging_uses_prefix_and_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let settings = LogSettings {
            file_logging_enabled: true,
            console_logging_enabled: false,
            log_dir: log_dir.to_string_lossy().into_owned(),
            file_name_prefix: "session".to_string(),
            ..LogSettings::default()
        };

        let guard = init_logger(&settings).unwrap();
        tracing::info!("written to file");
        drop(guard);

        let names: Vec<String> = std::fs::read_dir(&log_dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("session."));
        assert!(names[0].ends_with(".log"));
    }
}

use crate::models::LoggingSettings;
use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the log level filter. `RUST_LOG` wins over the settings.
pub fn env_filter(debug_mode: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug_mode { "debug" } else { "info" }))
}

/// Create the log directory if it doesn't exist
pub fn ensure_log_dir(log_dir: &Utf8Path) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }
    Ok(())
}

/// Setup logging with a daily rotating file and optional console output.
///
/// # Arguments
/// * `settings` - Prefix, level, console and JSON switches
/// * `log_dir` - Directory for log files (already resolved against the config dir)
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn init_logging(settings: &LoggingSettings, log_dir: &Utf8Path) -> Result<WorkerGuard> {
    ensure_log_dir(log_dir)?;

    let file_appender = rolling::daily(log_dir, &settings.log_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Exactly one of the two file layers is active
    let (json_layer, text_layer) = if settings.json {
        let layer = fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .with_thread_ids(true);
        (Some(layer), None)
    } else {
        let layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false) // No ANSI codes in log files
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        (None, Some(layer))
    };

    let console_layer = settings
        .console
        .then(|| fmt::layer().with_ansi(true).with_target(false));

    tracing_subscriber::registry()
        .with(env_filter(settings.debug))
        .with(json_layer)
        .with(text_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}, console={}, json={}",
        log_dir,
        settings.log_prefix,
        settings.debug,
        settings.console,
        settings.json
    );

    Ok(guard)
}

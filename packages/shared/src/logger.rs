//! Logging setup utilities for the relay.

use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the default filter directive for the library crate and the binary.
///
/// Crate names are normalized to their `snake_case` target form.
pub fn default_filter(binary_name: &str, default_log_level: &str) -> String {
    format!(
        "kingdom_relay={level},kingdom_shared={level},{bin}={level},tower_http=info",
        level = default_log_level,
        bin = binary_name.replace('-', "_"),
    )
}

/// File name used for a log file opened at the given local time.
///
/// Shape: `2024-01-31-23-59-59_kingdom-relay.log`.
pub fn log_file_name(binary_name: &str, opened_at: chrono::DateTime<chrono::Local>) -> String {
    format!("{}_{}.log", opened_at.format("%Y-%m-%d-%H-%M-%S"), binary_name)
}

/// Initialize the tracing subscriber.
///
/// Logs go to the console and, when `log_dir` is given, to a timestamped file
/// inside that directory. The level can be overridden with `RUST_LOG`.
///
/// Returns the path of the log file when one was opened.
///
/// # Examples
///
/// ```no_run
/// use kingdom_shared::logger::setup_logger;
///
/// let log_file = setup_logger("kingdom-relay", "info", Some(std::path::Path::new("logs")));
/// ```
pub fn setup_logger(
    binary_name: &str,
    default_log_level: &str,
    log_dir: Option<&Path>,
) -> Option<PathBuf> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(binary_name, default_log_level).into());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true));

    let opened = log_dir.map(|dir| open_log_file(dir, binary_name));

    match opened {
        Some(Ok((path, file))) => {
            let file_layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true);
            subscriber.with(file_layer).init();
            tracing::debug!("Writing logs to {}", path.display());
            Some(path)
        }
        Some(Err(e)) => {
            subscriber.init();
            tracing::warn!("Log file disabled, console logging only: {}", e);
            None
        }
        None => {
            subscriber.init();
            None
        }
    }
}

fn open_log_file(dir: &Path, binary_name: &str) -> std::io::Result<(PathBuf, File)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(log_file_name(binary_name, chrono::Local::now()));
    let file = File::create(&path)?;
    Ok((path, file))
}

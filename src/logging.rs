use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
///
/// The file layer writes JSON lines to `log_file`; the console layer is
/// human readable and drops to warnings only when `quiet` is set. The
/// returned guard must be held until exit so buffered lines are flushed.
pub fn init_logging(log_file: &Path, quiet: bool) -> WorkerGuard {
    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "contact_etl.log".into());

    // Ensure logs directory exists
    let _ = fs::create_dir_all(directory);

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    let console_level = if quiet { LevelFilter::WARN } else { LevelFilter::TRACE };
    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(console_level);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("contact_etl=info"));

    // try_init so tests and embedders that already installed a subscriber keep theirs
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}

//! File logging for the CLI. Stdout is reserved for command output, so
//! diagnostics go to a daily-rolling file under `~/.valheim-monitor/logs/`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "valheim-status.log";

/// Installs the subscriber. Keep the returned guard alive for the whole
/// process; dropping it flushes and stops the writer.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = valheim_core::monitor_home_dir()?.join("logs");
    if let Err(err) = fs_err::create_dir_all(&log_dir) {
        eprintln!("valheim-status: logging disabled: {}", err);
        return None;
    }

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .is_ok();

    installed.then_some(guard)
}

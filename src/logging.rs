//! Logging setup: console plus a daily-rolling log file.
//!
//! The library itself only uses `log` macros; this installs a
//! `tracing-subscriber` stack bridging them, with local-time stamps and
//! cleanup of log files older than the retention window.

use std::fs;
use std::io;
use std::path::Path;

use chrono::Local;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging with console and file output.
pub fn init_logging(
    log_dir: &Path,
    retention_days: u64,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(log_dir)?;
    clean_old_logs(log_dir, retention_days)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "dvbepg.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // the guard flushes on drop; keep it alive for the process lifetime
    Box::leak(Box::new(guard));

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(io::stdout)
                .with_target(true)
                .with_timer(LocalTimer),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_ansi(false)
                .with_timer(LocalTimer),
        );
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

/// Remove log files past the retention window.
fn clean_old_logs(log_dir: &Path, retention_days: u64) -> io::Result<()> {
    if !log_dir.exists() {
        return Ok(());
    }
    let cutoff = Local::now() - chrono::Duration::days(retention_days as i64);
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file()
            || !path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains("dvbepg.log"))
        {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if chrono::DateTime::<Local>::from(modified) < cutoff {
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("failed to remove old log file {path:?}: {e}");
            }
        }
    }
    Ok(())
}

/// Local-time timestamps in log lines.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"))
    }
}

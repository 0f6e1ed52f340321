//! `tracing` initialization (`SPEC_FULL.md` §A.2), generalized from the
//! teacher's ad hoc per-event JSON logging into a proper subscriber.

use crate::defs;
use tracing_subscriber::{fmt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("TASQUE_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Supervisor/worker-side logging: non-blocking file appender to
/// `tasq.log`. Returns the guard that must be held for the subscriber's
/// lifetime — dropping it stops flushing.
pub fn init_daemon() -> tracing_appender::non_blocking::WorkerGuard {
    let dir = defs::tasque_dir();
    let _ = std::fs::create_dir_all(&dir);
    let file_appender = tracing_appender::rolling::never(&dir, "tasq.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    guard
}

/// CLI-side logging: stderr only, quiet by default so interactive
/// output stays clean.
pub fn init_cli() {
    let _ = fmt().with_env_filter(env_filter()).with_writer(std::io::stderr).try_init();
}

//! Harness log output.
//!
//! Harness diagnostics go to `<log_saved_dir>/dtest.log`, truncated at every
//! run, and to stdout as well when `PRINT_DEBUG` is set. `RUST_LOG`
//! overrides the default filter.

use std::fs::File;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

use crate::utils::file_io::create_parent_dir_if_not_exist;
use crate::Error;
use crate::HarnessConfig;
use crate::Result;

/// Driver chatter is only interesting when something breaks.
const DRIVER_DIRECTIVE: &str = "scylla=warn";

/// `DEBUG`/`TRACE` raise node log levels, not the harness's: its own debug
/// lines are always kept.
pub(crate) fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("debug,{}", DRIVER_DIRECTIVE)))
}

/// Installs the global subscriber. Keep the returned guard alive until the
/// suite ends or buffered lines are lost.
pub fn init_logging(config: &HarnessConfig) -> Result<WorkerGuard> {
    let path = config.harness_log_path();
    create_parent_dir_if_not_exist(&path)?;
    let log_file = File::create(&path)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(default_filter());

    let stdout_layer = config.print_debug.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_filter(default_filter())
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| Error::Fatal(format!("logging already initialised: {}", e)))?;

    Ok(guard)
}

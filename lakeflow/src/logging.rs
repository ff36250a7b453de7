//! Process-wide tracing setup.

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use crate::runtime::FilesystemLayout;

const LOG_FILE_PREFIX: &str = "lakeflow";
const DEFAULT_FILTER: &str = "info";

/// Flushes the file writer when the process exits.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber: `RUST_LOG` filter (default `info`), stderr output,
/// and a daily rolling file under `<home>/logs`.
///
/// Only the first call per process has an effect. If another subscriber was
/// installed by the embedding application, it is left in place.
pub fn init_logging_for(layout: &FilesystemLayout) -> LakeflowResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = layout.logs_dir();
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(&logs_dir)
        .map_err(|e| {
            LakeflowError::Storage(format!(
                "Failed to open log directory {}: {}",
                logs_dir.display(),
                e
            ))
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let installed = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok();

    if installed {
        let _ = LOG_GUARD.set(guard);
    }
    Ok(())
}

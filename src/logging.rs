//! Tracing subscriber setup for the binary.

use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const LOG_ENV_VAR: &str = "REDMIRROR_LOG";
const DEFAULT_DIRECTIVE: &str = "redmirror=info";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// Filtering follows `REDMIRROR_LOG` (default `redmirror=info`). Output goes
/// to stderr, or to `log_file` through a background writer; keep the returned
/// guard alive until exit so buffered lines get flushed.
pub fn init(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
    .or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVE))
    .map_err(|e| eyre!("Invalid log filter: {}", e))?;

  let (layer, guard): (BoxedLayer, Option<WorkerGuard>) = match log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer: BoxedLayer = Box::new(
        tracing_subscriber::fmt::layer()
          .with_writer(writer)
          .with_ansi(false)
          .with_target(true)
          .with_thread_names(true),
      );
      (layer, Some(guard))
    }
    None => {
      let layer: BoxedLayer = Box::new(
        tracing_subscriber::fmt::layer()
          .compact()
          .with_writer(std::io::stderr)
          .with_target(false),
      );
      (layer, None)
    }
  };

  Registry::default()
    .with(layer.with_filter(filter))
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

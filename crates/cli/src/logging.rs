//! Logging setup for the aftershock binary

use std::path::Path;

use aftershock_core::config::{LogRotation, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Filter from the config level plus `-v`/`-q` flags. `RUST_LOG` still wins.
fn env_filter(config: &LoggingConfig, verbose: u8, quiet: bool) -> EnvFilter {
  let directive = if quiet {
    "warn".to_string()
  } else {
    match verbose {
      0 => config.level.clone(),
      1 => "debug".to_string(),
      _ => "trace".to_string(),
    }
  };
  EnvFilter::builder()
    .with_default_directive(directive.parse().unwrap_or_else(|_| tracing::Level::INFO.into()))
    .from_env_lossy()
}

/// Console logging, or rolling-file logging when a file is picked on the
/// command line or in the config.
///
/// Returns the appender guard, which must be kept alive for the duration of
/// the program.
pub fn init_logging(config: &LoggingConfig, verbose: u8, quiet: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
  let filter = env_filter(config, verbose, quiet);
  let Some(path) = log_file.or(config.file.as_deref()) else {
    tracing_subscriber::fmt().with_env_filter(filter).init();
    return None;
  };

  let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
  let name = path
    .file_name()
    .map(|n| n.to_os_string())
    .unwrap_or_else(|| "aftershock.log".into());
  if std::fs::create_dir_all(directory).is_err() {
    // Fall back to console-only logging.
    tracing_subscriber::fmt().with_env_filter(filter).init();
    return None;
  }

  let appender = match config.rotation {
    LogRotation::Hourly => tracing_appender::rolling::hourly(directory, name),
    LogRotation::Never => tracing_appender::rolling::never(directory, name),
    LogRotation::Daily => tracing_appender::rolling::daily(directory, name),
  };
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_ansi(false)
    .with_writer(writer)
    .init();
  Some(guard)
}

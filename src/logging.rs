//! Logging initialization for the consumer binary.

use snafu::{ResultExt, Snafu};
use std::{fs::OpenOptions, path::Path, sync::Arc};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Snafu)]
pub enum LoggingError {
    #[snafu(display("invalid log-level directive: {source}"))]
    InvalidFilter {
        source: tracing_subscriber::filter::ParseError,
    },

    #[snafu(display("cannot open log file {}: {source}", path.display()))]
    OpenLogFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("cannot install the tracing subscriber: {source}"))]
    Install {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Install the global tracing subscriber honoring `--log-level` and
/// `--log-file` (stdout when unset).
pub fn init_logs(log_level: &str, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_new(log_level).context(InvalidFilterSnafu)?;

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(OpenLogFileSnafu { path })?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .try_init()
                .context(InstallSnafu)
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .context(InstallSnafu),
    }
}

use crate::error::{ScreenlogError, ScreenlogResult};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_FILTER: &str = "screenlog=info,screenlog_lib=info,tower_http=info";

/// Where and how much to log
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directive used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Plain-text copy of the log, appended to
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_FILTER.to_string(),
            file: Some(PathBuf::from("screenlog.log")),
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("SCREENLOG_LOG_FILE") {
            config.file = if path.trim().is_empty() || path == "-" {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        config
    }
}

/// Install the global tracing subscriber
///
/// Logs go to stdout and, when configured, to a file without ANSI colours.
pub fn init(config: &LoggingConfig) -> ScreenlogResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let file_layer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    ScreenlogError::InvalidConfiguration(format!(
                        "cannot open log file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| ScreenlogError::Internal(format!("logging already initialized: {}", e)))
}

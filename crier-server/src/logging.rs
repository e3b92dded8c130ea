//! Logging setup for the crier server
//!
//! Installs a `tracing` subscriber suited to how the server is being run.
//! Library code in `crier` only emits events; this is the one place that
//! decides where they go.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber installed
    Silent,
    /// Compact stderr output
    Development,
    /// Verbose output with source locations
    Debug,
}

impl std::str::FromStr for LoggingMode {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "silent" => Ok(LoggingMode::Silent),
            "development" | "dev" => Ok(LoggingMode::Development),
            "debug" => Ok(LoggingMode::Debug),
            other => Err(LoggingError::InvalidSetting(format!(
                "unknown logging mode '{other}' (expected silent, development or debug)"
            ))),
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid logging setting: {0}")]
    InvalidSetting(String),
}

/// Initialize logging with the specified mode
///
/// # Environment Variables
///
/// - `CRIER_LOG_LEVEL`: filter directive overriding the mode's default level
///   (e.g. `debug` or `crier=trace,warp=info`)
/// - `RUST_LOG`: used when `CRIER_LOG_LEVEL` is not set
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;

            Registry::default()
                .with(
                    fmt::layer()
                        .pretty()
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter)
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Create an environment filter with fallback to default level
fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var("CRIER_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directives)
        .map_err(|e| LoggingError::InvalidSetting(format!("bad filter '{directives}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_mode() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
    }

    #[test]
    fn test_parse_logging_mode() {
        assert_eq!("silent".parse::<LoggingMode>().unwrap(), LoggingMode::Silent);
        assert_eq!("Development".parse::<LoggingMode>().unwrap(), LoggingMode::Development);
        assert_eq!("dev".parse::<LoggingMode>().unwrap(), LoggingMode::Development);
        assert_eq!("DEBUG".parse::<LoggingMode>().unwrap(), LoggingMode::Debug);
        assert!(matches!(
            "loud".parse::<LoggingMode>(),
            Err(LoggingError::InvalidSetting(_))
        ));
    }
}

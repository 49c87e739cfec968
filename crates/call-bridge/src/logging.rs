//! Logging setup
//!
//! The bridge only emits `tracing` events; installing a subscriber is left to the host
//! application. [`setup_logging`] is the stock way to do it, usually driven by the same
//! [`LogLevel`] passed to the engine at initialization.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogLevel;
use crate::error::{BridgeError, BridgeResult};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Maximum level; `OFF` silences the bridge
    pub level: LevelFilter,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span enter/exit
    pub log_spans: bool,
    /// Application name for the welcome line
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LevelFilter::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "sipkit".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level: LevelFilter::from_level(level),
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

impl From<LogLevel> for LoggingConfig {
    fn from(level: LogLevel) -> Self {
        LoggingConfig {
            level: level.tracing_level().map_or(LevelFilter::OFF, LevelFilter::from_level),
            ..Default::default()
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` directives are honoured on top of `config.level`. Fails if a global subscriber
/// is already set.
pub fn setup_logging(config: LoggingConfig) -> BridgeResult<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| BridgeError::config(format!("Logging setup failed: {}", e)))?;

    log_welcome(&config.app_name, crate::VERSION);
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> BridgeResult<Level> {
    Level::from_str(level).map_err(|_| BridgeError::config(format!("Invalid log level: {}", level)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} call bridge v{}", app_name, version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_log_level_maps_to_filter() {
        assert_eq!(LoggingConfig::from(LogLevel::None).level, LevelFilter::OFF);
        assert_eq!(LoggingConfig::from(LogLevel::Warning).level, LevelFilter::WARN);
        assert_eq!(LoggingConfig::from(LogLevel::Debug).level, LevelFilter::DEBUG);
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("loud"), Err(BridgeError::Config { .. })));
    }

    #[test]
    fn test_builder_flags() {
        let config = LoggingConfig::new(Level::TRACE, "demo").with_json().with_file_info().with_spans();
        assert_eq!(config.level, LevelFilter::TRACE);
        assert!(config.json && config.file_info && config.log_spans);
        assert_eq!(config.app_name, "demo");
    }
}

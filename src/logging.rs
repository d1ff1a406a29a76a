//! Structured logging setup.
//!
//! Library code only emits `tracing` events; this module installs the
//! subscriber for the binary. The level comes from `[application] log_level`
//! unless `RUST_LOG` is set, in which case the environment filter wins.
//!
//! Event conventions used across the crate:
//! - `info!` for run-state transitions, mode switches and exports
//! - `warn!` for tick faults, failed switches and the demo-mode fallback
//! - `debug!` for individual samples and configuration commands
//!
//! # Example
//! ```no_run
//! use rust_meter::{config::MeterConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MeterConfig::load()?;
//! logging::init(logging::LoggingConfig::from_config(&config)?)?;
//! tracing::info!("Meter started");
//! # Ok(())
//! # }
//! ```

use crate::config::MeterConfig;
use crate::error::{MeterError, MeterResult};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, colored (interactive use)
    #[default]
    Pretty,
    /// One line per event, no colors
    Compact,
    /// Newline-delimited JSON
    Json,
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Emit span open/close events
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// ANSI colors (pretty format only)
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Options derived from the application section.
    pub fn from_config(config: &MeterConfig) -> MeterResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
            ..Default::default()
        })
    }

    /// Options with the given level and defaults otherwise.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the global subscriber.
///
/// Calling this again after a subscriber is installed returns `Ok(())`, so
/// tests and embedding applications may call it freely.
pub fn init(config: LoggingConfig) -> MeterResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(false)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .boxed(),
    };

    match tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already") => Ok(()),
        Err(e) => Err(MeterError::Config(format!(
            "Failed to initialize logging: {e}"
        ))),
    }
}

/// Parse a level name, ignoring case.
pub fn parse_log_level(level: &str) -> MeterResult<Level> {
    level.trim().parse::<Level>().map_err(|_| {
        MeterError::Config(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("warn").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("INFO").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn level_and_format_come_from_application_section() {
        let mut config = MeterConfig::default();
        config.application.log_level = "debug".into();
        config.application.log_format = OutputFormat::Json;

        let logging = LoggingConfig::from_config(&config).unwrap();
        assert_eq!(logging.level, Level::DEBUG);
        assert_eq!(logging.format, OutputFormat::Json);
    }
}

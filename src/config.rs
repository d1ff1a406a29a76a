//! Configuration using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. A TOML file (`config/meter.toml` unless another path is given)
//! 3. Environment variables prefixed with `RUST_METER_`, nested keys
//!    separated by `__`
//!
//! # Example
//! ```no_run
//! use rust_meter::config::MeterConfig;
//!
//! let config = MeterConfig::load()?;
//! config.validate()?;
//! println!("Profile: {}", config.instrument.profile);
//! # Ok::<(), rust_meter::error::MeterError>(())
//! ```
//!
//! `RUST_METER_ACQUISITION__INTERVAL_MS=250` overrides `[acquisition] interval_ms`.

use crate::error::{MeterError, MeterResult};
use crate::logging::OutputFormat;
use crate::modes::{InstrumentProfile, ModeRegistry};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/meter.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Instrument connection
    pub instrument: InstrumentConfig,
    /// Sampling defaults
    pub acquisition: AcquisitionConfig,
    /// CSV export
    pub export: ExportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Rust Meter".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
        }
    }
}

/// How the instrument is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Built-in simulated meter, no hardware
    #[default]
    Simulated,
    /// Raw SCPI socket (usually port 5025)
    Tcp,
    /// RS-232
    Serial,
}

/// Instrument connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Instrument family; selects the mode table
    pub profile: InstrumentProfile,
    /// Transport to open
    pub transport: TransportKind,
    /// `host:port` for the tcp transport
    pub address: Option<String>,
    /// Device path for the serial transport
    pub serial_port: Option<String>,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Connect and response timeout in milliseconds
    pub timeout_ms: u64,
    /// Use the simulated meter when the instrument cannot be opened
    pub fallback_to_simulation: bool,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            profile: InstrumentProfile::default(),
            transport: TransportKind::default(),
            address: None,
            serial_port: None,
            baud_rate: 9600,
            timeout_ms: 2000,
            fallback_to_simulation: true,
        }
    }
}

/// Sampling defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Mode selected when the session starts
    pub initial_mode: String,
    /// Sampling interval in milliseconds
    pub interval_ms: u64,
    /// Upper bound for a single read; unbounded when absent
    pub query_timeout_ms: Option<u64>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            initial_mode: "CAP".to_string(),
            interval_ms: 500,
            query_timeout_ms: None,
        }
    }
}

impl AcquisitionConfig {
    /// Per-read timeout, if one is configured.
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

/// CSV export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory for generated file names
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
        }
    }
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl MeterConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> MeterResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> MeterResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(MeterConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUST_METER_").split("__"))
    }

    /// Mode registry for the configured profile.
    pub fn registry(&self) -> ModeRegistry {
        ModeRegistry::for_profile(self.instrument.profile)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> MeterResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(MeterError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.acquisition.interval_ms == 0 {
            return Err(MeterError::Config(
                "acquisition.interval_ms must be greater than zero".into(),
            ));
        }

        if self.acquisition.query_timeout_ms == Some(0) {
            return Err(MeterError::Config(
                "acquisition.query_timeout_ms must be greater than zero".into(),
            ));
        }

        if !self.registry().contains(&self.acquisition.initial_mode) {
            return Err(MeterError::Config(format!(
                "initial_mode '{}' is not available on profile {}",
                self.acquisition.initial_mode, self.instrument.profile
            )));
        }

        match self.instrument.transport {
            TransportKind::Tcp if self.instrument.address.is_none() => Err(MeterError::Config(
                "instrument.address is required for the tcp transport".into(),
            )),
            TransportKind::Serial if self.instrument.serial_port.is_none() => {
                Err(MeterError::Config(
                    "instrument.serial_port is required for the serial transport".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

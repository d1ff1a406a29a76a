//! Instrument link abstraction and transports.
//!
//! The acquisition core talks to the bench instrument through a single
//! capability, [`InstrumentLink`]: send an opaque configuration string, or send
//! a query and get the response string back. Everything instrument-specific
//! (the SCPI vocabulary, terminators, timeouts) lives either in the Mode
//! Registry or inside a transport.
//!
//! Transports:
//!
//! - [`tcp::ScpiTcpLink`] - raw-socket SCPI for LAN instruments
//! - [`serial::ScpiSerialLink`] - RS-232 SCPI (feature `instrument_serial`)
//! - [`simulated::SimulatedMeter`] - stand-in used when no hardware answers
//! - [`mock::ScriptedLink`] - scripted test double
//!
//! [`open_link`] performs the startup probe: it opens the configured transport
//! and, if allowed, falls back to the simulated meter. Callers receive an
//! `Arc<dyn InstrumentLink>` and never branch on which one they got.

use crate::config::{InstrumentConfig, TransportKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod simulated;
pub mod tcp;

pub use mock::{LinkCall, ScriptedLink};
pub use simulated::SimulatedMeter;
pub use tcp::ScpiTcpLink;

/// A failure returned by, or while talking to, the instrument.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum LinkFault {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Timed out waiting for response to '{0}'")]
    Timeout(String),

    #[error("Unparsable reading: '{response}'")]
    Malformed { response: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command/response channel to a measuring device or its stand-in.
///
/// # Contract
/// - Commands are opaque strings; the link adds its own line terminator.
/// - `configure` does not wait for a response.
/// - `query` returns the response with the terminator stripped.
/// - Methods take `&self`; implementations serialize access internally.
#[async_trait]
pub trait InstrumentLink: Send + Sync {
    /// Short human-readable description of the link (resource, port, ...).
    fn name(&self) -> &str;

    /// Send a configuration command that produces no response.
    async fn configure(&self, command: &str) -> Result<(), LinkFault>;

    /// Send a query and return the instrument's response.
    async fn query(&self, command: &str) -> Result<String, LinkFault>;
}

/// What [`open_link`] ended up connecting to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Description of the opened link
    pub description: String,
    /// True when the simulated meter is standing in for hardware
    pub simulated: bool,
}

/// Open the instrument link described by the configuration.
///
/// When the configured transport cannot be opened and
/// `fallback_to_simulation` is set, a [`SimulatedMeter`] is returned instead
/// and the switch to demo mode is logged.
pub async fn open_link(
    config: &InstrumentConfig,
) -> Result<(Arc<dyn InstrumentLink>, LinkInfo), LinkFault> {
    let timeout = Duration::from_millis(config.timeout_ms);

    let attempt: Result<Arc<dyn InstrumentLink>, LinkFault> = match config.transport {
        TransportKind::Simulated => return Ok(simulated_link()),
        TransportKind::Tcp => match config.address.as_deref() {
            Some(address) => ScpiTcpLink::connect(address, timeout)
                .await
                .map(|link| Arc::new(link) as Arc<dyn InstrumentLink>),
            None => Err(LinkFault::ConnectionFailed(
                "no tcp address configured".into(),
            )),
        },
        TransportKind::Serial => open_serial(config, timeout),
    };

    match attempt {
        Ok(link) => {
            info!(link = link.name(), "Instrument link opened");
            let description = link.name().to_string();
            Ok((
                link,
                LinkInfo {
                    description,
                    simulated: false,
                },
            ))
        }
        Err(e) if config.fallback_to_simulation => {
            warn!(error = %e, "No instrument connected, demo mode activated");
            Ok(simulated_link())
        }
        Err(e) => Err(e),
    }
}

fn simulated_link() -> (Arc<dyn InstrumentLink>, LinkInfo) {
    let meter = SimulatedMeter::new();
    let description = meter.name().to_string();
    (
        Arc::new(meter),
        LinkInfo {
            description,
            simulated: true,
        },
    )
}

#[cfg(feature = "instrument_serial")]
fn open_serial(
    config: &InstrumentConfig,
    timeout: Duration,
) -> Result<Arc<dyn InstrumentLink>, LinkFault> {
    let port = config
        .serial_port
        .as_deref()
        .ok_or_else(|| LinkFault::ConnectionFailed("no serial port configured".into()))?;
    serial::ScpiSerialLink::open(port, config.baud_rate, timeout)
        .map(|link| Arc::new(link) as Arc<dyn InstrumentLink>)
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial(
    _config: &InstrumentConfig,
    _timeout: Duration,
) -> Result<Arc<dyn InstrumentLink>, LinkFault> {
    Err(LinkFault::ConnectionFailed(
        "serial support not enabled. Rebuild with --features instrument_serial".into(),
    ))
}

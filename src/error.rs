//! Custom error types for the meter core.
//!
//! `MeterError` is the single error type surfaced by every public operation of
//! the crate. It follows the three-way taxonomy of the acquisition core:
//!
//! - **`InvalidInterval`**: user input (the sampling interval) was rejected.
//!   The requested operation is aborted and no state changes.
//! - **`UnknownMode`**: a mode identifier is not registered for the active
//!   instrument profile. Also aborts with state unchanged.
//! - **`InstrumentFault`**: the instrument link failed, either at the transport
//!   level or because a reading could not be parsed. During `select` it aborts
//!   the mode switch; during a scheduled tick it is reported and acquisition
//!   continues.
//!
//! The remaining variants cover the ambient surfaces (export, configuration,
//! the session actor).

use crate::instrument::LinkFault;
use crate::scheduler::RunState;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type MeterResult<T> = std::result::Result<T, MeterError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum MeterError {
    #[error("Invalid sampling interval '{0}': expected a positive whole number of milliseconds")]
    InvalidInterval(String),

    #[error("Unknown measurement mode: {0}")]
    UnknownMode(String),

    #[error("Instrument fault: {0}")]
    InstrumentFault(#[from] LinkFault),

    #[error("Cannot {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: RunState,
    },

    #[error("Export error: {0}")]
    Export(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Acquisition session is no longer running")]
    SessionClosed,
}

impl MeterError {
    /// Whether the error leaves the session usable.
    ///
    /// Everything except a closed session is recoverable: the operation was
    /// rejected but the scheduler, series and current mode are intact.
    pub fn can_recover(&self) -> bool {
        !matches!(self, MeterError::SessionClosed)
    }
}

impl From<figment::Error> for MeterError {
    fn from(value: figment::Error) -> Self {
        MeterError::Config(value.to_string())
    }
}

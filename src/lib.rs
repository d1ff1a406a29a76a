//! # Rust Meter Core Library
//!
//! Acquisition core for SCPI bench meters: pick a measurement mode, sample the
//! instrument on a fixed interval, keep the `(elapsed, value)` history of the
//! run, and export it as CSV. The same core drives the headless `run`
//! command, the interactive console and the tests.
//!
//! ## Crate Structure
//!
//! - **`modes`**: the Mode Registry. Data-driven table of measurement modes per
//!   instrument profile (configuration commands, unit labels, session prelude).
//! - **`controller`**: the Mode-Switch Controller. Applies mode changes to the
//!   instrument atomically.
//! - **`scheduler`**: the Sampling Scheduler state machine
//!   (`Idle → Running ⇄ Paused → Stopped`) and the reading parser.
//! - **`series`**: append-only sample history of the current run.
//! - **`instrument`**: the `InstrumentLink` capability with TCP, serial,
//!   simulated and scripted implementations, plus the startup probe.
//! - **`session`**: Tokio actor that owns a scheduler and its periodic clock.
//! - **`render`**: redraw notifications for front ends.
//! - **`export`**: two-column CSV export.
//! - **`console`**: line-command parser for the interactive front end.
//! - **`config`**, **`logging`**, **`error`**: ambient plumbing.
//!
//! ## Example
//!
//! ```no_run
//! use rust_meter::{instrument::SimulatedMeter, modes::ModeRegistry, scheduler::SamplingScheduler, session};
//! use std::sync::Arc;
//!
//! # async fn example() -> rust_meter::error::MeterResult<()> {
//! let scheduler = SamplingScheduler::new(
//!     Arc::new(SimulatedMeter::new()),
//!     Arc::new(ModeRegistry::default()),
//!     "CAP",
//! )?;
//! scheduler.initialize().await?;
//!
//! let (handle, _task) = session::spawn(scheduler);
//! handle.start(500).await?;
//! tokio::time::sleep(std::time::Duration::from_secs(2)).await;
//! handle.stop().await?;
//! handle.save(Some("capacitance.csv".into())).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod console;
pub mod controller;
pub mod error;
pub mod export;
pub mod instrument;
pub mod logging;
pub mod modes;
pub mod render;
pub mod scheduler;
pub mod series;
pub mod session;

pub use error::{MeterError, MeterResult};

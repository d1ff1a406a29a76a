//! Simulated bench meter.
//!
//! Stands in for the real instrument when none answers the startup probe.
//! Every configuration command is accepted and recorded. `READ?` answers
//! `amplitude * sin(t)`, where `t` is the time in seconds since the last
//! `CONF:` command, so a fresh run (which re-applies the mode) starts its
//! waveform at zero.
//!
//! Uses `tokio::time::Instant`, so the waveform follows a paused test clock.

use super::{InstrumentLink, LinkFault};
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Identification string returned for `*IDN?`
pub const SIMULATED_IDN: &str = "RUST-METER,SIMULATED METER,0,0.1";

struct MeterState {
    origin: Instant,
    function: Option<String>,
    commands: Vec<String>,
}

/// Simulated meter answering SCPI reads with a synthesized sine wave.
pub struct SimulatedMeter {
    state: Mutex<MeterState>,
    amplitude: f64,
    noise: f64,
}

impl SimulatedMeter {
    /// Create a meter with unit amplitude and no noise.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MeterState {
                origin: Instant::now(),
                function: None,
                commands: Vec::new(),
            }),
            amplitude: 1.0,
            noise: 0.0,
        }
    }

    /// Scale the synthesized waveform.
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Add uniform noise in `[-noise, noise)` to every reading.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// Configuration commands received so far, in order.
    pub async fn commands(&self) -> Vec<String> {
        self.state.lock().await.commands.clone()
    }

    /// Function selected by the most recent `CONF:` command.
    pub async fn function(&self) -> Option<String> {
        self.state.lock().await.function.clone()
    }
}

impl Default for SimulatedMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstrumentLink for SimulatedMeter {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn configure(&self, command: &str) -> Result<(), LinkFault> {
        let mut state = self.state.lock().await;
        trace!("Simulated meter: {}", command);

        let upper = command.trim().to_ascii_uppercase();
        if let Some(function) = upper.strip_prefix("CONF:") {
            state.function = Some(function.to_string());
            state.origin = Instant::now();
        } else if upper == "*RST" {
            state.function = None;
        }
        state.commands.push(command.to_string());
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String, LinkFault> {
        let state = self.state.lock().await;
        match command.trim().to_ascii_uppercase().as_str() {
            "READ?" => {
                let t = state.origin.elapsed().as_secs_f64();
                let mut value = self.amplitude * t.sin();
                if self.noise > 0.0 {
                    value += rand::thread_rng().gen_range(-self.noise..self.noise);
                }
                Ok(format!("{:+.6E}", value))
            }
            "*IDN?" => Ok(SIMULATED_IDN.to_string()),
            _ => Err(LinkFault::QueryFailed(format!(
                "simulated meter does not answer '{}'",
                command
            ))),
        }
    }
}

//! Mode Registry
//!
//! Static, data-driven mapping from a measurement-mode identifier (`CAP`,
//! `RES`, ...) to the configuration command sequence that selects it and the
//! unit label shown on charts and in exported files. Adding a mode is a new
//! registry entry, never a new branch in the controller.
//!
//! Registries are built from an [`InstrumentProfile`], which also carries the
//! session prelude (commands issued once when the session starts, such as the
//! global reset and auto-range toggles) and the read query.
//!
//! A registry is immutable after construction, so lookups are safe to run
//! concurrently with anything else.

use crate::error::{MeterError, MeterResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registered measurement mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeSpec {
    /// Identifier, e.g. `CAP`
    pub id: String,
    /// Measured quantity, e.g. `Capacitance`
    pub quantity: String,
    /// Unit symbol, e.g. `F`
    pub unit: String,
    /// Commands that select this mode, in issue order
    pub commands: Vec<String>,
}

impl ModeSpec {
    /// Mode whose sequence is just `CONF:<id>`.
    pub fn new(id: &str, quantity: &str, unit: &str) -> Self {
        Self {
            id: id.to_string(),
            quantity: quantity.to_string(),
            unit: unit.to_string(),
            commands: vec![format!("CONF:{id}")],
        }
    }

    /// Append a command to the selection sequence.
    pub fn then(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Label used for the chart axis and the exported value column,
    /// e.g. `Capacitance (F)`.
    pub fn unit_label(&self) -> String {
        format!("{} ({})", self.quantity, self.unit)
    }
}

/// Instrument families the registry knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentProfile {
    /// Keithley 2110 5½-digit DMM over USB-TMC/LAN
    #[default]
    Keithley2110,
    /// Keithley 6485 picoammeter over GPIB/RS-232
    Keithley6485,
}

impl InstrumentProfile {
    /// All known profiles.
    pub const ALL: [InstrumentProfile; 2] =
        [InstrumentProfile::Keithley2110, InstrumentProfile::Keithley6485];

    /// Configuration name of the profile.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentProfile::Keithley2110 => "keithley2110",
            InstrumentProfile::Keithley6485 => "keithley6485",
        }
    }
}

impl fmt::Display for InstrumentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentProfile {
    type Err = MeterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstrumentProfile::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MeterError::Config(format!("Unknown instrument profile '{s}'")))
    }
}

/// Lookup table of measurement modes for one instrument.
#[derive(Debug, Clone, Serialize)]
pub struct ModeRegistry {
    prelude: Vec<String>,
    read_command: String,
    modes: Vec<ModeSpec>,
}

impl ModeRegistry {
    /// Empty registry with the given session prelude and read query.
    pub fn new(prelude: Vec<String>, read_command: impl Into<String>) -> Self {
        Self {
            prelude,
            read_command: read_command.into(),
            modes: Vec::new(),
        }
    }

    /// Register a mode. A mode with the same id replaces the earlier one.
    pub fn register(mut self, mode: ModeSpec) -> Self {
        match self.modes.iter_mut().find(|m| m.id == mode.id) {
            Some(existing) => *existing = mode,
            None => self.modes.push(mode),
        }
        self
    }

    /// Registry for a known instrument profile.
    pub fn for_profile(profile: InstrumentProfile) -> Self {
        match profile {
            InstrumentProfile::Keithley2110 => Self::new(vec!["*RST".into()], "READ?")
                .register(
                    ModeSpec::new("CAP", "Capacitance", "F")
                        .then("CAP:RES 0.00001")
                        .then("CAP:RANG:AUTO ON"),
                )
                .register(ModeSpec::new("RES", "Resistance", "Ω"))
                .register(ModeSpec::new("IND", "Inductance", "H"))
                .register(ModeSpec::new("COND", "Conductance", "S")),
            InstrumentProfile::Keithley6485 => {
                let prelude = [
                    "*RST",
                    "SYST:ZCH OFF",
                    "SYST:ZCOR OFF",
                    "RANG:AUTO ON",
                    "TRIG:COUNT 1",
                    "NPLC 0.01",
                    "AZER OFF",
                    "AVER:STAT OFF",
                    "FORM:ELEM READ",
                ]
                .into_iter()
                .map(String::from)
                .collect();

                [
                    ("CAP", "Capacitance", "F"),
                    ("RES", "Resistance", "Ω"),
                    ("IND", "Inductance", "H"),
                    ("COND", "Conductance", "S"),
                    ("VOLT", "Voltage", "V"),
                    ("CURR", "Current", "A"),
                ]
                .into_iter()
                .fold(Self::new(prelude, "READ?"), |registry, (id, quantity, unit)| {
                    registry.register(
                        ModeSpec::new(id, quantity, unit).then(format!("{id}:RANG:AUTO ON")),
                    )
                })
            }
        }
    }

    /// Look up a mode by identifier.
    ///
    /// Matching ignores case and surrounding whitespace, and only the first
    /// word is considered, so list-entry text such as `"CAP (Capacitance)"`
    /// resolves to `CAP`.
    pub fn lookup(&self, id: &str) -> MeterResult<&ModeSpec> {
        let key = id.split_whitespace().next().unwrap_or_default();
        self.modes
            .iter()
            .find(|m| m.id.eq_ignore_ascii_case(key))
            .ok_or_else(|| MeterError::UnknownMode(id.trim().to_string()))
    }

    /// Whether `id` names a registered mode.
    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_ok()
    }

    /// Registered modes in registration order.
    pub fn modes(&self) -> &[ModeSpec] {
        &self.modes
    }

    /// Commands issued once when a session starts.
    pub fn session_prelude(&self) -> &[String] {
        &self.prelude
    }

    /// Query that takes one reading.
    pub fn read_command(&self) -> &str {
        &self.read_command
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::for_profile(InstrumentProfile::default())
    }
}

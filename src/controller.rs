//! Mode-Switch Controller
//!
//! Applies mode transitions to the instrument link. A switch is atomic from
//! the caller's point of view: either the whole configuration sequence of the
//! new mode is accepted and the new mode (with its unit label) becomes
//! current, or the previous mode stays current and an `InstrumentFault` is
//! returned.
//!
//! If a sequence fails after some of its commands were already accepted, the
//! controller re-issues the previous mode's sequence so the instrument is put
//! back in line with the mode the data model still reports.

use crate::error::{MeterError, MeterResult};
use crate::instrument::{InstrumentLink, LinkFault};
use crate::modes::{ModeRegistry, ModeSpec};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the "current mode" and keeps the instrument configured for it.
pub struct ModeSwitchController {
    link: Arc<dyn InstrumentLink>,
    registry: Arc<ModeRegistry>,
    current: ModeSpec,
}

impl ModeSwitchController {
    /// Create a controller whose current mode is `initial`.
    ///
    /// Nothing is sent to the instrument until [`initialize`](Self::initialize)
    /// or [`select`](Self::select) is called.
    pub fn new(
        link: Arc<dyn InstrumentLink>,
        registry: Arc<ModeRegistry>,
        initial: &str,
    ) -> MeterResult<Self> {
        let current = registry.lookup(initial)?.clone();
        Ok(Self {
            link,
            registry,
            current,
        })
    }

    /// Issue the session prelude followed by the current mode's sequence.
    ///
    /// Called once per session; global resets and auto-range toggles live in
    /// the prelude and are not repeated on later switches.
    pub async fn initialize(&self) -> MeterResult<()> {
        info!(mode = %self.current.id, "Initializing instrument session");
        self.issue(self.registry.session_prelude())
            .await
            .map_err(|(_, fault)| fault)?;
        self.reapply().await
    }

    /// Switch to `id`.
    ///
    /// Re-selecting the current mode re-issues its sequence, which is safe to
    /// repeat.
    pub async fn select(&mut self, id: &str) -> MeterResult<&ModeSpec> {
        let target = self.registry.lookup(id)?.clone();

        if let Err((accepted, fault)) = self.issue(&target.commands).await {
            warn!(
                from = %self.current.id,
                to = %target.id,
                error = %fault,
                "Mode switch failed, keeping previous mode"
            );
            if accepted > 0 {
                if let Err(restore) = self.reapply().await {
                    warn!(mode = %self.current.id, error = %restore, "Could not restore previous mode");
                }
            }
            return Err(MeterError::InstrumentFault(fault));
        }

        info!(from = %self.current.id, to = %target.id, "Mode selected");
        self.current = target;
        Ok(&self.current)
    }

    /// Re-issue the current mode's configuration sequence.
    pub async fn reapply(&self) -> MeterResult<()> {
        self.issue(&self.current.commands)
            .await
            .map_err(|(_, fault)| MeterError::InstrumentFault(fault))
    }

    /// Current mode.
    pub fn current(&self) -> &ModeSpec {
        &self.current
    }

    /// Unit label of the current mode.
    pub fn unit_label(&self) -> String {
        self.current.unit_label()
    }

    /// Registry the controller resolves modes against.
    pub fn registry(&self) -> &ModeRegistry {
        &self.registry
    }

    /// Send commands in order, stopping at the first failure.
    ///
    /// On failure returns how many commands were accepted before it.
    async fn issue(&self, commands: &[String]) -> Result<(), (usize, LinkFault)> {
        for (index, command) in commands.iter().enumerate() {
            debug!(command = %command, "Configure");
            self.link
                .configure(command)
                .await
                .map_err(|fault| (index, fault))?;
        }
        Ok(())
    }
}

//! Acquisition session actor.
//!
//! A [`SamplingScheduler`] is owned by a single Tokio task. Front ends talk to
//! it through a cloneable [`SessionHandle`], which sends [`SessionCommand`]
//! messages over an mpsc channel and awaits the reply on a oneshot channel.
//!
//! The periodic clock lives inside the same task:
//!
//! ```text
//! SessionHandle ──mpsc──┐
//!                       ├──> tokio::select! ──> SamplingScheduler
//! Interval (ticker) ────┘         (one at a time)
//! ```
//!
//! Because commands and ticks are taken from one `select!` loop and each one
//! is awaited to completion, no two operations ever run concurrently and a
//! tick can never overlap the previous one. A tick that overruns its period
//! makes the ticker skip the missed deadlines (`MissedTickBehavior::Skip`).
//!
//! The first tick of a run fires as soon as `start` has replied. `stop`
//! drops the ticker before replying, so no tick runs after it returns.

use crate::error::{MeterError, MeterResult};
use crate::export;
use crate::modes::ModeSpec;
use crate::scheduler::{RunState, SamplingInterval, SamplingScheduler};
use crate::series::Series;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

const COMMAND_CAPACITY: usize = 32;

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    /// Run state
    pub state: RunState,
    /// Current mode id
    pub mode: String,
    /// Current unit label
    pub unit_label: String,
    /// Samples in the series
    pub samples: usize,
    /// Interval of the current or last run
    pub interval_ms: Option<u64>,
    /// Seconds since the run's start time
    pub elapsed_s: f64,
    /// Ticks that failed to produce a sample
    pub faults: u64,
    /// Most recent tick fault
    pub last_fault: Option<String>,
}

/// Commands accepted by the session task.
///
/// Use the constructor helpers (e.g. [`SessionCommand::pause`]) to get the
/// command together with its reply receiver.
#[derive(Debug)]
pub enum SessionCommand {
    /// Switch measurement mode
    Select {
        /// Mode id
        mode: String,
        /// Newly current mode
        response: oneshot::Sender<MeterResult<ModeSpec>>,
    },
    /// Start a run with an integer interval
    Start {
        /// Interval in milliseconds
        interval_ms: i64,
        /// Validated interval
        response: oneshot::Sender<MeterResult<SamplingInterval>>,
    },
    /// Start a run from raw user input
    StartInput {
        /// Interval text, e.g. `"500"`
        input: String,
        /// Validated interval
        response: oneshot::Sender<MeterResult<SamplingInterval>>,
    },
    /// Running → Paused
    Pause {
        /// Transition result
        response: oneshot::Sender<MeterResult<()>>,
    },
    /// Paused → Running
    Resume {
        /// Transition result
        response: oneshot::Sender<MeterResult<()>>,
    },
    /// Flip between Running and Paused
    TogglePause {
        /// New state
        response: oneshot::Sender<MeterResult<RunState>>,
    },
    /// End the run, keep the series
    Stop {
        /// Transition result
        response: oneshot::Sender<MeterResult<()>>,
    },
    /// Clear the series
    Reset {
        /// Acknowledgement
        response: oneshot::Sender<()>,
    },
    /// Export the series as CSV
    Save {
        /// Destination; `None` is a cancelled save
        path: Option<PathBuf>,
        /// Written path, if any
        response: oneshot::Sender<MeterResult<Option<PathBuf>>>,
    },
    /// Copy of the series
    Snapshot {
        /// Series copy
        response: oneshot::Sender<Series>,
    },
    /// Session status
    Status {
        /// Status
        response: oneshot::Sender<SessionStatus>,
    },
    /// Stop the task
    Shutdown {
        /// Acknowledgement
        response: oneshot::Sender<()>,
    },
}

impl SessionCommand {
    /// Build a `Select` command.
    pub fn select(mode: impl Into<String>) -> (Self, oneshot::Receiver<MeterResult<ModeSpec>>) {
        let (response, rx) = oneshot::channel();
        (
            Self::Select {
                mode: mode.into(),
                response,
            },
            rx,
        )
    }

    /// Build a `Start` command.
    pub fn start(interval_ms: i64) -> (Self, oneshot::Receiver<MeterResult<SamplingInterval>>) {
        let (response, rx) = oneshot::channel();
        (
            Self::Start {
                interval_ms,
                response,
            },
            rx,
        )
    }

    /// Build a `StartInput` command.
    pub fn start_input(
        input: impl Into<String>,
    ) -> (Self, oneshot::Receiver<MeterResult<SamplingInterval>>) {
        let (response, rx) = oneshot::channel();
        (
            Self::StartInput {
                input: input.into(),
                response,
            },
            rx,
        )
    }

    /// Build a `Pause` command.
    pub fn pause() -> (Self, oneshot::Receiver<MeterResult<()>>) {
        let (response, rx) = oneshot::channel();
        (Self::Pause { response }, rx)
    }

    /// Build a `Resume` command.
    pub fn resume() -> (Self, oneshot::Receiver<MeterResult<()>>) {
        let (response, rx) = oneshot::channel();
        (Self::Resume { response }, rx)
    }

    /// Build a `TogglePause` command.
    pub fn toggle_pause() -> (Self, oneshot::Receiver<MeterResult<RunState>>) {
        let (response, rx) = oneshot::channel();
        (Self::TogglePause { response }, rx)
    }

    /// Build a `Stop` command.
    pub fn stop() -> (Self, oneshot::Receiver<MeterResult<()>>) {
        let (response, rx) = oneshot::channel();
        (Self::Stop { response }, rx)
    }

    /// Build a `Reset` command.
    pub fn reset() -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::Reset { response }, rx)
    }

    /// Build a `Save` command.
    pub fn save(path: Option<PathBuf>) -> (Self, oneshot::Receiver<MeterResult<Option<PathBuf>>>) {
        let (response, rx) = oneshot::channel();
        (Self::Save { path, response }, rx)
    }

    /// Build a `Snapshot` command.
    pub fn snapshot() -> (Self, oneshot::Receiver<Series>) {
        let (response, rx) = oneshot::channel();
        (Self::Snapshot { response }, rx)
    }

    /// Build a `Status` command.
    pub fn status() -> (Self, oneshot::Receiver<SessionStatus>) {
        let (response, rx) = oneshot::channel();
        (Self::Status { response }, rx)
    }

    /// Build a `Shutdown` command.
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::Shutdown { response }, rx)
    }
}

/// Task that owns the scheduler and its clock.
pub struct SessionActor {
    scheduler: SamplingScheduler,
    ticker: Option<Interval>,
}

impl SessionActor {
    /// Wrap an already initialized scheduler.
    pub fn new(scheduler: SamplingScheduler) -> Self {
        Self {
            scheduler,
            ticker: None,
        }
    }

    /// Process commands and ticks until shutdown or until every handle is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!(mode = %self.scheduler.current_mode().id, "Session started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown { response }) => {
                        self.halt();
                        let _ = response.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.halt();
                        break;
                    }
                },
                _ = next_tick(&mut self.ticker) => {
                    self.scheduler.tick().await;
                }
            }
        }

        info!(samples = self.scheduler.series().len(), "Session ended");
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Select { mode, response } => {
                let result = self.scheduler.select(&mode).await.cloned();
                let _ = response.send(result);
            }
            SessionCommand::Start {
                interval_ms,
                response,
            } => {
                let result = self.scheduler.start(interval_ms).await;
                self.arm(&result);
                let _ = response.send(result);
            }
            SessionCommand::StartInput { input, response } => {
                let result = self.scheduler.start_with_input(&input).await;
                self.arm(&result);
                let _ = response.send(result);
            }
            SessionCommand::Pause { response } => {
                let _ = response.send(self.scheduler.pause());
            }
            SessionCommand::Resume { response } => {
                let _ = response.send(self.scheduler.resume());
            }
            SessionCommand::TogglePause { response } => {
                let _ = response.send(self.scheduler.toggle_pause());
            }
            SessionCommand::Stop { response } => {
                let result = self.scheduler.stop();
                self.ticker = None;
                let _ = response.send(result);
            }
            SessionCommand::Reset { response } => {
                self.scheduler.reset();
                let _ = response.send(());
            }
            SessionCommand::Save { path, response } => {
                let label = self.scheduler.unit_label();
                let result = export::save_csv(path.as_deref(), self.scheduler.series(), &label);
                let _ = response.send(result);
            }
            SessionCommand::Snapshot { response } => {
                let _ = response.send(self.scheduler.series().clone());
            }
            SessionCommand::Status { response } => {
                let _ = response.send(self.status());
            }
            SessionCommand::Shutdown { response } => {
                // handled by the run loop
                let _ = response.send(());
            }
        }
    }

    fn arm(&mut self, started: &MeterResult<SamplingInterval>) {
        if let Ok(interval) = started {
            let mut ticker = time::interval_at(Instant::now(), interval.as_duration());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            self.ticker = Some(ticker);
            debug!(interval_ms = interval.as_millis(), "Ticker armed");
        }
    }

    fn halt(&mut self) {
        self.ticker = None;
        // Stopping an inactive scheduler cannot fail.
        let _ = self.scheduler.stop();
    }

    fn status(&self) -> SessionStatus {
        let stats = self.scheduler.stats();
        SessionStatus {
            state: self.scheduler.state(),
            mode: self.scheduler.current_mode().id.clone(),
            unit_label: self.scheduler.unit_label(),
            samples: self.scheduler.series().len(),
            interval_ms: self.scheduler.interval().map(|i| i.as_millis()),
            elapsed_s: self.scheduler.elapsed().as_secs_f64(),
            faults: stats.faults,
            last_fault: stats.last_fault.clone(),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Spawn the session task for `scheduler`.
pub fn spawn(scheduler: SamplingScheduler) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let task = tokio::spawn(SessionActor::new(scheduler).run(rx));
    (SessionHandle { tx }, task)
}

/// Cloneable front-end handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Switch the measurement mode.
    pub async fn select(&self, mode: &str) -> MeterResult<ModeSpec> {
        let (cmd, rx) = SessionCommand::select(mode);
        self.request(cmd, rx).await?
    }

    /// Start a run with an interval in milliseconds.
    pub async fn start(&self, interval_ms: i64) -> MeterResult<SamplingInterval> {
        let (cmd, rx) = SessionCommand::start(interval_ms);
        self.request(cmd, rx).await?
    }

    /// Start a run from interval text entered by the user.
    pub async fn start_with_input(&self, input: &str) -> MeterResult<SamplingInterval> {
        let (cmd, rx) = SessionCommand::start_input(input);
        self.request(cmd, rx).await?
    }

    /// Pause the run.
    pub async fn pause(&self) -> MeterResult<()> {
        let (cmd, rx) = SessionCommand::pause();
        self.request(cmd, rx).await?
    }

    /// Resume the run.
    pub async fn resume(&self) -> MeterResult<()> {
        let (cmd, rx) = SessionCommand::resume();
        self.request(cmd, rx).await?
    }

    /// Flip between Running and Paused.
    pub async fn toggle_pause(&self) -> MeterResult<RunState> {
        let (cmd, rx) = SessionCommand::toggle_pause();
        self.request(cmd, rx).await?
    }

    /// Stop the run. No tick runs after this returns.
    pub async fn stop(&self) -> MeterResult<()> {
        let (cmd, rx) = SessionCommand::stop();
        self.request(cmd, rx).await?
    }

    /// Clear the series without stopping.
    pub async fn reset(&self) -> MeterResult<()> {
        let (cmd, rx) = SessionCommand::reset();
        self.request(cmd, rx).await
    }

    /// Export the series; `None` does nothing.
    pub async fn save(&self, path: Option<PathBuf>) -> MeterResult<Option<PathBuf>> {
        let (cmd, rx) = SessionCommand::save(path);
        self.request(cmd, rx).await?
    }

    /// Copy of the current series.
    pub async fn snapshot(&self) -> MeterResult<Series> {
        let (cmd, rx) = SessionCommand::snapshot();
        self.request(cmd, rx).await
    }

    /// Current status.
    pub async fn status(&self) -> MeterResult<SessionStatus> {
        let (cmd, rx) = SessionCommand::status();
        self.request(cmd, rx).await
    }

    /// Stop the session task.
    pub async fn shutdown(&self) -> MeterResult<()> {
        let (cmd, rx) = SessionCommand::shutdown();
        self.request(cmd, rx).await
    }

    async fn request<T>(
        &self,
        command: SessionCommand,
        rx: oneshot::Receiver<T>,
    ) -> MeterResult<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| MeterError::SessionClosed)?;
        rx.await.map_err(|_| MeterError::SessionClosed)
    }
}

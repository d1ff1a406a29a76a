//! Sampling Scheduler
//!
//! The state machine at the heart of the acquisition core. It turns a chosen
//! measurement mode and sampling interval into a correctly sequenced stream of
//! configuration commands and periodic reads.
//!
//! # States
//!
//! ```text
//!            start              pause
//!   Idle ──────────────▶ Running ◀─────▶ Paused
//!    ▲                     │    resume     │
//!    │ (start)             │ stop          │ stop
//!    └──── Stopped ◀───────┴───────────────┘
//! ```
//!
//! `Stopped` behaves like `Idle` for re-entry: `start` is valid from either.
//!
//! # Ticks
//!
//! The scheduler does not own a clock. Whoever drives it (see
//! [`crate::session`]) calls [`SamplingScheduler::tick`] once per period and
//! awaits it to completion before the next one, so ticks never overlap. Each
//! tick takes `&mut self`, which also rules out any other operation running
//! mid-tick.
//!
//! - **Running**: query the instrument, parse the first comma-delimited field,
//!   append `(elapsed, value)` to the series, notify the renderer.
//! - **Paused**: no query, no sample; the renderer is still notified. Paused
//!   time is not subtracted: elapsed time is always `now - start_time`.
//! - A failed query or an unparsable response is logged, counted and
//!   returned as [`TickOutcome::Faulted`]. The scheduler stays Running.
//!
//! Timestamps use `tokio::time::Instant`, so a paused test clock drives them.

use crate::controller::ModeSwitchController;
use crate::error::{MeterError, MeterResult};
use crate::instrument::{InstrumentLink, LinkFault};
use crate::modes::{ModeRegistry, ModeSpec};
use crate::render::{NullRenderer, Renderer};
use crate::series::{Sample, Series};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Acquisition run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No run has been started yet
    Idle,
    /// Ticks record samples
    Running,
    /// Ticks are skipped, the clock keeps running
    Paused,
    /// The clock is cancelled; the series is kept for export
    Stopped,
}

impl RunState {
    /// True while the periodic clock should be running.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Stopped => "stopped",
        })
    }
}

/// Validated sampling interval: a positive whole number of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SamplingInterval(u64);

impl SamplingInterval {
    /// Validate an integer interval.
    pub fn from_millis(ms: i64) -> MeterResult<Self> {
        if ms <= 0 {
            return Err(MeterError::InvalidInterval(ms.to_string()));
        }
        Ok(Self(ms as u64))
    }

    /// Parse user input such as `"500"`.
    ///
    /// Surrounding whitespace is ignored. Anything that is not a positive
    /// integer (including `"0"`, `"-5"`, `"2.5"` and `""`) is rejected.
    pub fn parse(input: &str) -> MeterResult<Self> {
        input
            .trim()
            .parse::<i64>()
            .map_err(|_| MeterError::InvalidInterval(input.trim().to_string()))
            .and_then(Self::from_millis)
    }

    /// Interval in milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Interval as a `Duration`.
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl FromStr for SamplingInterval {
    type Err = MeterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse an instrument response into a reading.
///
/// The response is trimmed and, for instruments that return composite
/// readings (`"+1.234E-09,+0.000E+00"`), only the first comma-delimited field
/// is used.
pub fn parse_reading(response: &str) -> Result<f64, LinkFault> {
    let trimmed = response.trim();
    let first = trimmed.split(',').next().unwrap_or_default().trim();
    match first.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(LinkFault::Malformed {
            response: trimmed.to_string(),
        }),
    }
}

/// Result of one tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// A sample was appended to the series
    Recorded(Sample),
    /// Paused: no sample this tick
    Skipped,
    /// The read failed; acquisition continues
    Faulted(LinkFault),
    /// Not running: the tick was ignored
    Inactive,
}

/// Counters over the lifetime of the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickStats {
    /// Samples recorded
    pub recorded: u64,
    /// Ticks skipped while paused
    pub skipped: u64,
    /// Ticks that failed to produce a sample
    pub faults: u64,
    /// Message of the most recent fault
    pub last_fault: Option<String>,
}

/// Sampling state machine bound to one instrument link.
pub struct SamplingScheduler {
    link: Arc<dyn InstrumentLink>,
    modes: ModeSwitchController,
    series: Series,
    state: RunState,
    started_at: Option<Instant>,
    interval: Option<SamplingInterval>,
    query_timeout: Option<Duration>,
    renderer: Box<dyn Renderer>,
    stats: TickStats,
}

impl SamplingScheduler {
    /// Create an idle scheduler whose current mode is `initial_mode`.
    pub fn new(
        link: Arc<dyn InstrumentLink>,
        registry: Arc<ModeRegistry>,
        initial_mode: &str,
    ) -> MeterResult<Self> {
        let modes = ModeSwitchController::new(link.clone(), registry, initial_mode)?;
        Ok(Self {
            link,
            modes,
            series: Series::new(),
            state: RunState::Idle,
            started_at: None,
            interval: None,
            query_timeout: None,
            renderer: Box::new(NullRenderer),
            stats: TickStats::default(),
        })
    }

    /// Notify `renderer` after every resolved tick.
    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    /// Bound every read query by `timeout`.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Send the session prelude and the current mode's configuration.
    pub async fn initialize(&self) -> MeterResult<()> {
        self.modes.initialize().await
    }

    /// Switch the measurement mode. Valid in any state.
    pub async fn select(&mut self, id: &str) -> MeterResult<&ModeSpec> {
        self.modes.select(id).await
    }

    /// Start a run with an integer interval in milliseconds.
    ///
    /// Valid from `Idle` or `Stopped`. The current mode's configuration is
    /// re-applied before the run begins; if that fails, the run is not started.
    /// On success the series is cleared and `start_time` is set to now.
    pub async fn start(&mut self, interval_ms: i64) -> MeterResult<SamplingInterval> {
        let interval = SamplingInterval::from_millis(interval_ms)?;
        self.start_with(interval).await
    }

    /// Start a run from user input such as `"500"`.
    pub async fn start_with_input(&mut self, input: &str) -> MeterResult<SamplingInterval> {
        let interval = SamplingInterval::parse(input)?;
        self.start_with(interval).await
    }

    /// Start a run with an already validated interval.
    pub async fn start_with(&mut self, interval: SamplingInterval) -> MeterResult<SamplingInterval> {
        if self.state.is_active() {
            return Err(MeterError::InvalidTransition {
                operation: "start",
                state: self.state,
            });
        }

        self.modes.reapply().await?;

        self.series.clear();
        self.started_at = Some(Instant::now());
        self.interval = Some(interval);
        self.state = RunState::Running;
        info!(
            mode = %self.modes.current().id,
            interval_ms = interval.as_millis(),
            "Acquisition started"
        );
        Ok(interval)
    }

    /// Execute one sampling step.
    pub async fn tick(&mut self) -> TickOutcome {
        match self.state {
            RunState::Idle | RunState::Stopped => TickOutcome::Inactive,
            RunState::Paused => {
                self.stats.skipped += 1;
                self.redraw();
                TickOutcome::Skipped
            }
            RunState::Running => {
                let elapsed_s = self.elapsed().as_secs_f64();
                match self.read().await {
                    Ok(value) => {
                        let sample = Sample::new(elapsed_s, value);
                        self.series.append(sample);
                        self.stats.recorded += 1;
                        debug!(elapsed_s, value, "Sample recorded");
                        self.redraw();
                        TickOutcome::Recorded(sample)
                    }
                    Err(fault) => {
                        self.stats.faults += 1;
                        self.stats.last_fault = Some(fault.to_string());
                        warn!(
                            elapsed_s,
                            mode = %self.modes.current().id,
                            error = %fault,
                            "Sample failed, acquisition continues"
                        );
                        TickOutcome::Faulted(fault)
                    }
                }
            }
        }
    }

    /// Running → Paused. Pausing while paused is a no-op.
    pub fn pause(&mut self) -> MeterResult<()> {
        match self.state {
            RunState::Running => {
                self.state = RunState::Paused;
                info!("Acquisition paused");
                Ok(())
            }
            RunState::Paused => Ok(()),
            state => Err(MeterError::InvalidTransition {
                operation: "pause",
                state,
            }),
        }
    }

    /// Paused → Running. Resuming while running is a no-op.
    pub fn resume(&mut self) -> MeterResult<()> {
        match self.state {
            RunState::Paused => {
                self.state = RunState::Running;
                info!("Acquisition resumed");
                Ok(())
            }
            RunState::Running => Ok(()),
            state => Err(MeterError::InvalidTransition {
                operation: "resume",
                state,
            }),
        }
    }

    /// Flip between Running and Paused; returns the new state.
    pub fn toggle_pause(&mut self) -> MeterResult<RunState> {
        match self.state {
            RunState::Paused => self.resume()?,
            _ => self.pause()?,
        }
        Ok(self.state)
    }

    /// Running/Paused → Stopped. The series is kept.
    ///
    /// Stopping when no run is active changes nothing.
    pub fn stop(&mut self) -> MeterResult<()> {
        if self.state.is_active() {
            self.state = RunState::Stopped;
            info!(samples = self.series.len(), "Acquisition stopped");
        }
        Ok(())
    }

    /// Clear the series without touching the run state or the clock.
    pub fn reset(&mut self) {
        self.series.clear();
        debug!(state = %self.state, "Series reset");
        self.redraw();
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Samples of the current run.
    pub fn series(&self) -> &Series {
        &self.series
    }

    /// Interval of the current or last run.
    pub fn interval(&self) -> Option<SamplingInterval> {
        self.interval
    }

    /// Current mode.
    pub fn current_mode(&self) -> &ModeSpec {
        self.modes.current()
    }

    /// Unit label of the current mode.
    pub fn unit_label(&self) -> String {
        self.modes.unit_label()
    }

    /// Registry used for mode lookups.
    pub fn registry(&self) -> &ModeRegistry {
        self.modes.registry()
    }

    /// Tick counters.
    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Time since the run's start, zero before the first run.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    async fn read(&self) -> Result<f64, LinkFault> {
        let command = self.modes.registry().read_command();
        let response = match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, self.link.query(command))
                .await
                .map_err(|_| LinkFault::Timeout(command.to_string()))??,
            None => self.link.query(command).await?,
        };
        parse_reading(&response)
    }

    fn redraw(&mut self) {
        let label = self.modes.unit_label();
        self.renderer.redraw(&self.series, &label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{LinkCall, ScriptedLink};
    use crate::modes::InstrumentProfile;
    use tracing_test::traced_test;

    fn scheduler(link: &Arc<ScriptedLink>) -> SamplingScheduler {
        let registry = Arc::new(ModeRegistry::for_profile(InstrumentProfile::Keithley2110));
        SamplingScheduler::new(link.clone(), registry, "CAP").unwrap()
    }

    #[test]
    fn scheduler_can_move_into_the_session_task() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SamplingScheduler>();
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(SamplingInterval::parse("500").unwrap().as_millis(), 500);
        assert_eq!(SamplingInterval::parse(" 1 ").unwrap().as_millis(), 1);
        for bad in ["0", "-5", "2.5", "", "fast"] {
            assert!(
                matches!(SamplingInterval::parse(bad), Err(MeterError::InvalidInterval(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn reading_parser_takes_first_field() {
        assert_eq!(parse_reading("1.000").unwrap(), 1.0);
        assert_eq!(parse_reading(" +1.5E-09,+0.0E+00 \r\n").unwrap(), 1.5e-9);
        assert!(matches!(
            parse_reading("OVERLOAD"),
            Err(LinkFault::Malformed { response }) if response == "OVERLOAD"
        ));
        assert!(parse_reading("").is_err());
        assert!(parse_reading("NaN").is_err());
    }

    #[tokio::test]
    async fn invalid_interval_leaves_state_and_instrument_untouched() {
        let link = Arc::new(ScriptedLink::new());
        let mut sched = scheduler(&link);

        assert!(sched.start_with_input("abc").await.is_err());
        assert!(sched.start(0).await.is_err());
        assert_eq!(sched.state(), RunState::Idle);
        assert!(link.calls().is_empty());
    }

    #[tokio::test]
    async fn start_reapplies_mode_and_clears_series() {
        let link = Arc::new(ScriptedLink::new().with_readings(["1.0", "2.0"]));
        let mut sched = scheduler(&link);

        sched.start(100).await.unwrap();
        assert!(matches!(sched.tick().await, TickOutcome::Recorded(_)));
        sched.stop().unwrap();
        assert_eq!(sched.series().len(), 1);

        link.clear_calls();
        sched.start(100).await.unwrap();
        assert!(sched.series().is_empty());
        assert_eq!(
            link.configured(),
            vec!["CONF:CAP", "CAP:RES 0.00001", "CAP:RANG:AUTO ON"]
        );
    }

    #[tokio::test]
    async fn start_while_running_is_rejected() {
        let link = Arc::new(ScriptedLink::new());
        let mut sched = scheduler(&link);
        sched.start(100).await.unwrap();
        sched.pause().unwrap();

        let err = sched.start(100).await.unwrap_err();
        assert!(matches!(
            err,
            MeterError::InvalidTransition { operation: "start", state: RunState::Paused }
        ));
        assert_eq!(sched.state(), RunState::Paused);
    }

    #[tokio::test]
    async fn failed_reapply_does_not_start() {
        let link = Arc::new(ScriptedLink::new());
        link.fail_configure_on("CONF:CAP");
        let mut sched = scheduler(&link);

        assert!(matches!(
            sched.start(100).await,
            Err(MeterError::InstrumentFault(_))
        ));
        assert_eq!(sched.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn paused_ticks_do_not_query() {
        let link = Arc::new(ScriptedLink::new().with_readings(["1.0"]));
        let mut sched = scheduler(&link);
        sched.start(100).await.unwrap();
        sched.pause().unwrap();

        assert!(matches!(sched.tick().await, TickOutcome::Skipped));
        assert_eq!(link.query_count(), 0);
        assert_eq!(sched.stats().skipped, 1);

        sched.resume().unwrap();
        assert!(matches!(sched.tick().await, TickOutcome::Recorded(_)));
        assert_eq!(link.calls().last(), Some(&LinkCall::Query("READ?".into())));
    }

    #[tokio::test]
    async fn fault_is_counted_and_run_continues() {
        let link = Arc::new(ScriptedLink::new());
        link.push_fault("bus error");
        link.push_reading("garbage");
        link.push_reading("3.0");
        let mut sched = scheduler(&link);
        sched.start(100).await.unwrap();

        assert!(matches!(sched.tick().await, TickOutcome::Faulted(LinkFault::QueryFailed(_))));
        assert!(matches!(sched.tick().await, TickOutcome::Faulted(LinkFault::Malformed { .. })));
        assert!(matches!(sched.tick().await, TickOutcome::Recorded(s) if s.value == 3.0));

        assert_eq!(sched.state(), RunState::Running);
        assert_eq!(sched.series().len(), 1);
        assert_eq!(sched.stats().faults, 2);
        assert!(sched.stats().last_fault.as_deref().unwrap().contains("garbage"));
    }

    #[tokio::test]
    #[traced_test]
    async fn tick_fault_is_reported_in_logs() {
        let link = Arc::new(ScriptedLink::new());
        link.push_fault("bus error");
        let mut sched = scheduler(&link);
        sched.start(100).await.unwrap();

        sched.tick().await;
        assert!(logs_contain("Sample failed, acquisition continues"));
        assert!(logs_contain("bus error"));
    }

    #[tokio::test]
    async fn ticks_outside_a_run_are_ignored() {
        let link = Arc::new(ScriptedLink::new().with_readings(["1.0"]));
        let mut sched = scheduler(&link);
        assert!(matches!(sched.tick().await, TickOutcome::Inactive));

        sched.start(100).await.unwrap();
        sched.stop().unwrap();
        assert!(matches!(sched.tick().await, TickOutcome::Inactive));
        assert_eq!(link.query_count(), 0);
    }

    #[tokio::test]
    async fn pause_and_resume_require_an_active_run() {
        let link = Arc::new(ScriptedLink::new());
        let mut sched = scheduler(&link);
        assert!(sched.pause().is_err());
        assert!(sched.resume().is_err());
        assert!(sched.toggle_pause().is_err());
        // Stopping an idle scheduler is harmless.
        sched.stop().unwrap();
        assert_eq!(sched.state(), RunState::Idle);

        sched.start(100).await.unwrap();
        assert_eq!(sched.toggle_pause().unwrap(), RunState::Paused);
        assert_eq!(sched.toggle_pause().unwrap(), RunState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_query_is_bounded_by_timeout() {
        let link = Arc::new(
            ScriptedLink::new()
                .with_readings(["1.0"])
                .with_query_delay(Duration::from_secs(10)),
        );
        let mut sched = scheduler(&link).with_query_timeout(Duration::from_millis(200));
        sched.start(500).await.unwrap();

        assert!(matches!(
            sched.tick().await,
            TickOutcome::Faulted(LinkFault::Timeout(cmd)) if cmd == "READ?"
        ));
        assert_eq!(sched.state(), RunState::Running);
    }
}

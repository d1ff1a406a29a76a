//! Scripted instrument link for tests and offline playback.
//!
//! Queries are answered from a FIFO of scripted replies (readings or faults),
//! configuration commands can be made to fail on demand, and every call is
//! recorded so tests can assert on the exact command sequence that reached the
//! instrument.

use super::{InstrumentLink, LinkFault};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// One call that reached the link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkCall {
    /// `configure(command)`
    Configure(String),
    /// `query(command)`
    Query(String),
}

enum Reply {
    Reading(String),
    Fault(String),
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    failing: HashSet<String>,
    calls: Vec<LinkCall>,
    accepted: Vec<String>,
}

/// Instrument link that replays a script.
///
/// # Example
///
/// ```rust,ignore
/// let link = ScriptedLink::new().with_readings(["1.000", "2.000"]);
/// assert_eq!(link.query("READ?").await?, "1.000");
/// ```
#[derive(Default)]
pub struct ScriptedLink {
    script: Mutex<Script>,
    query_delay: Option<Duration>,
}

impl ScriptedLink {
    /// Create a link with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue readings to be returned by successive queries.
    pub fn with_readings<I, S>(self, readings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for reading in readings {
            self.push_reading(reading);
        }
        self
    }

    /// Delay every query, simulating a slow instrument.
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    /// Queue one reading.
    pub fn push_reading(&self, reading: impl Into<String>) {
        self.script()
            .replies
            .push_back(Reply::Reading(reading.into()));
    }

    /// Queue one failed query.
    pub fn push_fault(&self, message: impl Into<String>) {
        self.script().replies.push_back(Reply::Fault(message.into()));
    }

    /// Make every `configure(command)` fail until cleared.
    pub fn fail_configure_on(&self, command: impl Into<String>) {
        self.script().failing.insert(command.into());
    }

    /// Let all configuration commands succeed again.
    pub fn clear_configure_faults(&self) {
        self.script().failing.clear();
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<LinkCall> {
        self.script().calls.clone()
    }

    /// Configuration commands that were accepted, in order.
    pub fn configured(&self) -> Vec<String> {
        self.script().accepted.clone()
    }

    /// Number of queries received.
    pub fn query_count(&self) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|call| matches!(call, LinkCall::Query(_)))
            .count()
    }

    /// Forget recorded calls (the reply queue is kept).
    pub fn clear_calls(&self) {
        let mut script = self.script();
        script.calls.clear();
        script.accepted.clear();
    }

    /// Replies still queued.
    pub fn remaining(&self) -> usize {
        self.script().replies.len()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // A panicking test thread must not wedge every later assertion.
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl InstrumentLink for ScriptedLink {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn configure(&self, command: &str) -> Result<(), LinkFault> {
        let mut script = self.script();
        script.calls.push(LinkCall::Configure(command.to_string()));
        if script.failing.contains(command) {
            return Err(LinkFault::SendFailed(format!("scripted failure on '{command}'")));
        }
        script.accepted.push(command.to_string());
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String, LinkFault> {
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script();
        script.calls.push(LinkCall::Query(command.to_string()));
        match script.replies.pop_front() {
            Some(Reply::Reading(value)) => Ok(value),
            Some(Reply::Fault(message)) => Err(LinkFault::QueryFailed(message)),
            None => Err(LinkFault::QueryFailed("no scripted response".into())),
        }
    }
}

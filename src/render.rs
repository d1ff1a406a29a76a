//! Redraw notifications.
//!
//! The scheduler calls [`Renderer::redraw`] after every resolved tick (a
//! recorded sample or a tick skipped while paused) and after `reset`. The
//! acquisition core never draws anything itself; front ends plug in here.

use crate::series::{Sample, Series};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Consumer of series updates.
///
/// Implementations must tolerate an empty series. The scheduler is shared
/// with the session task across awaits, so renderers are `Send + Sync`.
pub trait Renderer: Send + Sync {
    /// Called with the full series and the current unit label.
    fn redraw(&mut self, series: &Series, label: &str);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn redraw(&mut self, _series: &Series, _label: &str) {}
}

/// Logs the newest point of the series, one line per new sample.
#[derive(Debug, Default)]
pub struct LogRenderer {
    shown: usize,
}

impl LogRenderer {
    /// New renderer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for LogRenderer {
    fn redraw(&mut self, series: &Series, label: &str) {
        if series.len() < self.shown {
            // series was reset
            self.shown = 0;
        }
        if series.len() == self.shown {
            return;
        }
        self.shown = series.len();
        if let Some(last) = series.last() {
            info!(
                elapsed_s = last.elapsed_s,
                value = last.value,
                label,
                samples = series.len(),
                "Reading"
            );
        }
    }
}

/// Point-in-time copy of the series for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    /// Unit label of the mode that was current at redraw time
    pub label: String,
    /// Samples in time order
    pub samples: Vec<Sample>,
    /// Number of redraws so far
    pub revision: u64,
}

impl SeriesSnapshot {
    /// Most recent sample.
    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

/// Publishes every redraw as a [`SeriesSnapshot`] on a watch channel.
///
/// Subscribers only ever see the latest snapshot; a slow chart skips frames
/// instead of slowing acquisition.
pub struct SnapshotPublisher {
    tx: watch::Sender<SeriesSnapshot>,
    revision: u64,
}

impl SnapshotPublisher {
    /// Create a publisher and the receiver for the first subscriber.
    pub fn new() -> (Self, watch::Receiver<SeriesSnapshot>) {
        let (tx, rx) = watch::channel(SeriesSnapshot::default());
        (Self { tx, revision: 0 }, rx)
    }

    /// Additional subscriber.
    pub fn subscribe(&self) -> watch::Receiver<SeriesSnapshot> {
        self.tx.subscribe()
    }
}

impl Renderer for SnapshotPublisher {
    fn redraw(&mut self, series: &Series, label: &str) {
        self.revision += 1;
        // No subscribers left is fine; the value is kept for later ones.
        self.tx.send_replace(SeriesSnapshot {
            label: label.to_string(),
            samples: series.samples().to_vec(),
            revision: self.revision,
        });
    }
}

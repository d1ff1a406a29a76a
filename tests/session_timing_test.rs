//! Integration tests for the session clock: tick cadence, pause, reset,
//! stop and fault tolerance.
//!
//! All tests run on a paused Tokio clock, so elapsed times are exact.

use rust_meter::instrument::ScriptedLink;
use rust_meter::modes::ModeRegistry;
use rust_meter::scheduler::{RunState, SamplingScheduler};
use rust_meter::session::{self, SessionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const TOLERANCE: f64 = 0.02;

/// Helper to spawn a session on the default (Keithley 2110) registry.
async fn spawn_session(link: &Arc<ScriptedLink>) -> (SessionHandle, JoinHandle<()>) {
    let scheduler = SamplingScheduler::new(link.clone(), Arc::new(ModeRegistry::default()), "CAP")
        .expect("Failed to create scheduler");
    scheduler
        .initialize()
        .await
        .expect("Failed to initialize scheduler");
    session::spawn(scheduler)
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= TOLERANCE,
        "expected ≈{expected}, got {actual}"
    );
}

fn many_readings(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{i}.0")).collect()
}

#[tokio::test(start_paused = true)]
async fn test_three_readings_then_save() {
    let link = Arc::new(ScriptedLink::new().with_readings(["1.000", "2.000", "3.000"]));
    let (handle, _task) = spawn_session(&link).await;

    handle.start(500).await.unwrap();
    sleep(Duration::from_millis(1100)).await;
    handle.stop().await.unwrap();

    let series = handle.snapshot().await.unwrap();
    assert_eq!(series.len(), 3);
    for (sample, (t, v)) in series.iter().zip([(0.0, 1.0), (0.5, 2.0), (1.0, 3.0)]) {
        assert_close(sample.elapsed_s, t);
        assert_eq!(sample.value, v);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");
    let written = handle.save(Some(path.clone())).await.unwrap();
    assert_eq!(written, Some(path.clone()));

    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("Time,Capacitance (F)"));
    let rows: Vec<(f64, f64)> = lines
        .map(|line| {
            let (t, v) = line.split_once(',').unwrap();
            (t.parse().unwrap(), v.parse().unwrap())
        })
        .collect();
    assert_eq!(rows.len(), 3);
    for ((t, v), (et, ev)) in rows.into_iter().zip([(0.0, 1.0), (0.5, 2.0), (1.0, 3.0)]) {
        assert_close(t, et);
        assert_eq!(v, ev);
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_then_stop_records_at_most_one_sample() {
    let link = Arc::new(ScriptedLink::new().with_readings(many_readings(10)));
    let (handle, _task) = spawn_session(&link).await;

    handle.start(500).await.unwrap();
    handle.stop().await.unwrap();

    let recorded = handle.snapshot().await.unwrap().len();
    assert!(recorded <= 1, "recorded {recorded} samples");

    // No tick may run once stop has returned.
    let queries = link.query_count();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(link.query_count(), queries);
    assert_eq!(handle.status().await.unwrap().state, RunState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_pause_halts_growth_without_shifting_time() {
    let link = Arc::new(ScriptedLink::new().with_readings(many_readings(100)));
    let (handle, _task) = spawn_session(&link).await;

    handle.start(100).await.unwrap();
    sleep(Duration::from_millis(350)).await;
    handle.pause().await.unwrap();
    let before_pause = handle.snapshot().await.unwrap().len();
    assert_eq!(before_pause, 4);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(handle.snapshot().await.unwrap().len(), before_pause);
    assert_eq!(handle.status().await.unwrap().state, RunState::Paused);

    handle.resume().await.unwrap();
    sleep(Duration::from_millis(230)).await;

    let series = handle.snapshot().await.unwrap();
    assert!(series.len() > before_pause);
    // Elapsed time counts the paused span: the first post-resume sample is
    // taken at t = 0.9 s, not at 0.4 s.
    let first_after = series.samples()[before_pause];
    assert_close(first_after.elapsed_s, 0.9);
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_but_keeps_running() {
    let link = Arc::new(ScriptedLink::new().with_readings(many_readings(100)));
    let (handle, _task) = spawn_session(&link).await;

    handle.start(100).await.unwrap();
    sleep(Duration::from_millis(250)).await;
    assert!(!handle.snapshot().await.unwrap().is_empty());

    handle.reset().await.unwrap();
    assert!(handle.snapshot().await.unwrap().is_empty());
    assert_eq!(handle.status().await.unwrap().state, RunState::Running);

    sleep(Duration::from_millis(200)).await;
    let series = handle.snapshot().await.unwrap();
    assert!(!series.is_empty());
    // Timestamps stay relative to the run start.
    assert!(series.samples()[0].elapsed_s >= 0.25);
}

#[tokio::test(start_paused = true)]
async fn test_reset_while_stopped_empties_series() {
    let link = Arc::new(ScriptedLink::new().with_readings(many_readings(10)));
    let (handle, _task) = spawn_session(&link).await;

    handle.start(100).await.unwrap();
    sleep(Duration::from_millis(150)).await;
    handle.stop().await.unwrap();
    assert!(!handle.snapshot().await.unwrap().is_empty());

    handle.reset().await.unwrap();
    assert!(handle.snapshot().await.unwrap().is_empty());
    assert_eq!(handle.status().await.unwrap().state, RunState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_failed_query_does_not_stop_acquisition() {
    let link = Arc::new(ScriptedLink::new().with_readings(["1.0"]));
    link.push_fault("device busy");
    link.push_reading("3.0");
    let (handle, _task) = spawn_session(&link).await;

    handle.start(100).await.unwrap();
    sleep(Duration::from_millis(250)).await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, RunState::Running);
    assert_eq!(status.faults, 1);
    assert!(status.last_fault.unwrap().contains("device busy"));

    let values = handle.snapshot().await.unwrap().values();
    assert_eq!(values, vec![1.0, 3.0]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_instrument_never_overlaps_ticks() {
    // Each read takes 250 ms against a 100 ms interval.
    let link = Arc::new(
        ScriptedLink::new()
            .with_readings(many_readings(100))
            .with_query_delay(Duration::from_millis(250)),
    );
    let (handle, _task) = spawn_session(&link).await;

    handle.start(100).await.unwrap();
    sleep(Duration::from_millis(1000)).await;
    handle.stop().await.unwrap();

    let series = handle.snapshot().await.unwrap();
    // Missed deadlines are skipped, so at most one read per 250 ms.
    assert!(series.len() <= 5, "recorded {} samples", series.len());
    for pair in series.samples().windows(2) {
        assert!(pair[1].elapsed_s - pair[0].elapsed_s >= 0.25 - TOLERANCE);
    }
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_starts_fresh_series() {
    let link = Arc::new(ScriptedLink::new().with_readings(many_readings(20)));
    let (handle, _task) = spawn_session(&link).await;

    handle.start(100).await.unwrap();
    sleep(Duration::from_millis(250)).await;
    handle.stop().await.unwrap();

    sleep(Duration::from_secs(1)).await;
    handle.start_with_input("200").await.unwrap();
    let series = handle.snapshot().await.unwrap();
    assert!(series.len() <= 1);
    sleep(Duration::from_millis(50)).await;
    let series = handle.snapshot().await.unwrap();
    assert_eq!(series.len(), 1);
    assert_close(series.samples()[0].elapsed_s, 0.0);
    assert_eq!(handle.status().await.unwrap().interval_ms, Some(200));
}

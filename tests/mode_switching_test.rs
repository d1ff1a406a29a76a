//! Integration tests for mode selection through a live session.

use rust_meter::error::MeterError;
use rust_meter::instrument::{LinkCall, ScriptedLink};
use rust_meter::modes::{InstrumentProfile, ModeRegistry};
use rust_meter::scheduler::{RunState, SamplingScheduler};
use rust_meter::session::{self, SessionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

async fn spawn_session(
    link: &Arc<ScriptedLink>,
    profile: InstrumentProfile,
) -> (SessionHandle, JoinHandle<()>) {
    let registry = Arc::new(ModeRegistry::for_profile(profile));
    let scheduler =
        SamplingScheduler::new(link.clone(), registry, "CAP").expect("Failed to create scheduler");
    scheduler
        .initialize()
        .await
        .expect("Failed to initialize scheduler");
    session::spawn(scheduler)
}

fn configure(command: &str) -> LinkCall {
    LinkCall::Configure(command.to_string())
}

#[tokio::test]
async fn test_initialize_sends_prelude_before_mode() {
    let link = Arc::new(ScriptedLink::new());
    let (_handle, _task) = spawn_session(&link, InstrumentProfile::Keithley6485).await;

    let configured = link.configured();
    assert_eq!(configured.first().map(String::as_str), Some("*RST"));
    assert_eq!(configured.len(), 9 + 2);
    assert_eq!(&configured[9..], ["CONF:CAP", "CAP:RANG:AUTO ON"]);
}

#[tokio::test(start_paused = true)]
async fn test_start_applies_last_selected_mode() {
    let link = Arc::new(ScriptedLink::new().with_readings(["1.5E-09"]));
    let (handle, _task) = spawn_session(&link, InstrumentProfile::Keithley2110).await;

    handle.select("RES").await.unwrap();
    handle.select("CAP").await.unwrap();
    link.clear_calls();

    handle.start(500).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        link.calls(),
        vec![
            configure("CONF:CAP"),
            configure("CAP:RES 0.00001"),
            configure("CAP:RANG:AUTO ON"),
            LinkCall::Query("READ?".into()),
        ]
    );
}

#[tokio::test]
async fn test_failed_select_keeps_previous_mode() {
    let link = Arc::new(ScriptedLink::new());
    let (handle, _task) = spawn_session(&link, InstrumentProfile::Keithley2110).await;
    link.fail_configure_on("CONF:IND");

    let err = handle.select("IND").await.unwrap_err();
    assert!(matches!(err, MeterError::InstrumentFault(_)));

    let status = handle.status().await.unwrap();
    assert_eq!(status.mode, "CAP");
    assert_eq!(status.unit_label, "Capacitance (F)");

    // A different mode still switches independently.
    let mode = handle.select("COND").await.unwrap();
    assert_eq!(mode.id, "COND");
    assert_eq!(handle.status().await.unwrap().unit_label, "Conductance (S)");
}

#[tokio::test]
async fn test_unknown_mode_is_rejected_without_traffic() {
    let link = Arc::new(ScriptedLink::new());
    let (handle, _task) = spawn_session(&link, InstrumentProfile::Keithley2110).await;
    link.clear_calls();

    let err = handle.select("VOLT").await.unwrap_err();
    assert!(matches!(err, MeterError::UnknownMode(ref id) if id == "VOLT"));
    assert!(link.calls().is_empty());
    assert_eq!(handle.status().await.unwrap().mode, "CAP");
}

#[tokio::test(start_paused = true)]
async fn test_select_while_running_relabels_export() {
    let readings: Vec<String> = (0..20).map(|i| format!("{i}")).collect();
    let link = Arc::new(ScriptedLink::new().with_readings(readings));
    let (handle, _task) = spawn_session(&link, InstrumentProfile::Keithley6485).await;

    handle.start(100).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.select("VOLT").await.unwrap();
    assert_eq!(handle.status().await.unwrap().state, RunState::Running);
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volt.csv");
    handle.save(Some(path.clone())).await.unwrap();
    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.starts_with("Time,Voltage (V)\n"));
}

#[tokio::test]
async fn test_cancelled_save_writes_nothing() {
    let link = Arc::new(ScriptedLink::new());
    let (handle, _task) = spawn_session(&link, InstrumentProfile::Keithley2110).await;
    assert_eq!(handle.save(None).await.unwrap(), None);
}

//! CLI Entry Point for rust-meter
//!
//! Provides command-line interface for:
//! - Timed headless acquisition with CSV export (`run`)
//! - An interactive line console driving a live session (`console`)
//! - Listing the measurement modes of an instrument profile (`modes`)
//!
//! # Usage
//!
//! ```bash
//! rust-meter run --mode CAP --interval 500 --duration-secs 10 --output cap.csv
//! rust-meter console --config config/meter.toml
//! rust-meter modes --profile keithley6485
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_meter::config::{MeterConfig, TransportKind, DEFAULT_CONFIG_PATH};
use rust_meter::console::{ConsoleCommand, HELP};
use rust_meter::export;
use rust_meter::instrument::{open_link, InstrumentLink, LinkInfo};
use rust_meter::logging::{self, LoggingConfig};
use rust_meter::modes::{InstrumentProfile, ModeRegistry};
use rust_meter::render::{LogRenderer, Renderer, SeriesSnapshot, SnapshotPublisher};
use rust_meter::scheduler::{RunState, SamplingScheduler};
use rust_meter::session::{self, SessionHandle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rust-meter")]
#[command(about = "Sampling and mode control for SCPI bench meters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire for a fixed time (or until Ctrl-C) and export CSV
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Measurement mode, overrides acquisition.initial_mode
        #[arg(long)]
        mode: Option<String>,

        /// Sampling interval in milliseconds
        #[arg(long)]
        interval: Option<String>,

        /// Stop after this many seconds; runs until Ctrl-C when omitted
        #[arg(long)]
        duration_secs: Option<u64>,

        /// CSV destination; a timestamped file in export.output_dir by default
        #[arg(long)]
        output: Option<PathBuf>,

        /// Use the simulated meter regardless of configuration
        #[arg(long)]
        simulate: bool,
    },

    /// Interactive console on a live session
    Console {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Use the simulated meter regardless of configuration
        #[arg(long)]
        simulate: bool,
    },

    /// List measurement modes
    Modes {
        /// Instrument profile; all profiles when omitted
        #[arg(long)]
        profile: Option<InstrumentProfile>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            mode,
            interval,
            duration_secs,
            output,
            simulate,
        } => {
            let mut config = load_config(config, simulate)?;
            if let Some(mode) = mode {
                config.acquisition.initial_mode = mode;
            }
            run_timed(config, interval, duration_secs, output).await
        }
        Commands::Console { config, simulate } => {
            let config = load_config(config, simulate)?;
            run_console(config).await
        }
        Commands::Modes { profile } => {
            list_modes(profile);
            Ok(())
        }
    }
}

fn load_config(path: PathBuf, simulate: bool) -> Result<MeterConfig> {
    let mut config = MeterConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if simulate {
        config.instrument.transport = TransportKind::Simulated;
    }
    config.validate().context("Invalid configuration")?;
    logging::init(LoggingConfig::from_config(&config)?)?;
    Ok(config)
}

async fn open_session(
    config: &MeterConfig,
    renderer: impl Renderer + 'static,
) -> Result<(SessionHandle, tokio::task::JoinHandle<()>, LinkInfo)> {
    let (link, link_info): (Arc<dyn InstrumentLink>, LinkInfo) = open_link(&config.instrument)
        .await
        .context("Failed to open instrument link")?;

    let mut scheduler = SamplingScheduler::new(
        link,
        Arc::new(config.registry()),
        &config.acquisition.initial_mode,
    )?
    .with_renderer(renderer);
    if let Some(limit) = config.acquisition.query_timeout() {
        scheduler = scheduler.with_query_timeout(limit);
    }
    scheduler
        .initialize()
        .await
        .context("Failed to configure instrument")?;

    info!(
        link = %link_info.description,
        simulated = link_info.simulated,
        profile = %config.instrument.profile,
        "Session ready"
    );
    let (handle, task) = session::spawn(scheduler);
    Ok((handle, task, link_info))
}

async fn run_timed(
    config: MeterConfig,
    interval: Option<String>,
    duration_secs: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let (handle, task, _) = open_session(&config, LogRenderer::new()).await?;

    let interval = interval.unwrap_or_else(|| config.acquisition.interval_ms.to_string());
    handle.start_with_input(&interval).await?;

    match duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    handle.stop().await?;
    let destination =
        output.unwrap_or_else(|| export::default_destination(&config.export.output_dir));
    if let Some(path) = handle.save(Some(destination)).await? {
        println!("Saved {}", path.display());
    }

    let status = handle.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    handle.shutdown().await?;
    task.await?;
    Ok(())
}

async fn run_console(config: MeterConfig) -> Result<()> {
    let (publisher, snapshots) = SnapshotPublisher::new();
    let (handle, task, link_info) = open_session(&config, publisher).await?;
    let registry = config.registry();

    if link_info.simulated {
        println!("No instrument connected, demo mode activated");
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        if command == ConsoleCommand::Quit {
            break;
        }
        if let Err(e) = execute(&handle, &config, &registry, &snapshots, command).await {
            if !e.can_recover() {
                warn!(error = %e, "Session ended unexpectedly");
                break;
            }
            println!("Error: {e}");
        }
    }

    // Shutdown also stops an active run; a closed session is already gone.
    let _ = handle.shutdown().await;
    task.await?;
    Ok(())
}

async fn execute(
    handle: &SessionHandle,
    config: &MeterConfig,
    registry: &ModeRegistry,
    snapshots: &watch::Receiver<SeriesSnapshot>,
    command: ConsoleCommand,
) -> rust_meter::MeterResult<()> {
    match command {
        ConsoleCommand::Mode(id) => {
            let mode = handle.select(&id).await?;
            println!("Mode: {} [{}]", mode.id, mode.unit_label());
        }
        ConsoleCommand::Start(input) => {
            let input = input.unwrap_or_else(|| config.acquisition.interval_ms.to_string());
            let interval = handle.start_with_input(&input).await?;
            println!("Running every {} ms", interval.as_millis());
        }
        ConsoleCommand::Pause => match handle.toggle_pause().await? {
            RunState::Paused => println!("Paused"),
            state => println!("{state}"),
        },
        ConsoleCommand::Resume => {
            handle.resume().await?;
            println!("Running");
        }
        ConsoleCommand::Stop => {
            handle.stop().await?;
            println!("Stopped");
        }
        ConsoleCommand::Reset => {
            handle.reset().await?;
            println!("Cleared");
        }
        ConsoleCommand::Save(path) => {
            let destination =
                path.unwrap_or_else(|| export::default_destination(&config.export.output_dir));
            if let Some(written) = handle.save(Some(destination)).await? {
                println!("Saved {}", written.display());
            }
        }
        ConsoleCommand::Status => {
            let status = handle.status().await?;
            println!(
                "{} | {} | {} samples | {:.1} s | {} faults",
                status.state, status.unit_label, status.samples, status.elapsed_s, status.faults
            );
            if let Some(last) = snapshots.borrow().last() {
                println!("Last reading: {:.6e} at {:.3} s", last.value, last.elapsed_s);
            }
            if let Some(fault) = status.last_fault {
                println!("Last fault: {fault}");
            }
        }
        ConsoleCommand::Modes => print_registry(registry),
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

fn list_modes(profile: Option<InstrumentProfile>) {
    let profiles: Vec<InstrumentProfile> = match profile {
        Some(profile) => vec![profile],
        None => InstrumentProfile::ALL.to_vec(),
    };
    for profile in profiles {
        println!("{profile}");
        print_registry(&ModeRegistry::for_profile(profile));
        println!();
    }
}

fn print_registry(registry: &ModeRegistry) {
    for mode in registry.modes() {
        println!(
            "  {:<5} {:<18} {}",
            mode.id,
            mode.unit_label(),
            mode.commands.join("; ")
        );
    }
}

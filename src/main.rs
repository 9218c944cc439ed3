//! CLI Entry Point for rust-mount
//!
//! Connects to the configured mount controller and either runs a single
//! intent (goto, park, ...) or keeps the service loop running until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! rust_mount --config config/mount.toml status
//! rust_mount goto --ra 5.5 --dec -5.4
//! rust_mount --simulate run
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mount_core::state::StatusReport;
use mount_core::{EquatorialPosition, Mount, SystemClock, TomlSettingsStore};
use rust_mount::config::{MountConfig, DEFAULT_CONFIG_PATH};
use rust_mount::service::{MountHandle, MountService};
use rust_mount::{drivers, tracing_setup};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rust_mount")]
#[command(about = "Telescope mount control for Astro-Physics and PMC-Eight controllers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the built-in controller simulator instead of the serial port
    #[arg(long)]
    simulate: bool,

    /// Seconds to wait for a slew or park to finish
    #[arg(long, default_value = "300")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the mount once and print its status
    Status,

    /// Slew to equatorial coordinates and wait for arrival
    Goto {
        /// Right ascension in hours
        #[arg(long)]
        ra: f64,
        /// Declination in degrees
        #[arg(long, allow_hyphen_values = true)]
        dec: f64,
    },

    /// Tell the mount it points at the given coordinates
    Sync {
        #[arg(long)]
        ra: f64,
        #[arg(long, allow_hyphen_values = true)]
        dec: f64,
    },

    /// Move to the park pose and wait until parked
    Park,

    /// Leave the parked state and resume tracking
    Unpark,

    /// Stop all motion
    Abort,

    /// Keep polling and report state changes until Ctrl+C
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MountConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if cli.simulate {
        config.device.set_simulate(true);
    }
    config
        .validate(&drivers::available_drivers())
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    tracing_setup::init_from_config(&config).map_err(|e| anyhow!(e))?;

    let (handle, task) = start(&config).await?;
    let timeout = Duration::from_secs(cli.timeout_secs);

    let result: Result<()> = match cli.command {
        Commands::Status => handle.refresh().await.map(|s| print_status(&s)).map_err(Into::into),
        Commands::Goto { ra, dec } => goto(&handle, EquatorialPosition::new(ra, dec), timeout).await,
        Commands::Sync { ra, dec } => handle
            .sync(EquatorialPosition::new(ra, dec))
            .await
            .map_err(Into::into),
        Commands::Park => park(&handle, timeout).await,
        Commands::Unpark => handle.unpark().await.map_err(Into::into),
        Commands::Abort => handle.abort().await.map_err(Into::into),
        Commands::Run => run(&handle).await,
    };

    handle.shutdown().await;
    task.await?;
    result
}

/// Build the driver, connect, and hand the mount to the service task.
async fn start(config: &MountConfig) -> Result<(MountHandle, JoinHandle<()>)> {
    let registry = drivers::registry();
    let protocol = registry
        .build(&config.device.driver, config.device.driver_config())
        .await
        .with_context(|| format!("Failed to build '{}' driver", config.device.driver))?;

    let store = Arc::new(TomlSettingsStore::new(&config.state_file));
    let mut mount = Mount::new(protocol, store, Arc::new(SystemClock))?
        .with_settle_tolerance(config.settle_tolerance);

    let firmware = mount.connect().await.context("Failed to connect to mount")?;
    info!(%firmware, driver = %config.device.driver, "Connected");

    match &config.site {
        Some(site) => {
            mount.update_location(site.observer()).await?;
            mount.update_time(Utc::now(), site.utc_offset_hours).await?;
        }
        None => warn!("No [site] configured, mount left uninitialized"),
    }

    Ok(MountService::new(mount, config.poll_interval()).spawn())
}

async fn goto(handle: &MountHandle, target: EquatorialPosition, timeout: Duration) -> Result<()> {
    handle.goto(target).await?;
    println!("Slewing to {}", target);
    let status = handle.wait_until_stopped(timeout).await?;
    print_status(&status);
    Ok(())
}

async fn park(handle: &MountHandle, timeout: Duration) -> Result<()> {
    handle.park().await?;
    println!("Parking");
    let status = handle.wait_until_stopped(timeout).await?;
    print_status(&status);
    Ok(())
}

async fn run(handle: &MountHandle) -> Result<()> {
    print_status(&handle.status().await?);
    println!("Mount service running - press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    Ok(())
}

fn print_status(status: &StatusReport) {
    println!("State:      {}", status.state.name());
    match status.position {
        Some(position) => println!("Position:   {}", position),
        None => println!("Position:   unknown"),
    }
    if let Some(horizontal) = status.horizontal {
        println!("Horizontal: {}", horizontal);
    }
    if let Some(ha) = status.hour_angle {
        println!("Hour angle: {:+.4}h", ha);
    }
    println!("Pier side:  {}", status.pier_side);
    println!("Tracking:   {}", status.tracking);
    if let Some(firmware) = &status.firmware {
        println!("Firmware:   {}", firmware);
    }
    if status.degraded {
        println!("Telemetry:  degraded (showing last known position)");
    }
}

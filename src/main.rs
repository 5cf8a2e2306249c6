//! CLI Entry Point for tc200
//!
//! Provides command-line access to a TC200 for:
//! - Measuring how long the controller takes to reach and hold a set-point
//! - Printing the controller state
//! - Changing the set-point and output enable
//!
//! # Usage
//!
//! ```bash
//! tc200 --config config/tc200.toml stability --setpoint 37
//! tc200 --port /dev/ttyUSB0 --log-format json status
//! tc200 --port /dev/ttyUSB0 set --setpoint 25 --enable
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::providers::Serialized;
use std::path::PathBuf;
use std::time::Duration;
use tc200::config::{Tc200Config, DEFAULT_CONFIG_PATH};
use tc200::stability::StabilityMonitor;
use tc200::{tracing_setup, Tc200Driver};
use tokio::time::Instant;

#[derive(Parser)]
#[command(name = "tc200")]
#[command(about = "Thorlabs TC200 temperature controller utility", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overrides the configuration file
    #[arg(long)]
    port: Option<String>,

    /// Log output format (pretty, compact, json), overrides the configuration file
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enable the heater and wait until the set-point has been held
    Stability {
        /// Target temperature (C)
        #[arg(long)]
        setpoint: f64,

        /// Allowed deviation (C), overrides the configuration file
        #[arg(long)]
        tolerance: Option<f64>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print the controller state
    Status,

    /// Change the set-point and/or output enable
    Set {
        /// New set-point (C)
        #[arg(long)]
        setpoint: Option<f64>,

        /// Enable the output
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable the output
        #[arg(long)]
        disable: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut figment = Tc200Config::figment(&cli.config);
    if let Some(port) = &cli.port {
        figment = figment.merge(Serialized::default("port", port));
    }
    if let Some(format) = &cli.log_format {
        figment = figment.merge(Serialized::default("log_format", format));
    }
    let config: Tc200Config = figment
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate()?;

    tracing_setup::init_from_config(&config)?;

    let driver = Tc200Driver::connect(&config)
        .await
        .with_context(|| format!("Failed to initialize TC200 on {}", config.port))?;

    let outcome = match cli.command {
        Commands::Stability {
            setpoint,
            tolerance,
            timeout,
        } => {
            let mut settings = config.stability;
            if let Some(tolerance) = tolerance {
                settings.tolerance_c = tolerance;
            }
            run_stability(&driver, setpoint, settings, timeout.map(Duration::from_secs)).await
        }
        Commands::Status => print_status(&driver).await,
        Commands::Set {
            setpoint,
            enable,
            disable,
        } => apply_settings(&driver, setpoint, enable, disable).await,
    };

    // The port is released on every path.
    let closed = driver.close().await;
    outcome?;
    closed.context("Failed to close serial port")
}

async fn run_stability(
    driver: &Tc200Driver,
    setpoint: f64,
    settings: tc200::StabilitySettings,
    timeout: Option<Duration>,
) -> Result<()> {
    let monitor = StabilityMonitor::new(settings)?;

    println!("# Testing time required to reach thermal stability:");
    driver.set_setpoint(setpoint).await?;
    let t0 = Instant::now();
    driver.set_enable(true).await?;

    let wait = monitor.wait_until_stable(driver);
    let result = tokio::select! {
        result = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, wait).await {
                    Ok(report) => report.map_err(anyhow::Error::from),
                    Err(_) => Err(anyhow::anyhow!("set-point not held within {limit:?}")),
                },
                None => wait.await.map_err(anyhow::Error::from),
            }
        } => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };

    // Leave the heater off whatever happened above; a sensor alarm can make this fail too.
    if let Err(e) = driver.set_enable(false).await {
        tracing::error!(error = %e, "failed to disable output");
    }

    let report = result?;
    println!(
        "# Total time to reach thermal stability = {:.2}s ({} polls, {:.1} C held for {:?})",
        t0.elapsed().as_secs_f64(),
        report.polls,
        report.setpoint_c,
        report.in_window,
    );
    Ok(())
}

async fn print_status(driver: &Tc200Driver) -> Result<()> {
    let tactual = driver.actual_temp().await?;
    let enabled = driver.enable_status().await?;
    let state = driver.state();

    println!("sensor     : {}", state.sensor);
    println!("tmax       : {:.1} C", state.tmax_c);
    println!("tset       : {:.1} C", state.tset_c);
    println!("tactual    : {:.1} C", tactual);
    println!("enabled    : {}", enabled);
    Ok(())
}

async fn apply_settings(
    driver: &Tc200Driver,
    setpoint: Option<f64>,
    enable: bool,
    disable: bool,
) -> Result<()> {
    if let Some(setpoint) = setpoint {
        driver.set_setpoint(setpoint).await?;
        println!("tset = {:.1} C", driver.state().tset_c);
    }
    if enable || disable {
        driver.set_enable(enable).await?;
        println!("enabled = {}", enable);
    }
    Ok(())
}

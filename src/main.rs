use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sidmon::acquisition::clock::SystemClock;
use sidmon::audio::open_device;
use sidmon::cli::{Cli, Commands};
use sidmon::config::Config;
use sidmon::orchestrator::{LogViewer, NullSink, Orchestrator, ShutdownHandle};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .init();

    match cli.command {
        Some(Commands::Devices) => list_audio_devices(),
        None => run_monitor(&cli),
    }
}

fn run_monitor(cli: &Cli) -> Result<()> {
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.device.is_some() {
        config.audio.device = cli.device.clone();
    }

    let mut device = open_device(&config.audio)?;
    let handle = ShutdownHandle::new();
    let signal_handle = handle.clone();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, finishing current interval");
        signal_handle.request_close();
    })
    .context("installing interrupt handler")?;

    let start = Utc::now();
    let mut orchestrator = Orchestrator::new(&config, &start, LogViewer, NullSink)?;
    orchestrator.run(device.as_mut(), SystemClock, &handle)?;
    Ok(())
}

#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = sidmon::audio::capture::list_devices()?;
    if devices.is_empty() {
        println!("No audio capture devices found");
    } else {
        println!("Available audio capture devices:");
        for name in devices {
            println!("  {name}");
        }
    }
    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    println!("Built without cpal support; only the sine backend is available");
    Ok(())
}

//! Headless capture tool for the scope.
//!
//! ```bash
//! scope_daq capture --output miniscope_capture.bin
//! scope_daq --config config/scope.toml config
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scope_daq::adapters::UdpAdapterFactory;
use scope_daq::config::{ScopeConfig, DEFAULT_CONFIG_PATH};
use scope_daq::{logging, DaqError, ScopeEvent, SessionRegistry, StartOutcome};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "scope_daq", about = "Trigger, capture and stream ADC bursts from the scope")]
struct Cli {
    /// Configuration file (missing file means defaults).
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one capture and stream it to a local viewer.
    Capture {
        /// Write the raw capture to this file.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Override the configured device address.
        #[arg(long)]
        device: Option<SocketAddr>,

        /// Print the capture summary as JSON.
        #[arg(long)]
        summary_json: bool,
    },
    /// Print the effective configuration.
    Config,
}

/// What the local viewer saw.
#[derive(Debug, Default)]
struct ViewerTally {
    events: usize,
    samples: usize,
    lagged: u64,
    min: Option<f64>,
    max: Option<f64>,
}

impl ViewerTally {
    fn observe(&mut self, value: f64) {
        self.samples += 1;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }
}

async fn watch_events(mut events: broadcast::Receiver<ScopeEvent>) -> ViewerTally {
    let mut tally = ViewerTally::default();
    loop {
        match events.recv().await {
            Ok(ScopeEvent::Batch(values)) => {
                tally.events += 1;
                values.into_iter().for_each(|v| tally.observe(v));
                if tally.events % 5000 == 0 {
                    info!("Viewer: {} batches, {} samples", tally.events, tally.samples);
                }
            }
            Ok(ScopeEvent::Sample(value)) => {
                tally.events += 1;
                tally.observe(value);
            }
            Ok(ScopeEvent::CaptureComplete(_)) | Ok(ScopeEvent::CaptureFailed { .. }) => break,
            Err(RecvError::Lagged(missed)) => {
                warn!("Viewer lagged behind; {} events skipped", missed);
                tally.lagged += missed;
            }
            Err(RecvError::Closed) => break,
        }
    }
    tally
}

async fn run_capture(
    mut config: ScopeConfig,
    output: Option<PathBuf>,
    device: Option<SocketAddr>,
    summary_json: bool,
) -> Result<()> {
    if let Some(device) = device {
        config.device_address = device.ip();
        config.device_port = device.port();
    }
    let config = Arc::new(config);
    let factory = Arc::new(UdpAdapterFactory::for_device(config.device_socket_addr()));
    let registry = SessionRegistry::spawn(Arc::clone(&config), factory);

    let viewer = tokio::spawn(watch_events(registry.subscribe()));

    let handle = match registry.request_capture().await? {
        StartOutcome::Admitted(handle) => handle,
        StartOutcome::AlreadyRunning { session } => {
            bail!("capture {session} is already running")
        }
    };
    let summary = handle.wait().await?;
    let tally = viewer.await.context("viewer task failed")?;

    info!(
        "Viewer received {} events ({} samples, {} skipped), range {:.3}..{:.3} V",
        tally.events,
        tally.samples,
        tally.lagged,
        tally.min.unwrap_or_default(),
        tally.max.unwrap_or_default()
    );

    if let Some(path) = output {
        match registry.last_capture().await {
            Ok(capture) => {
                tokio::fs::write(&path, capture.bytes())
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                info!("Data saved to {}", path.display());
            }
            Err(DaqError::NoCaptureAvailable) => {
                warn!("No data received; {} not written", path.display());
            }
            Err(e) => return Err(e.into()),
        }
    }

    if summary_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{:?}: {} bytes, {} samples in {} datagrams ({} ms)",
            summary.outcome,
            summary.bytes,
            summary.samples,
            summary.datagrams,
            summary.duration().num_milliseconds()
        );
    }

    registry.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ScopeConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init(&config.log_level, cli.json_logs)?;

    match cli.command {
        Command::Capture {
            output,
            device,
            summary_json,
        } => run_capture(config, output, device, summary_json).await,
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

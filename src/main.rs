//! CLI entry point for lidar-link
//!
//! Provides command-line access to a device:
//! - `probe`: one liveness check against the health path
//! - `watch`: run the client and print acquisition counters once a second
//! - `snapshot`: wait for one measurement and write it as a PNG
//!
//! # Usage
//!
//! ```bash
//! lidar-link --host 192.168.1.20 probe
//! lidar-link --config config/lidar_link.toml --mode stream watch --seconds 30
//! lidar-link --host 192.168.1.20 snapshot --output frame.png --width 720 --height 960
//! lidar-link --log-format json --mode stream watch --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use figment::providers::Serialized;
use lidar_link::config::{AcquisitionMode, Settings};
use lidar_link::logging::{self, OutputFormat, TracingConfig};
use lidar_link::raster::RasterStyle;
use lidar_link::transport::{HttpTransport, Transport};
use lidar_link::LidarClient;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "lidar-link")]
#[command(about = "Point-cloud client for phone LiDAR endpoints", long_about = None)]
struct Cli {
    /// Configuration file (TOML); missing files are ignored
    #[arg(long, default_value = "config/lidar_link.toml")]
    config: PathBuf,

    /// Device host, overrides the configuration
    #[arg(long)]
    host: Option<String>,

    /// Device port, overrides the configuration
    #[arg(long)]
    port: Option<u16>,

    /// Acquisition mode, overrides the configuration
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Log output format, overrides the configuration
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Poll,
    Stream,
}

impl From<ModeArg> for AcquisitionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Poll => AcquisitionMode::Poll,
            ModeArg::Stream => AcquisitionMode::Stream,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for OutputFormat {
    fn from(format: LogFormatArg) -> Self {
        match format {
            LogFormatArg::Pretty => OutputFormat::Pretty,
            LogFormatArg::Compact => OutputFormat::Compact,
            LogFormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the device answers its health path
    Probe,

    /// Run acquisition and print counters every second
    Watch {
        /// How long to run; runs until Ctrl+C when omitted
        #[arg(long)]
        seconds: Option<u64>,

        /// Print counters as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Capture one measurement and write it as a PNG
    Snapshot {
        /// Output file
        #[arg(long, short, default_value = "snapshot.png")]
        output: PathBuf,

        /// Image width; configuration value when omitted
        #[arg(long)]
        width: Option<u32>,

        /// Image height; configuration value when omitted
        #[arg(long)]
        height: Option<u32>,

        /// Seconds to wait for the first measurement
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let mut tracing_config = TracingConfig::from_settings(&settings)
        .map_err(anyhow::Error::msg)?
        .with_ansi(std::io::stdout().is_terminal());
    if let Some(format) = cli.log_format {
        tracing_config = tracing_config.with_format(format.into());
    }
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Probe => probe(&settings).await,
        Commands::Watch { seconds, json } => watch(&settings, seconds, json).await,
        Commands::Snapshot {
            output,
            width,
            height,
            timeout,
        } => snapshot(&settings, output, width, height, timeout).await,
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut figment = Settings::figment(&cli.config);
    if let Some(host) = &cli.host {
        figment = figment.merge(Serialized::default("device.host", host));
    }
    if let Some(port) = cli.port {
        figment = figment.merge(Serialized::default("device.port", port));
    }
    if let Some(mode) = cli.mode {
        figment = figment.merge(Serialized::default("device.mode", AcquisitionMode::from(mode)));
    }

    let settings: Settings = figment
        .extract()
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    settings.validate()?;
    Ok(settings)
}

async fn probe(settings: &Settings) -> Result<()> {
    let mut transport = HttpTransport::new(settings.device.clone())?;
    match transport.probe().await {
        Ok(()) => {
            println!("{}: reachable", settings.device.health_url());
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("probing {}", settings.device.endpoint())),
    }
}

async fn watch(settings: &Settings, seconds: Option<u64>, json: bool) -> Result<()> {
    let client = LidarClient::connect_with_raster(settings.device.clone(), settings.raster.clone()).await?;
    tracing::info!(endpoint = %settings.device.endpoint(), "watching");

    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;

    loop {
        let stop = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stop => break,
            _ = ticker.tick() => {
                let stats = client.stats();
                if json {
                    println!("{}", serde_json::to_string(&stats)?);
                } else {
                    let points = client.latest_point_cloud().map(|p| p.len()).unwrap_or(0);
                    println!(
                        "published={} points={} decode_failures={} fetch_failures={} timeouts={} reconnects={}",
                        stats.published,
                        points,
                        stats.decode_failures,
                        stats.fetch_failures,
                        stats.timeouts,
                        stats.reconnects
                    );
                }
            }
        }
    }

    client.close().await?;
    Ok(())
}

async fn snapshot(
    settings: &Settings,
    output: PathBuf,
    width: Option<u32>,
    height: Option<u32>,
    timeout: u64,
) -> Result<()> {
    let client = LidarClient::connect_with_raster(settings.device.clone(), settings.raster.clone()).await?;

    let captured = client
        .wait_for_measurement(Duration::from_secs(timeout))
        .await
        .with_context(|| format!("no measurement within {}s", timeout));
    let measurement = match captured {
        Ok(m) => m,
        Err(err) => {
            client.close().await.ok();
            return Err(err);
        }
    };

    let width = width.unwrap_or(settings.raster.width);
    let height = height.unwrap_or(settings.raster.height);
    let style = RasterStyle::from(&settings.raster);
    let image = lidar_link::raster::rasterize(&measurement.points, width, height, &style);

    client.close().await?;

    image
        .save(&output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "{} points captured at {} -> {}",
        measurement.points.len(),
        measurement.captured_at.to_rfc3339(),
        output.display()
    );
    Ok(())
}

//! Entry point for the `herdwatch` command line tool.
//!
//! Subcommands:
//! - `serial` – bridge the vitals firmware (temperature, humidity, heart
//!   rate, RFID) to the backend
//! - `radar` – bridge the radar sweep firmware and raise geofence alerts
//! - `watch` – follow a backend feed with the adaptive poller and log new data
//! - `backfill` – bulk-upload recorded snapshots from a JSON-lines file
//!
//! Every subcommand loads `.env`, initializes tracing, and reads its settings
//! through `config::load_from_env`. A serial transport failure ends the
//! process with a non-zero exit code; restarting it is left to the service
//! supervisor.
use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use herdwatch_telemetry::backfill::{self, DEFAULT_CHUNK};
use herdwatch_telemetry::bridge::serial::{list_candidates, log_available_ports};
use herdwatch_telemetry::bridge::{
    discover_port, spawn_upload_worker, BridgeRuntime, FrameProcessor, GeofenceBridge, HardwareBridge, LineEvent,
    SerialLink, UPLOAD_QUEUE_DEPTH,
};
use herdwatch_telemetry::config::{self, Config};
use herdwatch_telemetry::logging::init_tracing;
use herdwatch_telemetry::models::{RadarPoint, SensorSnapshot};
use herdwatch_telemetry::poller::{AdaptivePoller, FeedSource, HttpRadarFeed, HttpSensorFeed, PollerOptions};
use herdwatch_telemetry::Uploader;

/// Lines buffered between the serial reader thread and the bridge task.
const LINE_CHANNEL_DEPTH: usize = 256;

/// How long shutdown waits for queued uploads to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ---

#[derive(Parser, Debug)]
#[command(name = "herdwatch", version, about = "Livestock telemetry bridges and feed poller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bridge the vitals firmware to the backend
    Serial {
        /// Serial port (overrides SERIAL_PORT; auto-detected when unset)
        #[arg(long)]
        port: Option<String>,

        /// List serial ports and exit
        #[arg(long)]
        list_ports: bool,
    },

    /// Bridge the radar firmware and raise geofence alerts
    Radar {
        /// Serial port (overrides SERIAL_PORT; auto-detected when unset)
        #[arg(long)]
        port: Option<String>,

        /// List serial ports and exit
        #[arg(long)]
        list_ports: bool,
    },

    /// Follow a backend feed and log new data as it arrives
    Watch {
        #[arg(long, value_enum, default_value_t = Feed::Iot)]
        feed: Feed,

        /// Only readings tagged with this RFID (overrides POLL_RFID)
        #[arg(long)]
        rfid: Option<String>,
    },

    /// Upload recorded snapshots through the bulk endpoint
    Backfill {
        /// JSON-lines file, one snapshot per line
        #[arg(value_name = "PATH")]
        file: PathBuf,

        /// Readings per request
        #[arg(long, default_value_t = DEFAULT_CHUNK)]
        chunk: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Feed {
    Iot,
    Radar,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_from_env()?;
    cfg.log_config();

    match cli.command {
        Command::Serial { list_ports: true, .. } | Command::Radar { list_ports: true, .. } => {
            log_available_ports(&list_candidates()?);
            Ok(())
        }
        Command::Serial { port, .. } => {
            let bridge = HardwareBridge::new(&cfg.sensor, Instant::now());
            run_bridge(&cfg, port, "\n", bridge).await
        }
        Command::Radar { port, .. } => {
            let bridge = GeofenceBridge::new(&cfg.radar);
            run_bridge(&cfg, port, &cfg.radar.delimiter, bridge).await
        }
        Command::Watch { feed: Feed::Iot, rfid } => {
            let source = HttpSensorFeed::new(&cfg.api_url, cfg.http_timeout, cfg.poller.limit)?;
            let poller = AdaptivePoller::with_callback(source, PollerOptions::sensors(&cfg.poller), log_readings);
            poller.set_filter(rfid.or_else(|| cfg.poller.rfid.clone()));
            follow(poller).await
        }
        Command::Watch { feed: Feed::Radar, .. } => {
            let source = HttpRadarFeed::new(&cfg.api_url, cfg.http_timeout, &cfg.radar.device_id)?;
            let threshold = cfg.radar.threshold_cm;
            let poller = AdaptivePoller::with_callback(
                source,
                PollerOptions::radar(&cfg.poller),
                move |points: &[RadarPoint]| log_sweep(points, threshold),
            );
            follow(poller).await
        }
        Command::Backfill { file, chunk } => {
            let uploader = Uploader::new(&cfg.api_url, cfg.http_timeout)?;
            let report = backfill::run(&uploader, &file, chunk).await?;
            if report.failed_chunks > 0 {
                anyhow::bail!("{} chunk(s) failed to upload", report.failed_chunks);
            }
            Ok(())
        }
    }
}

/// Open the serial port, run `processor` until Ctrl-C or a transport error,
/// then drain pending uploads.
async fn run_bridge<P: FrameProcessor>(cfg: &Config, port: Option<String>, delimiter: &str, processor: P) -> Result<()> {
    // ---
    let uploader = Arc::new(Uploader::new(&cfg.api_url, cfg.http_timeout)?);
    let (uploads, worker) = spawn_upload_worker(uploader, UPLOAD_QUEUE_DEPTH);
    let mut runtime = BridgeRuntime::new(processor, uploads);
    runtime.mark_connecting();

    let opened = port
        .or_else(|| cfg.serial.port.clone())
        .map_or_else(discover_port, Ok)
        .and_then(|port| {
            let (tx, rx) = mpsc::channel::<LineEvent>(LINE_CHANNEL_DEPTH);
            SerialLink::open(&port, cfg.serial.baud_rate, delimiter, tx).map(|link| (link, rx))
        });

    let (link, lines) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            runtime.mark_failed();
            error!("Failed to open serial port: {}", e);
            return Err(e.into());
        }
    };

    let result = runtime.run(link.name(), lines, shutdown_signal()).await;
    link.close().await;

    drop(runtime);
    if tokio::time::timeout(DRAIN_TIMEOUT, worker).await.is_err() {
        warn!("Pending uploads not finished after {:?}, abandoning them", DRAIN_TIMEOUT);
    }

    result.map_err(Into::into)
}

/// Poll until Ctrl-C, then report where the feed ended up.
async fn follow<S: FeedSource>(poller: AdaptivePoller<S>) -> Result<()> {
    // ---
    poller.start();
    shutdown_signal().await;
    poller.stop();

    let state = poller.snapshot();
    info!(
        "Stopped: {} buffered item(s), connectivity {:?}, last update {}",
        state.buffer.len(),
        state.connectivity,
        state
            .last_updated
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    debug!("Side data at stop: {:?}", poller.extras());
    Ok(())
}

fn log_readings(readings: &[SensorSnapshot]) {
    for r in readings {
        info!(
            "{} {} temp={:?} humidity={:?} bpm={:?} rfid={}",
            r.timestamp.format("%H:%M:%S"),
            r.device_id,
            r.channels.temperature,
            r.channels.humidity,
            r.channels.heart_rate,
            r.rfid_tag.as_deref().unwrap_or("-")
        );
    }
}

fn log_sweep(points: &[RadarPoint], threshold_cm: f64) {
    // ---
    let inside = points
        .iter()
        .filter(|p| herdwatch_telemetry::bridge::is_breach(p.distance, threshold_cm))
        .count();
    let nearest = points
        .iter()
        .filter(|p| p.distance > 0.0)
        .min_by(|a, b| a.distance.total_cmp(&b.distance));

    match nearest {
        Some(p) => info!(
            "Sweep: {} point(s), {} inside {}cm, nearest {:.1}cm at {}°",
            points.len(),
            inside,
            threshold_cm,
            p.distance,
            p.angle
        ),
        None => info!("Sweep: {} point(s), no echo", points.len()),
    }
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

//! Configuration loader for the `herdwatch` bridges and poller.
//!
//! All runtime knobs live here with their defaults and are read from
//! environment variables (with optional `.env` support provided by the
//! caller), so no other module touches `env::var` directly.
use std::{env, time::Duration};

use anyhow::{anyhow, Result};

use crate::models::Location;

/// Parse an optional unsigned integer environment variable with a default value.
macro_rules! parse_env_u64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<u64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional floating point environment variable with a default value.
macro_rules! parse_env_f64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<f64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional millisecond interval that drives a timer; zero is rejected.
macro_rules! parse_env_interval {
    ($var_name:expr, $default:expr) => {{
        let ms = parse_env_u64!($var_name, $default);
        if ms == 0 {
            return Err(anyhow!("{} must be greater than zero", $var_name));
        }
        Duration::from_millis(ms)
    }};
}

/// Read an optional string environment variable, treating blank as unset.
macro_rules! optional_env {
    ($var_name:expr) => {
        env::var($var_name).ok().filter(|v| !v.trim().is_empty())
    };
}

/// Strongly typed application configuration.
///
/// Loaded once at startup; every subcommand reads the slice it needs.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Backend base URL, endpoints are appended to it.
    pub api_url: String,

    /// Per-request HTTP timeout for uploads and polls.
    pub http_timeout: Duration,

    pub serial: SerialConfig,
    pub sensor: SensorBridgeConfig,
    pub radar: RadarBridgeConfig,
    pub poller: PollerConfig,
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Explicit port; `None` means auto-detect.
    pub port: Option<String>,
    pub baud_rate: u32,
}

#[derive(Debug, Clone)]
pub struct SensorBridgeConfig {
    pub device_id: String,
    pub reader_id: String,
    pub post_interval: Duration,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RadarBridgeConfig {
    pub device_id: String,
    /// Boundary distance in centimeters.
    pub threshold_cm: f64,
    pub alert_cooldown: Duration,
    pub heartbeat_interval: Duration,
    pub location: Location,
    /// Frame terminator emitted by the radar firmware.
    pub delimiter: String,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub radar_poll_interval: Duration,
    pub status_interval: Duration,
    pub limit: u32,
    pub rfid: Option<String>,
    pub buffer_capacity: usize,
}

/// Load configuration from environment variables with defaults.
///
/// Optional (all of them):
/// - `API_URL` – backend base URL (default: `http://127.0.0.1:5000/api`)
/// - `SERIAL_PORT`, `BAUD_RATE` – serial channel (default: auto-detect, 115200)
/// - `DEVICE_ID`, `READER_ID`, `RADAR_DEVICE_ID` – identities
/// - `POST_INTERVAL_MS`, `HEARTBEAT_INTERVAL_MS` – bridge cadences (2000, 10000)
/// - `GEOFENCE_THRESHOLD_CM`, `ALERT_COOLDOWN_MS` – geofence policy (30, 5000)
/// - `RADAR_LAT`, `RADAR_LNG`, `RADAR_DELIMITER` – radar installation
/// - `POLL_INTERVAL_MS`, `RADAR_POLL_INTERVAL_MS`, `STATUS_INTERVAL_MS`,
///   `POLL_LIMIT`, `POLL_RFID`, `BUFFER_CAPACITY` – poller tuning
/// - `HTTP_TIMEOUT_MS` – request timeout (5000)
///
/// Returns an error if any variable is present but invalid. Timer intervals
/// (`HEARTBEAT_INTERVAL_MS`, the three poll cadences) and `HTTP_TIMEOUT_MS`
/// must be non-zero.
pub fn load_from_env() -> Result<Config> {
    // ---
    let api_url = optional_env!("API_URL")
        .unwrap_or_else(|| "http://127.0.0.1:5000/api".to_string())
        .trim_end_matches('/')
        .to_string();

    let baud_rate = u32::try_from(parse_env_u64!("BAUD_RATE", 115_200))
        .map_err(|e| anyhow!("Invalid BAUD_RATE: {}", e))?;

    let threshold_cm = parse_env_f64!("GEOFENCE_THRESHOLD_CM", 30.0);
    if !(threshold_cm > 0.0) {
        return Err(anyhow!("GEOFENCE_THRESHOLD_CM must be positive, got {}", threshold_cm));
    }

    let buffer_capacity = parse_env_u64!("BUFFER_CAPACITY", 500) as usize;
    if buffer_capacity == 0 {
        return Err(anyhow!("BUFFER_CAPACITY must be at least 1"));
    }

    let heartbeat_interval = parse_env_interval!("HEARTBEAT_INTERVAL_MS", 10_000);

    Ok(Config {
        api_url,
        http_timeout: parse_env_interval!("HTTP_TIMEOUT_MS", 5_000),
        serial: SerialConfig {
            port: optional_env!("SERIAL_PORT"),
            baud_rate,
        },
        sensor: SensorBridgeConfig {
            device_id: optional_env!("DEVICE_ID").unwrap_or_else(|| "esp32_serial".to_string()),
            reader_id: optional_env!("READER_ID").unwrap_or_else(|| "serial_bridge".to_string()),
            post_interval: Duration::from_millis(parse_env_u64!("POST_INTERVAL_MS", 2_000)),
            heartbeat_interval,
        },
        radar: RadarBridgeConfig {
            device_id: optional_env!("RADAR_DEVICE_ID").unwrap_or_else(|| "radar_01".to_string()),
            threshold_cm,
            alert_cooldown: Duration::from_millis(parse_env_u64!("ALERT_COOLDOWN_MS", 5_000)),
            heartbeat_interval,
            location: Location {
                lat: parse_env_f64!("RADAR_LAT", 28.7041),
                lng: parse_env_f64!("RADAR_LNG", 77.1025),
                accuracy: 100.0,
            },
            delimiter: env::var("RADAR_DELIMITER")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| ".".to_string()),
        },
        poller: PollerConfig {
            poll_interval: parse_env_interval!("POLL_INTERVAL_MS", 5_000),
            radar_poll_interval: parse_env_interval!("RADAR_POLL_INTERVAL_MS", 2_000),
            status_interval: parse_env_interval!("STATUS_INTERVAL_MS", 10_000),
            limit: u32::try_from(parse_env_u64!("POLL_LIMIT", 50))
                .map_err(|e| anyhow!("Invalid POLL_LIMIT: {}", e))?,
            rfid: optional_env!("POLL_RFID"),
            buffer_capacity,
        },
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  API_URL               : {}", self.api_url);
        tracing::info!(
            "  SERIAL_PORT           : {}",
            self.serial.port.as_deref().unwrap_or("(auto-detect)")
        );
        tracing::info!("  BAUD_RATE             : {}", self.serial.baud_rate);
        tracing::info!("  DEVICE_ID             : {}", self.sensor.device_id);
        tracing::info!("  POST_INTERVAL_MS      : {}", self.sensor.post_interval.as_millis());
        tracing::info!("  HEARTBEAT_INTERVAL_MS : {}", self.sensor.heartbeat_interval.as_millis());
        tracing::info!("  RADAR_DEVICE_ID       : {}", self.radar.device_id);
        tracing::info!("  GEOFENCE_THRESHOLD_CM : {}", self.radar.threshold_cm);
        tracing::info!("  ALERT_COOLDOWN_MS     : {}", self.radar.alert_cooldown.as_millis());
        tracing::info!("  POLL_INTERVAL_MS      : {}", self.poller.poll_interval.as_millis());
        tracing::info!("  STATUS_INTERVAL_MS    : {}", self.poller.status_interval.as_millis());
        tracing::info!("  BUFFER_CAPACITY       : {}", self.poller.buffer_capacity);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    // Environment is process-global; keep every env-mutating assertion in one test.
    #[test]
    fn test_defaults_and_overrides() {
        // ---
        for var in [
            "API_URL",
            "POST_INTERVAL_MS",
            "GEOFENCE_THRESHOLD_CM",
            "SERIAL_PORT",
            "BUFFER_CAPACITY",
            "BAUD_RATE",
            "HEARTBEAT_INTERVAL_MS",
            "STATUS_INTERVAL_MS",
        ] {
            env::remove_var(var);
        }

        let cfg = load_from_env().unwrap();
        assert_eq!(cfg.api_url, "http://127.0.0.1:5000/api");
        assert_eq!(cfg.sensor.post_interval, Duration::from_secs(2));
        assert_eq!(cfg.sensor.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(cfg.radar.threshold_cm, 30.0);
        assert_eq!(cfg.radar.alert_cooldown, Duration::from_secs(5));
        assert_eq!(cfg.poller.buffer_capacity, 500);
        assert!(cfg.serial.port.is_none());

        env::set_var("API_URL", "http://backend:8000/api/");
        env::set_var("POST_INTERVAL_MS", "750");
        env::set_var("SERIAL_PORT", "/dev/ttyUSB0");
        let cfg = load_from_env().unwrap();
        assert_eq!(cfg.api_url, "http://backend:8000/api");
        assert_eq!(cfg.sensor.post_interval, Duration::from_millis(750));
        assert_eq!(cfg.serial.port.as_deref(), Some("/dev/ttyUSB0"));

        env::set_var("GEOFENCE_THRESHOLD_CM", "-3");
        assert!(load_from_env().is_err());
        env::remove_var("GEOFENCE_THRESHOLD_CM");

        // Zero would panic the interval timers; a zero post interval is fine.
        env::set_var("HEARTBEAT_INTERVAL_MS", "0");
        let err = load_from_env().unwrap_err();
        assert!(err.to_string().contains("HEARTBEAT_INTERVAL_MS"));
        env::remove_var("HEARTBEAT_INTERVAL_MS");

        env::set_var("STATUS_INTERVAL_MS", "0");
        assert!(load_from_env().is_err());
        env::remove_var("STATUS_INTERVAL_MS");

        env::set_var("POST_INTERVAL_MS", "0");
        assert_eq!(load_from_env().unwrap().sensor.post_interval, Duration::ZERO);

        env::set_var("BAUD_RATE", "fast");
        assert!(load_from_env().is_err());

        for var in ["API_URL", "POST_INTERVAL_MS", "SERIAL_PORT", "BAUD_RATE"] {
            env::remove_var(var);
        }
    }
}

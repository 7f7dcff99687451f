//! Error taxonomy for the telemetry pipeline.
//!
//! Only [`TransportError`] is fatal; every other kind is logged or surfaced
//! through poller state and the pipeline keeps running.

use thiserror::Error;

/// Serial channel failures. Fatal to the owning bridge process.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no serial port found; specify one with --port or SERIAL_PORT")]
    NoPortFound,

    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),

    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial read failed on {port}: {source}")]
    Read {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serial port {0} closed by the device")]
    Closed(String),
}

/// A line that looked like a data frame but could not be decoded.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("malformed sensor frame: {0}")]
    MalformedSensor(String),

    #[error("malformed radar frame: {0:?}")]
    MalformedRadar(String),

    #[error("radar angle {0} outside 0..=180")]
    AngleOutOfRange(u32),
}

/// A single upload attempt failed. Never retried.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("POST {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("POST {endpoint} failed: {status} - {body}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Poller fetch or connectivity check failure.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("invalid response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

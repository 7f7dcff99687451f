//! Telemetry pipeline between livestock sensor firmware and the herd backend.
//!
//! - `bridge`: serial bridges (vitals and radar geofence) feeding the backend
//! - `poller`: connectivity-gated polling of the backend's read endpoints
//! - `uploader`: single-attempt JSON uploads
//!
//! Everything public is re-exported from here; modules reach their siblings
//! through `crate::` only.

pub mod backfill;
pub mod bridge;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod models;
pub mod poller;
pub mod snapshot;
pub mod uploader;

pub use bridge::{BridgeRuntime, BridgeState, FrameProcessor, GeofenceBridge, HardwareBridge};
pub use config::Config;
pub use error::{ParseError, PollError, TransportError, UploadError};
pub use frame::{parse_radar_line, parse_sensor_line, LineFramer, RadarFrame, SensorFrame};
pub use models::{Channel, Channels, GeofenceAlert, RadarPoint, SensorSnapshot, Severity};
pub use poller::{AdaptivePoller, HttpRadarFeed, HttpSensorFeed, PollState, PollerOptions};
pub use snapshot::SnapshotBuffer;
pub use uploader::{Backend, Outbound, Uploader};

//! Vitals bridge: merges partial sensor frames and uploads a downsampled
//! snapshot at most once per post interval.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::FrameProcessor;
use crate::config::SensorBridgeConfig;
use crate::frame::{parse_sensor_line, SensorFrame};
use crate::models::{Heartbeat, RfidEvent};
use crate::snapshot::SnapshotBuffer;
use crate::uploader::Outbound;

/// Per-device state for the vitals firmware.
#[derive(Debug)]
pub struct HardwareBridge {
    device_id: String,
    reader_id: String,
    post_interval: Duration,
    heartbeat_interval: Duration,
    buffer: SnapshotBuffer,
    last_upload: Instant,
}

impl HardwareBridge {
    /// `started` seeds the upload clock, so the first upload happens one
    /// full interval after the bridge opens.
    pub fn new(cfg: &SensorBridgeConfig, started: Instant) -> Self {
        Self {
            device_id: cfg.device_id.clone(),
            reader_id: cfg.reader_id.clone(),
            post_interval: cfg.post_interval,
            heartbeat_interval: cfg.heartbeat_interval,
            buffer: SnapshotBuffer::new(),
            last_upload: started,
        }
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    /// Apply one decoded frame and return whatever must be posted.
    pub fn handle_frame(&mut self, frame: SensorFrame, now: Instant) -> Vec<Outbound> {
        // ---
        let mut out = Vec::new();

        match frame {
            SensorFrame::Reading(partial) => {
                self.buffer.merge(&partial);
                trace!("Merged {:?}", partial);
            }
            SensorFrame::Rfid(tag) => {
                info!("RFID detected: {}", tag);
                self.buffer.set_rfid(tag.clone());
                out.push(Outbound::Rfid(RfidEvent {
                    rfid_tag: tag,
                    reader_id: self.reader_id.clone(),
                }));
            }
            SensorFrame::UserSwitch => {
                info!("User switch detected, resetting buffer");
                self.buffer.reset();
            }
        }

        if let Some(upload) = self.take_due_upload(now) {
            out.push(upload);
        }
        out
    }

    fn take_due_upload(&mut self, now: Instant) -> Option<Outbound> {
        // ---
        if now.duration_since(self.last_upload) < self.post_interval {
            return None;
        }
        if !self.buffer.is_ready() {
            debug!("No sensor data in buffer, skipping upload");
            return None;
        }

        self.last_upload = now;
        let snapshot = self.buffer.snapshot_for_upload(&self.device_id, Utc::now());
        debug!("Uploading snapshot {:?}", snapshot.channels);
        Some(Outbound::Snapshot(snapshot))
    }
}

impl FrameProcessor for HardwareBridge {
    fn name(&self) -> &'static str {
        "vitals"
    }

    fn on_line(&mut self, line: &str, now: Instant) -> Vec<Outbound> {
        // ---
        match parse_sensor_line(line) {
            Ok(Some(frame)) => self.handle_frame(frame, now),
            Ok(None) => {
                trace!("[Serial] {}", line);
                Vec::new()
            }
            Err(e) => {
                warn!("Skipping line: {}", e);
                Vec::new()
            }
        }
    }

    fn heartbeat(&self) -> Outbound {
        Outbound::SensorHeartbeat(Heartbeat {
            device_id: self.device_id.clone(),
        })
    }

    fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::Channels;

    fn config() -> SensorBridgeConfig {
        SensorBridgeConfig {
            device_id: "esp32_serial".into(),
            reader_id: "serial_bridge".into(),
            post_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(10),
        }
    }

    fn snapshots(out: &[Outbound]) -> Vec<Channels> {
        out.iter()
            .filter_map(|o| match o {
                Outbound::Snapshot(s) => Some(s.channels),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_partial_frames_merge_into_one_upload() {
        // ---
        let t0 = Instant::now();
        let mut bridge = HardwareBridge::new(&config(), t0);
        let mut uploads = Vec::new();

        uploads.extend(bridge.on_line(r#"{"temperature": 38.5}"#, t0));
        uploads.extend(bridge.on_line(r#"{"humidity": 62}"#, t0 + Duration::from_millis(1800)));
        uploads.extend(bridge.on_line(r#"{"heartRate": 74}"#, t0 + Duration::from_millis(2100)));

        assert_eq!(
            snapshots(&uploads),
            vec![Channels {
                temperature: Some(38.5),
                humidity: Some(62.0),
                heart_rate: Some(74.0),
            }]
        );
    }

    #[test]
    fn test_upload_clock_resets_after_upload() {
        // ---
        let t0 = Instant::now();
        let mut bridge = HardwareBridge::new(&config(), t0);

        let first = bridge.on_line(r#"{"temperature": 38.0}"#, t0 + Duration::from_secs(2));
        let soon = bridge.on_line(r#"{"temperature": 38.1}"#, t0 + Duration::from_secs(3));
        let later = bridge.on_line(r#"{"temperature": 38.2}"#, t0 + Duration::from_secs(4));

        assert_eq!(snapshots(&first).len(), 1);
        assert!(snapshots(&soon).is_empty());
        assert_eq!(snapshots(&later)[0].temperature, Some(38.2));
    }

    #[test]
    fn test_no_upload_without_any_channel() {
        // ---
        let t0 = Instant::now();
        let mut bridge = HardwareBridge::new(&config(), t0);

        let out = bridge.on_line("{}", t0 + Duration::from_secs(5));
        assert!(out.is_empty());

        // The clock was not consumed, so the next real value goes out at once.
        let out = bridge.on_line(r#"{"humidity": 40}"#, t0 + Duration::from_secs(5));
        assert_eq!(snapshots(&out).len(), 1);
    }

    #[test]
    fn test_garbage_and_debug_lines_are_skipped() {
        // ---
        let t0 = Instant::now();
        let mut bridge = HardwareBridge::new(&config(), t0);

        assert!(bridge.on_line("{not json", t0 + Duration::from_secs(3)).is_empty());
        assert!(bridge.on_line("rst:0x1 (POWERON_RESET)", t0 + Duration::from_secs(3)).is_empty());
        assert!(!bridge.buffer().is_ready());
    }

    #[test]
    fn test_rfid_posts_event_and_tags_snapshots() {
        // ---
        let t0 = Instant::now();
        let mut bridge = HardwareBridge::new(&config(), t0);

        let out = bridge.on_line(">>> RFID Card Detected! UID:  04 3A 2B 1C", t0);
        assert_eq!(
            out,
            vec![Outbound::Rfid(RfidEvent {
                rfid_tag: "043a2b1c".into(),
                reader_id: "serial_bridge".into(),
            })]
        );

        let out = bridge.on_line("Temperature: 36.5 °C", t0 + Duration::from_secs(2));
        match out.as_slice() {
            [Outbound::Snapshot(s)] => assert_eq!(s.rfid_tag.as_deref(), Some("043a2b1c")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_user_switch_clears_channels() {
        // ---
        let t0 = Instant::now();
        let mut bridge = HardwareBridge::new(&config(), t0);

        bridge.on_line(r#"{"temperature": 38.5}"#, t0);
        bridge.on_line("New card detected! Switching user...", t0);
        assert!(!bridge.buffer().is_ready());
    }

    #[test]
    fn test_heartbeat_payload() {
        // ---
        let bridge = HardwareBridge::new(&config(), Instant::now());
        assert_eq!(
            bridge.heartbeat(),
            Outbound::SensorHeartbeat(Heartbeat {
                device_id: "esp32_serial".into()
            })
        );
    }
}

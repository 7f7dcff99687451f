//! Last-known-value buffer between the device's bursty emission cadence and
//! the bridge's fixed upload cadence.

use chrono::{DateTime, Utc};

use crate::models::{Channel, Channels, SensorSnapshot};

/// Per-device channel state, merged last-write-wins.
#[derive(Debug, Default, Clone)]
pub struct SnapshotBuffer {
    channels: Channels,
    rfid_tag: Option<String>,
}

impl SnapshotBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite every channel present in `partial`; leave the rest alone.
    pub fn merge(&mut self, partial: &Channels) {
        // ---
        for channel in Channel::ALL {
            if let Some(value) = partial.get(channel) {
                self.channels.set(channel, value);
            }
        }
    }

    /// True once any channel has ever been set.
    pub fn is_ready(&self) -> bool {
        self.channels.any_set()
    }

    /// Owned copy of the current state, safe to hand to the network layer.
    pub fn snapshot_for_upload(&self, device_id: &str, timestamp: DateTime<Utc>) -> SensorSnapshot {
        SensorSnapshot {
            device_id: device_id.to_string(),
            timestamp,
            channels: self.channels,
            rfid_tag: self.rfid_tag.clone(),
        }
    }

    pub fn set_rfid(&mut self, tag: String) {
        self.rfid_tag = Some(tag);
    }

    pub fn rfid(&self) -> Option<&str> {
        self.rfid_tag.as_deref()
    }

    /// Forget channel values, keeping the current tag.
    pub fn reset(&mut self) {
        self.channels = Channels::default();
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn partial(temperature: Option<f64>, humidity: Option<f64>, heart_rate: Option<f64>) -> Channels {
        Channels {
            temperature,
            humidity,
            heart_rate,
        }
    }

    #[test]
    fn test_merge_keeps_unset_channels() {
        // ---
        let mut buffer = SnapshotBuffer::new();
        buffer.merge(&partial(Some(38.5), Some(60.0), None));
        buffer.merge(&partial(None, Some(62.0), Some(74.0)));

        let snap = buffer.snapshot_for_upload("dev", Utc::now());
        assert_eq!(snap.channels, partial(Some(38.5), Some(62.0), Some(74.0)));
    }

    #[test]
    fn test_merge_is_idempotent() {
        // ---
        let mut buffer = SnapshotBuffer::new();
        let update = partial(None, Some(55.0), None);
        buffer.merge(&update);
        let once = buffer.snapshot_for_upload("dev", Utc::now()).channels;
        buffer.merge(&update);
        let twice = buffer.snapshot_for_upload("dev", Utc::now()).channels;

        assert_eq!(once, twice);
    }

    #[test]
    fn test_ready_only_after_a_value() {
        // ---
        let mut buffer = SnapshotBuffer::new();
        assert!(!buffer.is_ready());

        buffer.merge(&Channels::default());
        assert!(!buffer.is_ready());

        buffer.merge(&partial(None, None, Some(80.0)));
        assert!(buffer.is_ready());
    }

    #[test]
    fn test_snapshot_is_a_detached_copy() {
        // ---
        let mut buffer = SnapshotBuffer::new();
        buffer.merge(&partial(Some(37.0), None, None));
        let snap = buffer.snapshot_for_upload("dev", Utc::now());

        buffer.merge(&partial(Some(39.0), None, None));
        assert_eq!(snap.channels.temperature, Some(37.0));
    }

    #[test]
    fn test_reset_keeps_tag() {
        // ---
        let mut buffer = SnapshotBuffer::new();
        buffer.set_rfid("043a2b1c".into());
        buffer.merge(&partial(Some(37.0), None, None));
        buffer.reset();

        assert!(!buffer.is_ready());
        assert_eq!(buffer.rfid(), Some("043a2b1c"));
        assert_eq!(
            buffer.snapshot_for_upload("dev", Utc::now()).rfid_tag.as_deref(),
            Some("043a2b1c")
        );
    }
}

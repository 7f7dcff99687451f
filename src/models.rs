//! Wire records exchanged with the backend.
//!
//! Every payload the bridges post and every item the poller reads is one of
//! these fixed types; field names follow the backend's camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Distances strictly below this are high severity, in centimeters.
pub const HIGH_SEVERITY_CM: f64 = 5.0;

/// A named sensor channel carried by a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Temperature,
    Humidity,
    HeartRate,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Temperature, Channel::Humidity, Channel::HeartRate];
}

/// Last known value per channel. `None` means never reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channels {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    #[serde(alias = "heart_rate")]
    pub heart_rate: Option<f64>,
}

impl Channels {
    // ---
    pub fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::Humidity => self.humidity,
            Channel::HeartRate => self.heart_rate,
        }
    }

    pub fn set(&mut self, channel: Channel, value: f64) {
        let slot = match channel {
            Channel::Temperature => &mut self.temperature,
            Channel::Humidity => &mut self.humidity,
            Channel::HeartRate => &mut self.heart_rate,
        };
        *slot = Some(value);
    }

    /// True when at least one channel holds a value.
    pub fn any_set(&self) -> bool {
        Channel::ALL.iter().any(|c| self.get(*c).is_some())
    }
}

/// Merged point-in-time view of all channels for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSnapshot {
    // ---
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub channels: Channels,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "rfid_tag")]
    pub rfid_tag: Option<String>,
}

/// One radar sweep sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarPoint {
    // ---
    #[serde(default)]
    pub device_id: String,
    pub angle: u16,
    pub distance: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Alert severity. The bridge only raises `High` and `Medium`; `Low` can
/// come back from stored alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn for_distance(distance: f64) -> Self {
        if distance < HIGH_SEVERITY_CM {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

/// Fixed installation coordinates of a radar device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
}

/// A boundary breach that survived the per-angle cooldown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceAlert {
    // ---
    pub device_id: String,
    pub angle: u16,
    pub distance: f64,
    pub location: Option<Location>,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RfidEvent {
    pub rfid_tag: String,
    pub reader_id: String,
}

/// Body of `POST /sensors/bulk`.
#[derive(Debug, Serialize)]
pub struct BulkReadings<'a> {
    pub readings: &'a [SensorSnapshot],
}

/// Body of `GET /radar/live`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSweep {
    #[serde(default)]
    pub readings: Vec<RadarPoint>,
    #[serde(default)]
    pub is_connected: bool,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// A stored alert as returned by `GET /radar/alerts`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    // ---
    #[serde(default)]
    pub device_id: String,
    pub angle: u16,
    pub distance: f64,
    pub severity: Severity,
    #[serde(default)]
    pub is_resolved: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Body of `GET /radar/alerts`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertPage {
    #[serde(default)]
    pub results: Vec<AlertRecord>,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClosestDetection {
    pub distance: f64,
    pub angle: u16,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Body of `GET /radar/stats`: counters over a look-back window.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RadarStats {
    pub device_id: String,
    pub period: String,
    pub total_readings: u64,
    pub total_alerts: u64,
    pub unresolved_alerts: u64,
    pub closest_detection: Option<ClosestDetection>,
}

/// Body of `GET /status` and `GET /radar/status`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DeviceStatus {
    #[serde(alias = "isConnected")]
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn create_test_snapshot() -> SensorSnapshot {
        // ---
        SensorSnapshot {
            device_id: "esp32_serial".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap(),
            channels: Channels {
                temperature: Some(38.5),
                humidity: None,
                heart_rate: Some(74.0),
            },
            rfid_tag: None,
        }
    }

    #[test]
    fn test_snapshot_field_names() {
        // ---
        let value = serde_json::to_value(create_test_snapshot()).unwrap();

        assert_eq!(value["deviceId"], "esp32_serial");
        assert_eq!(value["temperature"], 38.5);
        assert_eq!(value["heartRate"], 74.0);
        // Unset channels are sent as explicit nulls
        assert!(value["humidity"].is_null());
        assert!(value.get("rfidTag").is_none());
    }

    #[test]
    fn test_snapshot_from_backend() {
        // ---
        let raw = json!({
            "_id": "65f0c0ffee",
            "deviceId": "esp32_serial",
            "rfidTag": "043a2b1c",
            "temperature": 37.9,
            "humidity": 61.0,
            "heart_rate": 70,
            "timestamp": "2025-03-26T18:45:00Z"
        });
        let snapshot: SensorSnapshot = serde_json::from_value(raw).unwrap();

        assert_eq!(snapshot.rfid_tag.as_deref(), Some("043a2b1c"));
        assert_eq!(snapshot.channels.heart_rate, Some(70.0));
        assert_eq!(snapshot.channels.get(Channel::Humidity), Some(61.0));
    }

    #[test]
    fn test_severity_boundary() {
        // ---
        assert_eq!(Severity::for_distance(4.0), Severity::High);
        assert_eq!(Severity::for_distance(4.99), Severity::High);
        assert_eq!(Severity::for_distance(5.0), Severity::Medium);
        assert_eq!(Severity::for_distance(29.0), Severity::Medium);
    }

    #[test]
    fn test_alert_wire_shape() {
        // ---
        let alert = GeofenceAlert {
            device_id: "radar_01".into(),
            angle: 45,
            distance: 4.0,
            location: Some(Location { lat: 28.7041, lng: 77.1025, accuracy: 100.0 }),
            severity: Severity::High,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&alert).unwrap();

        assert_eq!(value["severity"], "high");
        assert_eq!(value["deviceId"], "radar_01");
        assert_eq!(value["location"]["lng"], 77.1025);
    }

    #[test]
    fn test_status_accepts_both_spellings() {
        // ---
        let a: DeviceStatus = serde_json::from_str(r#"{"connected": true}"#).unwrap();
        let b: DeviceStatus = serde_json::from_str(r#"{"isConnected": false, "lastHeartbeat": null}"#).unwrap();

        assert!(a.connected);
        assert!(!b.connected);
    }

    #[test]
    fn test_stats_from_backend() {
        // ---
        let raw = json!({
            "deviceId": "radar_01",
            "period": "24 hours",
            "totalReadings": 1440,
            "totalAlerts": 7,
            "unresolvedAlerts": 2,
            "closestDetection": {"distance": 3.5, "angle": 120, "timestamp": "2025-03-26T18:45:00Z"}
        });
        let stats: RadarStats = serde_json::from_value(raw).unwrap();

        assert_eq!(stats.total_readings, 1440);
        assert_eq!(stats.unresolved_alerts, 2);
        let closest = stats.closest_detection.unwrap();
        assert_eq!(closest.angle, 120);
        assert_eq!(closest.distance, 3.5);

        let empty: RadarStats = serde_json::from_value(json!({"closestDetection": null})).unwrap();
        assert_eq!(empty, RadarStats::default());
    }

    #[test]
    fn test_stored_alert_may_be_low() {
        // ---
        let page: AlertPage = serde_json::from_value(json!({
            "results": [{"deviceId": "radar_01", "angle": 10, "distance": 25, "severity": "low"}],
            "count": 1
        }))
        .unwrap();

        assert_eq!(page.results[0].severity, Severity::Low);
        assert!(!page.results[0].is_resolved);
        assert!(page.results[0].timestamp.is_none());
    }

    #[test]
    fn test_channels_any_set() {
        // ---
        let mut channels = Channels::default();
        assert!(!channels.any_set());

        channels.set(Channel::Humidity, 62.0);
        assert!(channels.any_set());
    }
}

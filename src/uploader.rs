//! Single-attempt JSON uploads to the backend.
//!
//! Every call is fire-once: no retry, no queue. Failures are logged here with
//! the response body when the backend sent one, and returned so callers can
//! decide to ignore them (they always do).

use std::{future::Future, time::Duration};

use serde::Serialize;
use tracing::{debug, error};

use crate::error::UploadError;
use crate::models::{BulkReadings, GeofenceAlert, Heartbeat, RadarPoint, RfidEvent, SensorSnapshot};

// ---

pub const SENSORS: &str = "/sensors";
pub const SENSORS_BULK: &str = "/sensors/bulk";
pub const HEARTBEAT: &str = "/heartbeat";
pub const RADAR_HEARTBEAT: &str = "/radar/heartbeat";
pub const RADAR_LIVE: &str = "/radar/live";
pub const RADAR_ALERT: &str = "/radar/alert";
pub const RFID: &str = "/rfid";

/// One payload produced by a bridge, owned so it can cross task boundaries.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Snapshot(SensorSnapshot),
    SensorHeartbeat(Heartbeat),
    RadarHeartbeat(Heartbeat),
    LivePoint(RadarPoint),
    Alert(GeofenceAlert),
    Rfid(RfidEvent),
}

impl Outbound {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Outbound::Snapshot(_) => SENSORS,
            Outbound::SensorHeartbeat(_) => HEARTBEAT,
            Outbound::RadarHeartbeat(_) => RADAR_HEARTBEAT,
            Outbound::LivePoint(_) => RADAR_LIVE,
            Outbound::Alert(_) => RADAR_ALERT,
            Outbound::Rfid(_) => RFID,
        }
    }
}

/// Destination for bridge output. The HTTP [`Uploader`] is the production
/// implementation; tests substitute a recorder.
pub trait Backend: Send + Sync + 'static {
    fn deliver(&self, outbound: Outbound) -> impl Future<Output = Result<(), UploadError>> + Send;
}

/// HTTP client bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct Uploader {
    client: reqwest::Client,
    base_url: String,
}

/// Live sweep body; the backend keys its in-memory table by angle.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LivePointBody<'a> {
    angle: u16,
    distance: f64,
    device_id: &'a str,
}

impl Uploader {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        // ---
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `payload` as JSON to `endpoint`, exactly once.
    pub async fn post<T>(&self, endpoint: &str, payload: &T) -> Result<reqwest::Response, UploadError>
    where
        T: Serialize + ?Sized,
    {
        // ---
        let url = format!("{}{}", self.base_url, endpoint);

        let response = match self.client.post(&url).json(payload).send().await {
            Ok(response) => response,
            Err(source) => {
                let err = UploadError::Transport {
                    endpoint: endpoint.to_string(),
                    source,
                };
                error!("{}", err);
                return Err(err);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = UploadError::Status {
                endpoint: endpoint.to_string(),
                status,
                body,
            };
            error!("{}", err);
            return Err(err);
        }

        debug!("POST {} success ({})", endpoint, status);
        Ok(response)
    }

    pub async fn post_snapshot(&self, snapshot: &SensorSnapshot) -> Result<(), UploadError> {
        self.post(SENSORS, snapshot).await.map(drop)
    }

    pub async fn post_bulk(&self, readings: &[SensorSnapshot]) -> Result<(), UploadError> {
        self.post(SENSORS_BULK, &BulkReadings { readings }).await.map(drop)
    }

    pub async fn post_heartbeat(&self, device_id: &str) -> Result<(), UploadError> {
        self.post(HEARTBEAT, &heartbeat(device_id)).await.map(drop)
    }

    pub async fn post_radar_heartbeat(&self, device_id: &str) -> Result<(), UploadError> {
        self.post(RADAR_HEARTBEAT, &heartbeat(device_id)).await.map(drop)
    }

    pub async fn post_live_point(&self, point: &RadarPoint) -> Result<(), UploadError> {
        // ---
        let body = LivePointBody {
            angle: point.angle,
            distance: point.distance,
            device_id: &point.device_id,
        };
        self.post(RADAR_LIVE, &body).await.map(drop)
    }

    pub async fn post_alert(&self, alert: &GeofenceAlert) -> Result<(), UploadError> {
        self.post(RADAR_ALERT, alert).await.map(drop)
    }

    pub async fn post_rfid(&self, event: &RfidEvent) -> Result<(), UploadError> {
        self.post(RFID, event).await.map(drop)
    }
}

fn heartbeat(device_id: &str) -> Heartbeat {
    Heartbeat {
        device_id: device_id.to_string(),
    }
}

impl Backend for Uploader {
    async fn deliver(&self, outbound: Outbound) -> Result<(), UploadError> {
        // ---
        match &outbound {
            Outbound::Snapshot(snapshot) => self.post_snapshot(snapshot).await,
            Outbound::SensorHeartbeat(hb) => self.post_heartbeat(&hb.device_id).await,
            Outbound::RadarHeartbeat(hb) => self.post_radar_heartbeat(&hb.device_id).await,
            Outbound::LivePoint(point) => self.post_live_point(point).await,
            Outbound::Alert(alert) => self.post_alert(alert).await,
            Outbound::Rfid(event) => self.post_rfid(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_endpoints() {
        // ---
        let hb = Heartbeat {
            device_id: "radar_01".into(),
        };
        assert_eq!(Outbound::SensorHeartbeat(hb.clone()).endpoint(), "/heartbeat");
        assert_eq!(Outbound::RadarHeartbeat(hb).endpoint(), "/radar/heartbeat");

        let point = RadarPoint {
            device_id: "radar_01".into(),
            angle: 10,
            distance: 40.0,
            timestamp: Utc::now(),
        };
        assert_eq!(Outbound::LivePoint(point).endpoint(), "/radar/live");
    }

    #[test]
    fn test_live_body_shape() {
        // ---
        let body = LivePointBody {
            angle: 45,
            distance: 23.0,
            device_id: "radar_01",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value, serde_json::json!({"angle": 45, "distance": 23.0, "deviceId": "radar_01"}));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        // ---
        let uploader = Uploader::new("http://127.0.0.1:5000/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(uploader.base_url(), "http://127.0.0.1:5000/api");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error_not_a_panic() {
        // ---
        // Port 9 (discard) on localhost is closed in test environments.
        let uploader = Uploader::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let result = uploader.post_heartbeat("esp32_serial").await;
        tokio_test::assert_err!(result);
    }
}

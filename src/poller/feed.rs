//! Read side of the backend: the feeds an [`AdaptivePoller`](super::AdaptivePoller)
//! can follow.

use std::{fmt::Debug, future::Future, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use tracing::{trace, warn};

use super::state::{FeedKind, Timestamped};
use crate::error::PollError;
use crate::models::{AlertPage, AlertRecord, DeviceStatus, LiveSweep, RadarPoint, RadarStats, SensorSnapshot};

/// Look-back window for radar statistics.
pub const STATS_WINDOW_HOURS: u32 = 24;

// ---

/// Parameters of one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedQuery {
    /// Only items strictly newer than this; `None` on catch-up.
    pub since: Option<DateTime<Utc>>,
    /// Feed-specific filter key (RFID tag for vitals, device id for radar).
    pub filter: Option<String>,
}

/// A pollable data feed plus the status endpoint gating it.
pub trait FeedSource: Send + Sync + 'static {
    type Item: Clone + Timestamped + Send + Sync + 'static;

    /// Slow-moving side data refreshed on the connectivity cadence.
    type Extras: Clone + Debug + Default + Send + Sync + 'static;

    fn kind(&self) -> FeedKind;

    /// Incremental feeds answer newest-first; sweep feeds in display order.
    fn fetch(&self, query: FeedQuery) -> impl Future<Output = Result<Vec<Self::Item>, PollError>> + Send;

    /// Whether the device behind this feed is currently reporting.
    fn check_connectivity(&self) -> impl Future<Output = Result<bool, PollError>> + Send;

    /// Fetch side data. Failures are logged and reported as "nothing new".
    fn fetch_extras(&self, _filter: Option<String>) -> impl Future<Output = Self::Extras> + Send {
        async { Self::Extras::default() }
    }

    /// Fold a refresh into the current side data.
    fn merge_extras(current: &mut Self::Extras, update: Self::Extras) {
        *current = update;
    }
}

/// Shared GET plumbing for the HTTP feeds.
#[derive(Debug, Clone)]
struct JsonClient {
    client: reqwest::Client,
    base_url: String,
}

impl JsonClient {
    fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        // ---
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, PollError> {
        // ---
        let url = format!("{}{}", self.base_url, path);
        trace!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|source| PollError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status { url, status });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| PollError::Decode { url, source })
    }

    async fn connected(&self, path: &str) -> Result<bool, PollError> {
        self.get::<DeviceStatus>(path, &[]).await.map(|s| s.connected)
    }
}

/// `GET /sensors/latest`, gated by `GET /status`.
#[derive(Debug, Clone)]
pub struct HttpSensorFeed {
    http: JsonClient,
    limit: u32,
}

impl HttpSensorFeed {
    pub fn new(base_url: &str, timeout: Duration, limit: u32) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout)?,
            limit,
        })
    }
}

/// Build the `/sensors/latest` query string pairs.
pub fn sensor_query(limit: u32, query: &FeedQuery) -> Vec<(&'static str, String)> {
    // ---
    let mut params = vec![("limit", limit.to_string())];
    if let Some(rfid) = &query.filter {
        params.push(("rfid", rfid.clone()));
    }
    if let Some(since) = query.since {
        params.push(("since", since.to_rfc3339_opts(SecondsFormat::Millis, true)));
    }
    params
}

impl FeedSource for HttpSensorFeed {
    type Item = SensorSnapshot;
    type Extras = ();

    fn kind(&self) -> FeedKind {
        FeedKind::Incremental
    }

    async fn fetch(&self, query: FeedQuery) -> Result<Vec<SensorSnapshot>, PollError> {
        let params = sensor_query(self.limit, &query);
        self.http.get("/sensors/latest", &params).await
    }

    async fn check_connectivity(&self) -> Result<bool, PollError> {
        self.http.connected("/status").await
    }
}

/// `GET /radar/live`, gated by `GET /radar/status`, with the latest open
/// alert and recent statistics alongside.
#[derive(Debug, Clone)]
pub struct HttpRadarFeed {
    http: JsonClient,
    device_id: String,
}

impl HttpRadarFeed {
    /// `device_id` selects alerts and stats unless a filter key overrides it.
    pub fn new(base_url: &str, timeout: Duration, device_id: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout)?,
            device_id: device_id.to_string(),
        })
    }
}

/// Radar side data: the newest unresolved alert and windowed statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadarExtras {
    pub latest_alert: Option<AlertRecord>,
    pub stats: Option<RadarStats>,
}

impl RadarExtras {
    /// A refresh that came back empty or failed keeps the previous value.
    pub fn merge(&mut self, update: RadarExtras) {
        // ---
        if update.latest_alert.is_some() {
            self.latest_alert = update.latest_alert;
        }
        if update.stats.is_some() {
            self.stats = update.stats;
        }
    }
}

pub fn alert_query(device_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("deviceId", device_id.to_string()),
        ("limit", "1".to_string()),
        ("isResolved", "false".to_string()),
    ]
}

pub fn stats_query(device_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("deviceId", device_id.to_string()),
        ("hours", STATS_WINDOW_HOURS.to_string()),
    ]
}

/// Keep points for `device` (or all when unfiltered), ordered by angle.
pub fn arrange_sweep(mut points: Vec<RadarPoint>, device: Option<&str>) -> Vec<RadarPoint> {
    // ---
    if let Some(device) = device {
        points.retain(|p| p.device_id.is_empty() || p.device_id == device);
    }
    points.sort_by_key(|p| p.angle);
    points
}

impl FeedSource for HttpRadarFeed {
    type Item = RadarPoint;
    type Extras = RadarExtras;

    fn kind(&self) -> FeedKind {
        FeedKind::Sweep
    }

    async fn fetch(&self, query: FeedQuery) -> Result<Vec<RadarPoint>, PollError> {
        // ---
        let sweep: LiveSweep = self.http.get("/radar/live", &[]).await?;
        Ok(arrange_sweep(sweep.readings, query.filter.as_deref()))
    }

    async fn check_connectivity(&self) -> Result<bool, PollError> {
        self.http.connected("/radar/status").await
    }

    async fn fetch_extras(&self, filter: Option<String>) -> RadarExtras {
        // ---
        let device = filter.unwrap_or_else(|| self.device_id.clone());
        let alert_params = alert_query(&device);
        let stats_params = stats_query(&device);

        let (alerts, stats) = tokio::join!(
            self.http.get::<AlertPage>("/radar/alerts", &alert_params),
            self.http.get::<RadarStats>("/radar/stats", &stats_params),
        );

        let latest_alert = match alerts {
            Ok(page) => page.results.into_iter().next(),
            Err(e) => {
                warn!("Alert fetch failed: {}", e);
                None
            }
        };
        let stats = match stats {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Stats fetch failed: {}", e);
                None
            }
        };
        RadarExtras { latest_alert, stats }
    }

    fn merge_extras(current: &mut RadarExtras, update: RadarExtras) {
        current.merge(update);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_catch_up_query_has_no_since() {
        // ---
        let params = sensor_query(50, &FeedQuery::default());
        assert_eq!(params, vec![("limit", "50".to_string())]);
    }

    #[test]
    fn test_incremental_query_carries_cursor_and_tag() {
        // ---
        let since = Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 5).unwrap();
        let params = sensor_query(
            20,
            &FeedQuery {
                since: Some(since),
                filter: Some("043a2b1c".into()),
            },
        );
        assert_eq!(
            params,
            vec![
                ("limit", "20".to_string()),
                ("rfid", "043a2b1c".to_string()),
                ("since", "2025-03-26T12:00:05.000Z".to_string()),
            ]
        );
    }

    #[test]
    fn test_sweep_sorted_by_angle_and_filtered() {
        // ---
        let point = |device: &str, angle: u16| RadarPoint {
            device_id: device.into(),
            angle,
            distance: 80.0,
            timestamp: Utc::now(),
        };
        let points = vec![point("radar_01", 90), point("radar_02", 10), point("radar_01", 30), point("", 0)];

        let all = arrange_sweep(points.clone(), None);
        assert_eq!(all.iter().map(|p| p.angle).collect::<Vec<_>>(), vec![0, 10, 30, 90]);

        let one = arrange_sweep(points, Some("radar_01"));
        assert_eq!(one.iter().map(|p| p.angle).collect::<Vec<_>>(), vec![0, 30, 90]);
    }

    #[test]
    fn test_status_body_accepts_both_spellings() {
        // ---
        let a: DeviceStatus = serde_json::from_str(r#"{"connected": true}"#).unwrap();
        let b: DeviceStatus = serde_json::from_str(r#"{"isConnected": false, "lastSeen": null}"#).unwrap();
        assert!(a.connected);
        assert!(!b.connected);
    }

    #[test]
    fn test_side_data_queries() {
        // ---
        assert_eq!(
            alert_query("radar_01"),
            vec![
                ("deviceId", "radar_01".to_string()),
                ("limit", "1".to_string()),
                ("isResolved", "false".to_string()),
            ]
        );
        assert_eq!(
            stats_query("radar_01"),
            vec![("deviceId", "radar_01".to_string()), ("hours", "24".to_string())]
        );
    }

    #[test]
    fn test_empty_refresh_keeps_previous_side_data() {
        // ---
        let page: AlertPage = serde_json::from_str(
            r#"{"results": [{"_id": "a1", "deviceId": "radar_01", "angle": 45, "distance": 4,
                "severity": "high", "isResolved": false, "message": "Movement detected",
                "timestamp": "2025-03-26T12:00:00.000Z"}], "count": 1}"#,
        )
        .unwrap();
        let stats: RadarStats = serde_json::from_str(
            r#"{"deviceId": "radar_01", "period": "24 hours", "totalReadings": 900,
                "totalAlerts": 3, "unresolvedAlerts": 1, "closestDetection": null}"#,
        )
        .unwrap();

        let mut extras = RadarExtras::default();
        extras.merge(RadarExtras {
            latest_alert: page.results.into_iter().next(),
            stats: Some(stats),
        });
        extras.merge(RadarExtras::default());

        assert_eq!(extras.latest_alert.as_ref().map(|a| a.angle), Some(45));
        assert_eq!(extras.stats.as_ref().map(|s| s.unresolved_alerts), Some(1));

        let newer: RadarStats = serde_json::from_str(r#"{"totalAlerts": 4}"#).unwrap();
        extras.merge(RadarExtras {
            latest_alert: None,
            stats: Some(newer),
        });
        assert_eq!(extras.stats.map(|s| s.total_alerts), Some(4));
        assert!(extras.latest_alert.is_some());
    }
}

//! Radar bridge: forwards every sweep point live and raises geofence alerts
//! with a per-angle cooldown.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::FrameProcessor;
use crate::config::RadarBridgeConfig;
use crate::frame::{parse_radar_line, RadarFrame};
use crate::models::{GeofenceAlert, Heartbeat, Location, RadarPoint, Severity};
use crate::uploader::Outbound;

/// True when an echo lands inside the boundary. A zero distance is "no echo".
pub fn is_breach(distance: f64, threshold_cm: f64) -> bool {
    distance > 0.0 && distance < threshold_cm
}

/// Last alert instant per angle, owned by one bridge (one device).
#[derive(Debug)]
pub struct CooldownTable {
    window: Duration,
    last_alert: HashMap<u16, Instant>,
}

impl CooldownTable {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_alert: HashMap::new(),
        }
    }

    /// Claim the alert slot for `angle`, or report that it is cooling down.
    ///
    /// A slot frees up only once strictly more than the window has passed.
    pub fn try_acquire(&mut self, angle: u16, now: Instant) -> bool {
        // ---
        match self.last_alert.get(&angle) {
            Some(last) if now.saturating_duration_since(*last) <= self.window => false,
            _ => {
                self.last_alert.insert(angle, now);
                true
            }
        }
    }
}

#[derive(Debug)]
pub struct GeofenceBridge {
    device_id: String,
    threshold_cm: f64,
    location: Location,
    heartbeat_interval: Duration,
    cooldowns: CooldownTable,
}

impl GeofenceBridge {
    pub fn new(cfg: &RadarBridgeConfig) -> Self {
        Self {
            device_id: cfg.device_id.clone(),
            threshold_cm: cfg.threshold_cm,
            location: cfg.location,
            heartbeat_interval: cfg.heartbeat_interval,
            cooldowns: CooldownTable::new(cfg.alert_cooldown),
        }
    }

    pub fn handle_frame(&mut self, frame: RadarFrame, now: Instant) -> Vec<Outbound> {
        // ---
        let RadarFrame { angle, distance } = frame;
        let timestamp = Utc::now();
        let breach = is_breach(distance, self.threshold_cm);

        trace!("{}° -> {:.0}cm{}", angle, distance, if breach { " (breach)" } else { "" });

        let mut out = vec![Outbound::LivePoint(RadarPoint {
            device_id: self.device_id.clone(),
            angle,
            distance,
            timestamp,
        })];

        if !breach {
            return out;
        }

        if self.cooldowns.try_acquire(angle, now) {
            warn!("ALERT! Movement at {}° ({:.1}cm)", angle, distance);
            out.push(Outbound::Alert(GeofenceAlert {
                device_id: self.device_id.clone(),
                angle,
                distance,
                location: Some(self.location),
                severity: Severity::for_distance(distance),
                timestamp,
            }));
        } else {
            debug!("Breach at {}° suppressed by cooldown", angle);
        }
        out
    }
}

impl FrameProcessor for GeofenceBridge {
    fn name(&self) -> &'static str {
        "radar"
    }

    fn on_line(&mut self, line: &str, now: Instant) -> Vec<Outbound> {
        // ---
        match parse_radar_line(line) {
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
        Outbound::RadarHeartbeat(Heartbeat {
            device_id: self.device_id.clone(),
        })
    }

    fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }
}

//! Line framing and frame grammars for the serial channel.
//!
//! Two firmware variants feed the bridges. The vitals firmware prints either
//! JSON objects (`{"temperature":38.5}`) or labelled text lines
//! (`Temperature: 36.5 °C`); the radar firmware prints `angle,distance`
//! samples terminated by `.`. Anything else on the wire is debug output and
//! is reported as "not a frame" rather than an error.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ParseError;
use crate::models::{Channel, Channels};

/// Frames longer than this without a delimiter are discarded.
const MAX_FRAME_BYTES: usize = 4096;

/// A decoded line from the vitals firmware.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorFrame {
    /// Partial channel update; unset channels are left untouched on merge.
    Reading(Channels),
    /// An RFID tag was presented to the reader.
    Rfid(String),
    /// The firmware is switching to a new animal; prior values are stale.
    UserSwitch,
}

/// A decoded radar sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarFrame {
    pub angle: u16,
    pub distance: f64,
}

struct TextPatterns {
    temperature: Regex,
    humidity: Regex,
    heart_rate: Regex,
    uid: Regex,
}

fn text_patterns() -> &'static TextPatterns {
    static PATTERNS: OnceLock<TextPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| TextPatterns {
        temperature: Regex::new(r"Temperature:\s*([\d.]+)\s*°C").expect("valid regex"),
        humidity: Regex::new(r"Humidity:\s*([\d.]+)\s*%").expect("valid regex"),
        heart_rate: Regex::new(r"Avg BPM:\s*(\d+)").expect("valid regex"),
        uid: Regex::new(r"UID:\s*([0-9A-Fa-f][0-9A-Fa-f\s]*)").expect("valid regex"),
    })
}

fn radar_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+),(\d+\.?\d*)$").expect("valid regex"))
}

/// Decode one line from the vitals firmware.
///
/// Returns `Ok(None)` for lines that carry no data (boot banners, debug
/// prints, blank lines).
pub fn parse_sensor_line(line: &str) -> Result<Option<SensorFrame>, ParseError> {
    // ---
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    if line.starts_with('{') {
        let channels: Channels = serde_json::from_str(line)
            .map_err(|e| ParseError::MalformedSensor(format!("{e}: {line}")))?;
        return Ok(Some(SensorFrame::Reading(channels)));
    }

    let patterns = text_patterns();

    if line.contains("RFID Card Detected") || line.contains("UID:") {
        if let Some(caps) = patterns.uid.captures(line) {
            let tag: String = caps[1]
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();
            return Ok(Some(SensorFrame::Rfid(tag)));
        }
    }

    if line.contains("New card detected") || line.contains("Switching user") {
        return Ok(Some(SensorFrame::UserSwitch));
    }

    let mut channels = Channels::default();
    let labelled = [
        (Channel::Temperature, &patterns.temperature),
        (Channel::Humidity, &patterns.humidity),
        (Channel::HeartRate, &patterns.heart_rate),
    ];
    for (channel, pattern) in labelled {
        if let Some(caps) = pattern.captures(line) {
            let value = caps[1]
                .parse::<f64>()
                .map_err(|_| ParseError::MalformedSensor(line.to_string()))?;
            channels.set(channel, value);
        }
    }

    if channels.any_set() {
        Ok(Some(SensorFrame::Reading(channels)))
    } else {
        Ok(None)
    }
}

/// Decode one radar sample, tolerating a trailing `.` terminator.
pub fn parse_radar_line(line: &str) -> Result<Option<RadarFrame>, ParseError> {
    // ---
    let body = line.trim().trim_end_matches('.').trim_end();
    if body.is_empty() {
        return Ok(None);
    }

    let Some(caps) = radar_pattern().captures(body) else {
        // Debug output never starts with a digit; a numeric line that does not
        // fit the pattern is a corrupted sample.
        return if body.starts_with(|c: char| c.is_ascii_digit()) {
            Err(ParseError::MalformedRadar(body.to_string()))
        } else {
            Ok(None)
        };
    };

    let angle: u32 = caps[1]
        .parse()
        .map_err(|_| ParseError::MalformedRadar(body.to_string()))?;
    if angle > 180 {
        return Err(ParseError::AngleOutOfRange(angle));
    }
    let distance: f64 = caps[2]
        .parse()
        .map_err(|_| ParseError::MalformedRadar(body.to_string()))?;

    Ok(Some(RadarFrame {
        angle: angle as u16,
        distance,
    }))
}

/// Splits a raw serial byte stream into text frames.
///
/// A newline always ends a frame, in addition to the configured delimiter,
/// so both `\r\n` and terminator-style firmware are handled by one type.
#[derive(Debug)]
pub struct LineFramer {
    delimiter: Vec<u8>,
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new(delimiter: &str) -> Self {
        // ---
        let delimiter = if delimiter.is_empty() { "\n" } else { delimiter };
        Self {
            delimiter: delimiter.as_bytes().to_vec(),
            buf: Vec::new(),
        }
    }

    /// Feed bytes read from the port and collect every completed frame.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        // ---
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some((end, skip)) = self.next_boundary() {
            let raw: Vec<u8> = self.buf.drain(..end + skip).take(end).collect();
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim();
            if !text.is_empty() {
                frames.push(text.to_string());
            }
        }

        if self.buf.len() > MAX_FRAME_BYTES {
            tracing::warn!(
                "Discarding {} bytes without a frame delimiter",
                self.buf.len()
            );
            self.buf.clear();
        }

        frames
    }

    /// Position of the earliest boundary and the length of the boundary marker.
    fn next_boundary(&self) -> Option<(usize, usize)> {
        // ---
        let newline = self.buf.iter().position(|b| *b == b'\n').map(|i| (i, 1));
        let delimiter = self
            .buf
            .windows(self.delimiter.len())
            .position(|w| w == self.delimiter.as_slice())
            .map(|i| (i, self.delimiter.len()));

        match (newline, delimiter) {
            (Some(n), Some(d)) => Some(if d.0 <= n.0 { d } else { n }),
            (n, d) => n.or(d),
        }
    }
}

//! Serial transport: port discovery and a blocking reader thread.
//!
//! `serialport` is a blocking API, so each open port is owned by a dedicated
//! OS thread that frames incoming bytes and forwards complete lines over a
//! tokio channel. Closing the link stops that thread, which drops the port
//! handle and releases the device.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::LineEvent;
use crate::error::TransportError;
use crate::frame::LineFramer;

/// Manufacturer substrings of common ESP32 / Arduino USB bridges.
const KNOWN_MANUFACTURERS: [&str; 4] = ["Silicon Labs", "FTDI", "wch.cn", "Espressif"];

/// USB vendor IDs for the same chips (CP210x, FTDI, CH340, Espressif native USB).
const KNOWN_VIDS: [u16; 4] = [0x10c4, 0x0403, 0x1a86, 0x303a];

/// How long a blocking read waits before re-checking the stop flag.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

// ---

/// Descriptor metadata for one enumerated port.
#[derive(Debug, Clone, PartialEq)]
pub struct PortCandidate {
    pub name: String,
    pub manufacturer: Option<String>,
    pub vid: Option<u16>,
}

impl PortCandidate {
    fn is_known_device(&self) -> bool {
        // ---
        let by_vendor = self.vid.is_some_and(|vid| KNOWN_VIDS.contains(&vid));
        let by_manufacturer = self
            .manufacturer
            .as_deref()
            .is_some_and(|m| KNOWN_MANUFACTURERS.iter().any(|known| m.contains(known)));
        by_vendor || by_manufacturer
    }

    fn looks_like_usb(&self) -> bool {
        self.name.contains("USB")
    }
}

/// Enumerate serial ports with their USB metadata.
pub fn list_candidates() -> Result<Vec<PortCandidate>, TransportError> {
    // ---
    let ports = serialport::available_ports().map_err(TransportError::Enumerate)?;

    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(info) => PortCandidate {
                name: port.port_name,
                manufacturer: info.manufacturer,
                vid: Some(info.vid),
            },
            _ => PortCandidate {
                name: port.port_name,
                manufacturer: None,
                vid: None,
            },
        })
        .collect())
}

/// Prefer a recognised microcontroller bridge, then any port named like a
/// USB serial device, else the first port.
pub fn select_port(candidates: &[PortCandidate]) -> Option<&PortCandidate> {
    candidates
        .iter()
        .find(|c| c.is_known_device())
        .or_else(|| candidates.iter().find(|c| c.looks_like_usb()))
        .or_else(|| candidates.first())
}

/// Log every port found, as `--list-ports` prints them.
pub fn log_available_ports(candidates: &[PortCandidate]) {
    // ---
    if candidates.is_empty() {
        info!("Available serial ports: (none)");
        return;
    }
    info!("Available serial ports:");
    for (idx, port) in candidates.iter().enumerate() {
        match port.vid {
            Some(vid) => info!(
                "  {}. {} - {} (VID: 0x{:04x})",
                idx + 1,
                port.name,
                port.manufacturer.as_deref().unwrap_or("Unknown"),
                vid
            ),
            None => info!("  {}. {} - Unknown", idx + 1, port.name),
        }
    }
}

/// Resolve the port to open when the operator did not name one.
pub fn discover_port() -> Result<String, TransportError> {
    // ---
    let candidates = list_candidates()?;
    log_available_ports(&candidates);

    let selected = select_port(&candidates).ok_or(TransportError::NoPortFound)?;
    if selected.is_known_device() {
        info!("Auto-selected: {}", selected.name);
    } else if selected.looks_like_usb() {
        info!("No known device found, using USB port: {}", selected.name);
    } else {
        warn!("No known device found, using first available: {}", selected.name);
    }
    Ok(selected.name.clone())
}

/// An open serial port and the thread reading it.
pub struct SerialLink {
    name: String,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialLink {
    /// Open `port` and start forwarding framed lines to `lines`.
    pub fn open(
        port: &str,
        baud_rate: u32,
        delimiter: &str,
        lines: mpsc::Sender<LineEvent>,
    ) -> Result<Self, TransportError> {
        // ---
        info!("Connecting to {} at {} baud...", port, baud_rate);

        let mut handle = serialport::new(port, baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|source| TransportError::Open {
                port: port.to_string(),
                source,
            })?;

        // Some ESP32 boards hold the UART until DTR is asserted.
        if let Err(e) = handle.write_data_terminal_ready(true) {
            debug!("Could not set DTR on {}: {}", port, e);
        }

        info!("Serial port {} opened", port);

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let stop = stop.clone();
            let name = port.to_string();
            let framer = LineFramer::new(delimiter);
            std::thread::Builder::new()
                .name(format!("serial-{}", name.rsplit('/').next().unwrap_or(&name)))
                .spawn(move || read_loop(handle, name, framer, stop, lines))
                .map_err(|source| TransportError::Read {
                    port: port.to_string(),
                    source,
                })?
        };

        Ok(Self {
            name: port.to_string(),
            stop,
            reader: Some(reader),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the reader thread and wait for it to release the port.
    pub async fn close(mut self) {
        // ---
        self.stop.store(true, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            match tokio::task::spawn_blocking(move || reader.join()).await {
                Ok(Ok(())) => info!("Serial port {} closed", self.name),
                _ => warn!("Serial reader for {} did not exit cleanly", self.name),
            }
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn read_loop(
    mut port: Box<dyn serialport::SerialPort>,
    name: String,
    mut framer: LineFramer,
    stop: Arc<AtomicBool>,
    lines: mpsc::Sender<LineEvent>,
) {
    // ---
    let mut buf = [0u8; 1024];

    while !stop.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {
                let _ = lines.blocking_send(Err(TransportError::Closed(name.clone())));
                break;
            }
            Ok(n) => {
                for frame in framer.push(&buf[..n]) {
                    if lines.blocking_send(Ok(frame)).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(source) => {
                let _ = lines.blocking_send(Err(TransportError::Read {
                    port: name.clone(),
                    source,
                }));
                break;
            }
        }
    }
    debug!("Serial reader for {} exiting", name);
}

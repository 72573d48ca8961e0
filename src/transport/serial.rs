//! Serial transport for boards running the µBlocks VM
//!
//! Uses blocking threads:
//! - Reader thread: reads from serial port, sends to channel
//! - Writer thread: receives from channel, writes to serial port
//!
//! The transport stops when:
//! - `shutdown` flag is set
//! - Serial port disconnects (detected via consecutive empty reads or an I/O error)
//! - Write error occurs

use super::{PortOpener, Transport, TransportChannels};
use crate::constants::{
    CHANNEL_CAPACITY, DEFAULT_BAUD_RATE, SERIAL_BUFFER_SIZE, SERIAL_DISCONNECT_THRESHOLD,
    SERIAL_READ_TIMEOUT_MS, TTY_DISPLAY_NAME,
};
use crate::error::{BridgeError, Result};
use crate::protocol::PortEntry;
use bytes::Bytes;
use serialport::{SerialPortInfo, SerialPortType};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Open a serial port
    ///
    /// # Errors
    ///
    /// `PortUnavailable` if the device is missing or busy.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Box<dyn serialport::SerialPort>> {
        serialport::new(port_name, baud_rate)
            .timeout(std::time::Duration::from_millis(SERIAL_READ_TIMEOUT_MS))
            .open()
            .map_err(|e| BridgeError::PortUnavailable {
                port: port_name.to_string(),
                source: e.into(),
            })
    }
}

impl Transport for SerialTransport {
    fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<TransportChannels> {
        let (in_tx, in_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        let port_read = Self::open(&self.port_name, self.baud_rate)?;
        let port_write = port_read
            .try_clone()
            .map_err(|e| BridgeError::PortUnavailable {
                port: self.port_name.clone(),
                source: e.into(),
            })?;

        // Reader thread (blocking)
        let shutdown_reader = shutdown.clone();
        let name = self.port_name.clone();
        std::thread::spawn(move || {
            let mut port = port_read;
            let mut buf = [0u8; SERIAL_BUFFER_SIZE];
            let mut empty_reads = 0u32;

            while !shutdown_reader.load(Ordering::Relaxed) {
                match port.read(&mut buf) {
                    Ok(n) if n > 0 => {
                        empty_reads = 0;
                        if in_tx
                            .blocking_send(Bytes::copy_from_slice(&buf[..n]))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(_) => {
                        // zero bytes without timeout: port is probably gone
                        empty_reads += 1;
                        if empty_reads > SERIAL_DISCONNECT_THRESHOLD {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        empty_reads = 0;
                    }
                    Err(e) => {
                        debug!("{}: read error: {}", name, e);
                        break;
                    }
                }
            }
        });

        // Writer thread (blocking)
        let shutdown_writer = shutdown;
        let name = self.port_name;
        std::thread::spawn(move || {
            let mut port = port_write;
            while let Some(data) = out_rx.blocking_recv() {
                if shutdown_writer.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = port.write_all(&data) {
                    warn!("{}: write error: {}", name, e);
                    break;
                }
            }
        });

        Ok(TransportChannels {
            rx: in_rx,
            tx: out_tx,
        })
    }
}

/// Opens real serial ports for the board link
pub struct SerialOpener {
    baud_rate: u32,
    tty: Option<String>,
}

impl SerialOpener {
    pub fn new(baud_rate: u32, tty: Option<String>) -> Self {
        Self { baud_rate, tty }
    }
}

impl PortOpener for SerialOpener {
    fn open(&self, port: &str, shutdown: Arc<AtomicBool>) -> Result<TransportChannels> {
        SerialTransport::new(port)
            .with_baud_rate(self.baud_rate)
            .spawn(shutdown)
    }

    fn available_ports(&self) -> Vec<PortEntry> {
        list_ports(self.tty.as_deref())
    }
}

// =============================================================================
// Port discovery
// =============================================================================

/// USB serial ports, plus `tty` if given
///
/// Ports without USB information (built-in UARTs, Bluetooth) are skipped.
pub fn list_ports(tty: Option<&str>) -> Vec<PortEntry> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("Cannot enumerate serial ports: {}", e);
            Vec::new()
        }
    };

    let mut entries: Vec<PortEntry> = ports.iter().filter_map(usb_entry).collect();
    if let Some(tty) = tty {
        entries.push(PortEntry {
            path: tty.to_string(),
            display_name: TTY_DISPLAY_NAME.to_string(),
        });
    }
    entries
}

fn usb_entry(port: &SerialPortInfo) -> Option<PortEntry> {
    let SerialPortType::UsbPort(usb) = &port.port_type else {
        return None;
    };
    let name = usb.manufacturer.as_deref().or(usb.product.as_deref());
    Some(PortEntry {
        path: port.port_name.clone(),
        display_name: display_name(name, usb.vid, usb.pid, &port.port_name),
    })
}

/// Manufacturer or product string, else the guessed board family
fn display_name(name: Option<&str>, vid: u16, pid: u16, port_name: &str) -> String {
    if let Some(name) = name {
        return name.to_string();
    }
    match BoardKind::classify(vid, pid) {
        BoardKind::Unknown => port_name.to_string(),
        kind => kind.label().to_string(),
    }
}

/// Board family guessed from USB identifiers
///
/// Best effort only: many boards share generic USB-serial chips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardKind {
    /// micro:bit and Calliope mini (ARM mbed DAPLink)
    MicroBit,
    Arduino,
    Adafruit,
    Espressif,
    RaspberryPiPico,
    Unknown,
}

const VID_ARM_MBED: u16 = 0x0D28;
const PID_DAPLINK: u16 = 0x0204;
const VID_ARDUINO: u16 = 0x2341;
const VID_ADAFRUIT: u16 = 0x239A;
const VID_ESPRESSIF: u16 = 0x303A;
const VID_RASPBERRY_PI: u16 = 0x2E8A;

impl BoardKind {
    pub fn classify(vid: u16, pid: u16) -> Self {
        match (vid, pid) {
            (VID_ARM_MBED, PID_DAPLINK) => BoardKind::MicroBit,
            (VID_ARDUINO, _) => BoardKind::Arduino,
            (VID_ADAFRUIT, _) => BoardKind::Adafruit,
            (VID_ESPRESSIF, _) => BoardKind::Espressif,
            (VID_RASPBERRY_PI, _) => BoardKind::RaspberryPiPico,
            _ => BoardKind::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BoardKind::MicroBit => "micro:bit / Calliope",
            BoardKind::Arduino => "Arduino",
            BoardKind::Adafruit => "Adafruit",
            BoardKind::Espressif => "ESP32",
            BoardKind::RaspberryPiPico => "Raspberry Pi Pico",
            BoardKind::Unknown => "Unknown board",
        }
    }
}

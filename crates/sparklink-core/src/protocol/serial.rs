//! Serial port handling
//!
//! Discovers ports and opens them as async streams for the session.

use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                product: usb_info.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key placing ttyUSB* first (USB-UART bridges), then ttyACM*, then the rest
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: pick up /dev/ttyUSB* and /dev/ttyACM* the enumerator missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port as an async stream, 8N1 without flow control
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<SerialStream, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    tokio_serial::new(name, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| match e.kind() {
            tokio_serial::ErrorKind::NoDevice => ProtocolError::PortNotFound(name.to_string()),
            _ => ProtocolError::SerialError(e.to_string()),
        })
}

//! Serial port handling
//!
//! Low-level serial port access: enumeration with deterministic ordering and
//! opening a port configured for flight computer communication.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::ConnectionError;

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

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key placing ttyACM* ports first, then ttyUSB*, then everything else,
/// numeric suffixes in order.
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports. Never fails; may return an empty list.
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
    {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: add /dev/ttyACM* and /dev/ttyUSB* entries the API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo {
                        name: full,
                        vid: None,
                        pid: None,
                        product: None,
                    });
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port configured 8N1 for flight computer communication.
///
/// The hardware read timeout is kept short; the session layer imposes its
/// own per-command deadline on top of non-blocking polls.
pub fn open_port(name: &str, baud: u32) -> Result<Box<dyn SerialPort>, ConnectionError> {
    let mut port = serialport::new(name, baud)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| ConnectionError::PortUnavailable {
            port: name.to_string(),
            reason: e.to_string(),
        })?;

    configure_port(port.as_mut())?;
    Ok(port)
}

fn configure_port(port: &mut dyn SerialPort) -> Result<(), ConnectionError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

    // Keep DTR asserted so opening the port does not reset the board.
    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!("failed to set DTR high: {} (continuing)", e);
    }

    Ok(())
}

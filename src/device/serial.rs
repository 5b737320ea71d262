//! Serial alarm device discovery by USB vendor/product id.
//!
//! Ports are matched against an allow-list of (VID, PID) pairs instead of
//! port names, so the siren survives the OS renumbering `/dev/ttyUSB*` or
//! `COM*` after a replug.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortType};
use tracing::warn;

use super::reconnector::Connector;
use crate::error::DeviceError;

/// One accepted USB (vendor id, product id) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
    #[serde(default)]
    pub label: String,
}

/// Official Arduino boards plus the common CH340 and FTDI clones.
const BUILTIN_IDS: &[(u16, u16, &str)] = &[
    (0x2341, 0x0043, "Arduino Uno"),
    (0x2341, 0x0001, "Arduino Uno R1"),
    (0x2341, 0x0010, "Arduino Mega 2560"),
    (0x2341, 0x8036, "Arduino Leonardo"),
    (0x2341, 0x0243, "Arduino Micro"),
    (0x2A03, 0x0043, "Arduino Uno (AG)"),
    (0x2A03, 0x0010, "Arduino Mega (AG)"),
    (0x1A86, 0x7523, "CH340/CH341 clone"),
    (0x0403, 0x6001, "FTDI clone"),
];

impl UsbId {
    pub fn builtin_table() -> Vec<UsbId> {
        BUILTIN_IDS
            .iter()
            .map(|&(vid, pid, label)| UsbId {
                vid,
                pid,
                label: label.to_string(),
            })
            .collect()
    }

    pub fn matches(&self, vid: Option<u16>, pid: Option<u16>) -> bool {
        vid == Some(self.vid) && pid == Some(self.pid)
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)?;
        if !self.label.is_empty() {
            write!(f, " ({})", self.label)?;
        }
        Ok(())
    }
}

/// A serial port as seen by enumeration, independent of the `serialport` types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortCandidate {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl fmt::Display for PortCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.port_name)
    }
}

impl PortCandidate {
    pub fn usb_id(&self) -> Option<String> {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => Some(format!("{vid:04x}:{pid:04x}")),
            _ => None,
        }
    }
}

/// Ports whose USB ids appear in `table`, in enumeration order.
pub fn matching_ports(ports: &[PortCandidate], table: &[UsbId]) -> Vec<PortCandidate> {
    ports
        .iter()
        .filter(|port| table.iter().any(|id| id.matches(port.vid, port.pid)))
        .cloned()
        .collect()
}

/// Every serial port the OS reports, USB or not.
pub fn list_ports() -> Result<Vec<PortCandidate>, DeviceError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|info| match info.port_type {
            SerialPortType::UsbPort(usb) => PortCandidate {
                port_name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => PortCandidate {
                port_name: info.port_name,
                vid: None,
                pid: None,
                product: None,
            },
        })
        .collect())
}

/// Line-oriented command channel.
pub trait LineWriter: Send {
    fn write_line(&mut self, line: &str) -> Result<(), DeviceError>;
}

/// An open serial port speaking `COMMAND\n`.
pub struct SerialLine {
    port: Box<dyn SerialPort>,
}

impl LineWriter for SerialLine {
    fn write_line(&mut self, line: &str) -> Result<(), DeviceError> {
        self.port.write_all(format!("{line}\n").as_bytes())?;
        self.port.flush()?;
        Ok(())
    }
}

/// Opens the first allow-listed USB serial device.
pub struct SerialConnector {
    table: Vec<UsbId>,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    /// An empty `table` falls back to [`UsbId::builtin_table`].
    pub fn new(table: Vec<UsbId>, baud_rate: u32) -> Self {
        let table = if table.is_empty() {
            UsbId::builtin_table()
        } else {
            table
        };
        Self {
            table,
            baud_rate,
            timeout: Duration::from_secs(1),
        }
    }

    pub fn table(&self) -> &[UsbId] {
        &self.table
    }
}

impl Connector for SerialConnector {
    type Candidate = PortCandidate;
    type Handle = SerialLine;

    fn candidates(&self) -> Vec<PortCandidate> {
        match list_ports() {
            Ok(ports) => matching_ports(&ports, &self.table),
            Err(e) => {
                warn!(error = %e, "serial port enumeration failed");
                Vec::new()
            }
        }
    }

    fn open(&self, candidate: &PortCandidate) -> Result<SerialLine, DeviceError> {
        let port = serialport::new(&candidate.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| DeviceError::Open {
                candidate: candidate.port_name.clone(),
                message: e.to_string(),
            })?;
        Ok(SerialLine { port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, ids: Option<(u16, u16)>) -> PortCandidate {
        PortCandidate {
            port_name: name.into(),
            vid: ids.map(|(v, _)| v),
            pid: ids.map(|(_, p)| p),
            product: None,
        }
    }

    #[test]
    fn builtin_table_contains_uno_and_clones() {
        let table = UsbId::builtin_table();
        assert_eq!(table.len(), 9);
        assert!(table.iter().any(|id| id.vid == 0x2341 && id.pid == 0x0043));
        assert!(table.iter().any(|id| id.vid == 0x1A86 && id.pid == 0x7523));
        assert!(table.iter().any(|id| id.vid == 0x0403 && id.pid == 0x6001));
    }

    #[test]
    fn matching_filters_by_usb_id_not_name() {
        let ports = vec![
            port("/dev/ttyS0", None),
            port("/dev/ttyUSB3", Some((0x1A86, 0x7523))),
            port("/dev/ttyACM0", Some((0x046D, 0x0825))),
            port("/dev/ttyACM7", Some((0x2341, 0x0043))),
        ];
        let matched = matching_ports(&ports, &UsbId::builtin_table());
        let names: Vec<_> = matched.iter().map(|p| p.port_name.as_str()).collect();
        assert_eq!(names, vec!["/dev/ttyUSB3", "/dev/ttyACM7"]);
    }

    #[test]
    fn custom_table_replaces_builtin() {
        let connector = SerialConnector::new(
            vec![UsbId {
                vid: 0x10C4,
                pid: 0xEA60,
                label: "CP2102".into(),
            }],
            115_200,
        );
        assert_eq!(connector.table().len(), 1);

        let ports = vec![
            port("/dev/ttyUSB0", Some((0x10C4, 0xEA60))),
            port("/dev/ttyUSB1", Some((0x2341, 0x0043))),
        ];
        let matched = matching_ports(&ports, connector.table());
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].port_name, "/dev/ttyUSB0");
    }

    #[test]
    fn empty_table_uses_builtin() {
        let connector = SerialConnector::new(Vec::new(), 9600);
        assert_eq!(connector.table(), UsbId::builtin_table().as_slice());
    }

    #[test]
    fn usb_id_display() {
        let id = UsbId {
            vid: 0x2341,
            pid: 0x0043,
            label: "Arduino Uno".into(),
        };
        assert_eq!(id.to_string(), "2341:0043 (Arduino Uno)");
        assert_eq!(port("/dev/ttyACM0", Some((0x2341, 0x43))).usb_id().as_deref(), Some("2341:0043"));
        assert_eq!(port("/dev/ttyS0", None).usb_id(), None);
    }

    #[test]
    fn open_missing_port_is_open_error() {
        let connector = SerialConnector::new(Vec::new(), 9600);
        let err = connector
            .open(&port("/dev/vigia-does-not-exist", Some((0x2341, 0x0043))))
            .err()
            .unwrap();
        assert!(matches!(err, DeviceError::Open { .. }));
    }
}

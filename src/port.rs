//! Serial link to the receiver micro:bit.
//!
//! The receiver is found by USB vendor/product id among the system's serial
//! ports. Once open, the handle is kept for the life of the process; there is
//! no reconnection.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use log::{debug, info, warn};
use serialport::{ClearBuffer, SerialPortType};

use crate::config::PortConfig;
use crate::errors::{PortError, Result};

/// Settling time after opening before the first poll
const OPEN_DELAY: Duration = Duration::from_millis(100);

/// Largest single read; several frames fit comfortably
const READ_CHUNK: usize = 1024;

// ============================================================================
// Transport Abstraction
// ============================================================================

/// Trait for Read + Write + Send, allowing different transport backends.
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

// ============================================================================
// Port Discovery
// ============================================================================

/// Summary of one enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub kind: &'static str,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl PortInfo {
    fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == Some(vid) && self.pid == Some(pid)
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let (kind, vid, pid) = match &p.port_type {
            SerialPortType::UsbPort(info) => ("USB", Some(info.vid), Some(info.pid)),
            SerialPortType::BluetoothPort => ("Bluetooth", None, None),
            SerialPortType::PciPort => ("PCI", None, None),
            SerialPortType::Unknown => ("Unknown", None, None),
        };
        PortInfo {
            name: p.port_name,
            kind,
            vid,
            pid,
        }
    }
}

/// Enumerate the system's serial ports, sorted by name.
pub fn list_ports() -> std::result::Result<Vec<PortInfo>, PortError> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .map_err(PortError::Enumeration)?
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}

/// Pick the port matching `vid`/`pid`.
///
/// The first match in `ports` order wins. Further matches are reported,
/// since they usually mean a sensor node is plugged in as well.
pub fn select_port(ports: &[PortInfo], vid: u16, pid: u16) -> Option<&PortInfo> {
    let matching: Vec<&PortInfo> = ports.iter().filter(|p| p.matches(vid, pid)).collect();
    info!("{} matching devices found", matching.len());

    if let [chosen, rest @ ..] = matching.as_slice() {
        if !rest.is_empty() {
            let ignored: Vec<&str> = rest.iter().map(|p| p.name.as_str()).collect();
            warn!(
                "multiple ports match vid={:#06x} pid={:#06x}; using {}, ignoring {:?}. Check for false connections",
                vid, pid, chosen.name, ignored
            );
        }
        return Some(*chosen);
    }
    None
}

// ============================================================================
// Port Handle
// ============================================================================

/// Open connection to the receiver.
pub struct PortHandle {
    transport: Box<dyn Transport>,
    name: String,
}

impl PortHandle {
    /// Locate and open the receiver's serial port.
    ///
    /// Fails with [`PortError::DeviceNotFound`] when nothing matches and
    /// [`PortError::PortUnavailable`] when the port cannot be opened.
    pub fn open(config: &PortConfig) -> std::result::Result<Self, PortError> {
        let name = match &config.path {
            Some(path) => path.to_string_lossy().into_owned(),
            None => {
                let ports = list_ports()?;
                for p in &ports {
                    debug!("scanned port {} ({}) vid={:?} pid={:?}", p.name, p.kind, p.vid, p.pid);
                }
                select_port(&ports, config.vid, config.pid)
                    .map(|p| p.name.clone())
                    .ok_or(PortError::DeviceNotFound {
                        vid: config.vid,
                        pid: config.pid,
                    })?
            }
        };

        let unavailable = |source| PortError::PortUnavailable {
            port: name.clone(),
            source,
        };
        let port = serialport::new(&name, config.baud_rate)
            .timeout(config.read_timeout)
            .open()
            .map_err(unavailable)?;
        port.clear(ClearBuffer::All).map_err(unavailable)?;
        info!("opened serial port: {} at {} baud", name, config.baud_rate);

        std::thread::sleep(OPEN_DELAY);
        Ok(Self::from_transport(name, port))
    }

    /// Wrap an already-open transport, e.g. an in-memory link in tests.
    pub fn from_transport<T: Transport + 'static>(name: impl Into<String>, transport: T) -> Self {
        Self {
            transport: Box::new(transport),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write all of `bytes` and flush.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.write_all(bytes)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Read whatever has arrived, waiting at most the port's read timeout.
    ///
    /// Returns an empty buffer when nothing arrived.
    pub fn read_available(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; READ_CHUNK];
        match self.transport.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortHandle").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    fn usb(name: &str, vid: u16, pid: u16) -> PortInfo {
        PortInfo {
            name: name.into(),
            kind: "USB",
            vid: Some(vid),
            pid: Some(pid),
        }
    }

    #[test]
    fn selects_first_matching_port() {
        let ports = vec![
            PortInfo {
                name: "/dev/ttyS0".into(),
                kind: "Unknown",
                vid: None,
                pid: None,
            },
            usb("/dev/ttyACM0", 0x0D28, 0x0204),
            usb("/dev/ttyACM1", 0x0D28, 0x0204),
            usb("/dev/ttyUSB0", 0x2e8a, 0x000a),
        ];
        let chosen = select_port(&ports, 0x0D28, 0x0204).unwrap();
        assert_eq!(chosen.name, "/dev/ttyACM0");
    }

    #[test]
    fn no_match_selects_nothing() {
        let ports = vec![usb("/dev/ttyUSB0", 0x2e8a, 0x000a)];
        assert!(select_port(&ports, 0x0D28, 0x0204).is_none());
        assert!(select_port(&[], 0x0D28, 0x0204).is_none());
    }

    #[test]
    fn explicit_path_that_does_not_exist_is_unavailable() {
        let config = PortConfig {
            path: Some("/dev/does-not-exist-microbit".into()),
            ..PortConfig::default()
        };
        match PortHandle::open(&config) {
            Err(PortError::PortUnavailable { port, .. }) => {
                assert_eq!(port, "/dev/does-not-exist-microbit")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    /// Transport whose reads always time out.
    struct Silent;

    impl Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::TimedOut, "timed out"))
        }
    }

    impl Write for Silent {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn timeout_reads_as_empty() {
        let mut handle = PortHandle::from_transport("silent", Silent);
        handle.write(b"mb_0\n").unwrap();
        assert!(handle.read_available().unwrap().is_empty());
    }

    #[test]
    fn reads_available_bytes() {
        let mut handle =
            PortHandle::from_transport("cursor", Cursor::new(b"ST,0,1,2,3,4,EN".to_vec()));
        assert_eq!(handle.read_available().unwrap(), b"ST,0,1,2,3,4,EN");
        assert!(handle.read_available().unwrap().is_empty());
    }
}

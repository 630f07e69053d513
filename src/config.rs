//! Runtime configuration for the port and the poll loop.
//!
//! Defaults match the micro:bit receiver firmware: 115200 baud 8N1, the
//! controller enumerating as vid 0x0D28 / pid 0x0204, and sensor nodes
//! answering to `mb_<n>`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scan::DeviceId;

// ============================================================================
// Constants
// ============================================================================

/// Default serial baud rate of the receiver micro:bit
pub const BAUD_RATE: u32 = 115_200;

/// USB vendor id of the micro:bit DAPLink interface (3368)
pub const VID_MICROBIT: u16 = 0x0D28;

/// USB product id of the micro:bit DAPLink interface (516)
pub const PID_MICROBIT: u16 = 0x0204;

/// Upper bound on a single serial read
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Time budget of one poll, split evenly between send and receive
pub const SCAN_DELAY: Duration = Duration::from_millis(100);

/// Default per-device history capacity
pub const MAX_HISTORY: usize = 500;

/// Default number of sensor nodes polled
pub const DEFAULT_DEVICE_COUNT: u8 = 3;

/// Prefix the receiver firmware expects in front of the node number
pub const POLL_PREFIX: &str = "mb_";

/// How to find and open the controller's serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub vid: u16,
    pub pid: u16,
    /// Explicit device path; skips enumeration when set.
    pub path: Option<PathBuf>,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            vid: VID_MICROBIT,
            pid: PID_MICROBIT,
            path: None,
            baud_rate: BAUD_RATE,
            read_timeout: READ_TIMEOUT,
        }
    }
}

/// Poll loop and store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Devices in round-robin order.
    pub devices: Vec<DeviceId>,
    pub poll_prefix: String,
    pub scan_delay: Duration,
    pub max_history: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            devices: (0..DEFAULT_DEVICE_COUNT).map(DeviceId).collect(),
            poll_prefix: POLL_PREFIX.to_string(),
            scan_delay: SCAN_DELAY,
            max_history: MAX_HISTORY,
        }
    }
}

impl PollerConfig {
    /// Config polling nodes `0..count`, otherwise default.
    pub fn with_device_count(count: u8) -> Self {
        Self {
            devices: (0..count).map(DeviceId).collect(),
            ..Self::default()
        }
    }

    /// Wire label of a device, e.g. `mb_2`.
    pub fn label(&self, device: DeviceId) -> String {
        format!("{}{}", self.poll_prefix, device.0)
    }
}

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Failures while locating or opening the controller's serial port.
///
/// All of these are fatal: there is no fallback device and no reconnection.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("no serial port matches vid={vid:#06x} pid={pid:#06x}")]
    DeviceNotFound { vid: u16, pid: u16 },
    #[error("serial port {port} cannot be opened: {source}")]
    PortUnavailable {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial port enumeration failed: {0}")]
    Enumeration(#[source] serialport::Error),
}

/// Reasons a delimited frame could not be turned into a sample.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("field `{field}` is not a valid integer: {value:?}")]
    Parse { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, PollError>;

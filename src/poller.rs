//! Round-robin polling of sensor nodes over the shared serial line.
//!
//! The receiver micro:bit relays each `mb_<n>\n` poll over radio and
//! forwards whatever comes back. Nothing ties a reply to the poll that
//! triggered it: the line is half-duplex and shared, so a read may hold
//! nothing, only our own poll command, a garbled fragment, or a complete
//! frame from a node other than the one just polled. Each poll is therefore
//! classified independently:
//!
//! | read                         | action                                  |
//! |------------------------------|-----------------------------------------|
//! | empty                        | skip, history untouched                 |
//! | bare poll label (echo)       | skip, history untouched                 |
//! | no frame / undecodable frame | commit a blank scan for the polled node |
//! | decodable frame              | commit to the node named in the frame   |
//!
//! Nothing is retried; the next poll is the next chance.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::PollerConfig;
use crate::errors::{DecodeError, Result};
use crate::exchange::Session;
use crate::frame::{self, Frame};
use crate::port::PortHandle;
use crate::scan::{self, DeviceId, Sample};
use crate::store::CommitOutcome;

// ============================================================================
// Data Types
// ============================================================================

/// How a read was interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Nothing arrived.
    Empty,
    /// Only a poll label came back, before any node answered.
    Echo(String),
    /// Something arrived but no sample could be decoded from it.
    Garbled(Degradation),
    /// A complete, decodable frame.
    Decoded(Sample),
}

/// Why a read was replaced by a blank scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    NoFrame,
    Decode(DecodeError),
}

/// Result of polling one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    EmptyRead,
    EchoOnly,
    /// Write or read on the port failed; the device is skipped this cycle.
    TransportError,
    Committed { blank: bool, outcome: CommitOutcome },
}

/// Running counters over the life of a poll loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    pub cycles: u64,
    pub polls: u64,
    pub empty_reads: u64,
    pub echoes: u64,
    pub transport_errors: u64,
    pub blank_scans: u64,
    pub committed: u64,
    pub duplicates: u64,
    pub rejected: u64,
}

impl PollStats {
    fn record(&mut self, outcome: PollOutcome) {
        self.polls += 1;
        match outcome {
            PollOutcome::EmptyRead => self.empty_reads += 1,
            PollOutcome::EchoOnly => self.echoes += 1,
            PollOutcome::TransportError => self.transport_errors += 1,
            PollOutcome::Committed { blank, outcome } => {
                if blank {
                    self.blank_scans += 1;
                }
                match outcome {
                    CommitOutcome::Stored { .. } => self.committed += 1,
                    CommitOutcome::Duplicate => self.duplicates += 1,
                    CommitOutcome::UnknownDevice => self.rejected += 1,
                }
            }
        }
    }
}

/// Interpret the text of one read.
///
/// `labels` are the poll commands of all configured devices, used to spot a
/// read that is nothing but an echoed poll.
pub fn classify(read: &str, labels: &[String]) -> Classification {
    let trimmed = read.trim();
    if trimmed.is_empty() {
        return Classification::Empty;
    }
    if labels.iter().any(|l| l == trimmed) {
        return Classification::Echo(trimmed.to_string());
    }

    let Some(frame) = frame::extract(read) else {
        return Classification::Garbled(Degradation::NoFrame);
    };
    match scan::decode(&frame) {
        Ok(sample) => Classification::Decoded(sample),
        Err(e) => Classification::Garbled(Degradation::Decode(e)),
    }
}

// ============================================================================
// Poll Loop
// ============================================================================

/// Acquisition actor: sole writer of the session's device store.
///
/// # Example
/// ```ignore
/// let session = Session::new(&config);
/// let port = PortHandle::open(&PortConfig::default())?;
/// let handle = PollLoop::new(port, session.clone(), &config).spawn()?;
///
/// let snapshot = session.exchange().request(100);
/// session.cancel_token().cancel();
/// let stats = handle.join().expect("poll loop panicked");
/// ```
pub struct PollLoop {
    port: PortHandle,
    session: Session,
    devices: Vec<DeviceId>,
    labels: Vec<String>,
    scan_delay: Duration,
    stats: PollStats,
}

impl PollLoop {
    pub fn new(port: PortHandle, session: Session, config: &PollerConfig) -> Self {
        Self {
            port,
            session,
            devices: config.devices.clone(),
            labels: config.devices.iter().map(|&d| config.label(d)).collect(),
            scan_delay: config.scan_delay,
            stats: PollStats::default(),
        }
    }

    /// Poll until the session is cancelled.
    pub fn run(&mut self) -> PollStats {
        info!(
            "polling {} devices on {} every {:?}",
            self.devices.len(),
            self.port.name(),
            self.scan_delay
        );
        while !self.session.cancel_token().is_cancelled() {
            self.run_cycle();
        }
        info!("poll loop stopped: {:?}", self.stats);
        self.stats
    }

    /// Run at most `cycles` round-robin passes, stopping early on cancellation.
    pub fn run_cycles(&mut self, cycles: usize) -> PollStats {
        for _ in 0..cycles {
            if self.session.cancel_token().is_cancelled() {
                break;
            }
            self.run_cycle();
        }
        self.stats
    }

    /// Poll every device once, in configured order.
    pub fn run_cycle(&mut self) {
        for i in 0..self.devices.len() {
            self.poll(i);
        }
        self.stats.cycles += 1;
    }

    /// Move the loop onto its own thread.
    pub fn spawn(mut self) -> Result<JoinHandle<PollStats>> {
        let handle = thread::Builder::new()
            .name("poll-loop".into())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    // ------------------------------------------------------------------------
    // Internal Methods
    // ------------------------------------------------------------------------

    /// Send, receive, classify and commit for the device at `index`.
    fn poll(&mut self, index: usize) -> PollOutcome {
        let device = self.devices[index];
        let label = &self.labels[index];
        let half = self.scan_delay / 2;

        debug!("polling: {}", label);
        if let Err(e) = self.port.write(format!("{label}\n").as_bytes()) {
            warn!("poll write failed: device={}, error={}", label, e);
            return self.finish(PollOutcome::TransportError);
        }
        pause(half);

        let read = self.port.read_available();
        pause(self.scan_delay - half);
        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("read failed: device={}, error={}", label, e);
                return self.finish(PollOutcome::TransportError);
            }
        };
        let text = String::from_utf8_lossy(&bytes);

        let sample = match classify(&text, &self.labels) {
            Classification::Empty => {
                debug!("no read_bytes, polling: {}", label);
                return self.finish(PollOutcome::EmptyRead);
            }
            Classification::Echo(echo) => {
                debug!("id only, polling: {} read: {}", label, echo);
                return self.finish(PollOutcome::EchoOnly);
            }
            Classification::Garbled(reason) => {
                warn!(
                    "substituting blank scan: device={}, reason={:?}, read={:?}",
                    label, reason, text
                );
                blank_scan(device)
            }
            Classification::Decoded(sample) => {
                if sample.device != device {
                    debug!("polled {} but received scan from device {}", label, sample.device);
                }
                sample
            }
        };

        let blank = sample.is_blank();
        debug!(
            "scan: device={} count={:?} magnitude={:?}",
            sample.device, sample.sequence, sample.magnitude
        );
        let outcome = self.session.store().commit(sample);
        self.finish(PollOutcome::Committed { blank, outcome })
    }

    fn finish(&mut self, outcome: PollOutcome) -> PollOutcome {
        self.stats.record(outcome);
        outcome
    }
}

/// Blank scan attributed to `device`, produced through the normal decoder.
fn blank_scan(device: DeviceId) -> Sample {
    scan::decode(&Frame::blank(device)).unwrap_or_else(|_| Sample::blank(device))
}

fn pause(d: Duration) {
    if !d.is_zero() {
        thread::sleep(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        PollerConfig::default()
            .devices
            .iter()
            .map(|&d| PollerConfig::default().label(d))
            .collect()
    }

    #[test]
    fn classifies_empty_reads() {
        assert_eq!(classify("", &labels()), Classification::Empty);
        assert_eq!(classify("\r\n", &labels()), Classification::Empty);
    }

    #[test]
    fn classifies_echo() {
        assert_eq!(
            classify("mb_1\n", &labels()),
            Classification::Echo("mb_1".into())
        );
        // a label of an unconfigured device is just noise
        assert_eq!(
            classify("mb_7", &labels()),
            Classification::Garbled(Degradation::NoFrame)
        );
    }

    #[test]
    fn classifies_garbled() {
        assert_eq!(
            classify("ST,1,30,-24", &labels()),
            Classification::Garbled(Degradation::NoFrame)
        );
        assert_eq!(
            classify("ST,1,30,-24EN", &labels()),
            Classification::Garbled(Degradation::Decode(DecodeError::FieldCount {
                expected: 5,
                found: 3
            }))
        );
    }

    #[test]
    fn classifies_frame_from_other_device() {
        match classify("mb_0\nST,2,5,1,2,2,EN", &labels()) {
            Classification::Decoded(sample) => {
                assert_eq!(sample.device, DeviceId(2));
                assert_eq!(sample.magnitude, Some(3));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn blank_scan_is_blank() {
        let sample = blank_scan(DeviceId(1));
        assert!(sample.is_blank());
        assert_eq!(sample.device, DeviceId(1));
    }

    #[test]
    fn stats_count_outcomes() {
        let mut stats = PollStats::default();
        stats.record(PollOutcome::EmptyRead);
        stats.record(PollOutcome::EchoOnly);
        stats.record(PollOutcome::Committed {
            blank: true,
            outcome: CommitOutcome::Stored { evicted: 0 },
        });
        stats.record(PollOutcome::Committed {
            blank: false,
            outcome: CommitOutcome::Duplicate,
        });
        assert_eq!(stats.polls, 4);
        assert_eq!(stats.empty_reads, 1);
        assert_eq!(stats.echoes, 1);
        assert_eq!(stats.blank_scans, 1);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.duplicates, 1);
    }
}

//! Per-device rolling sample history.
//!
//! Each configured device owns a fixed-capacity FIFO guarded by its own
//! mutex. The poll loop is the only writer; readers copy what they need
//! while holding the lock and never keep references into a history.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};

use crate::scan::{DeviceId, Sample};

/// What `commit` did with a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Appended; `evicted` older samples were dropped to stay within capacity.
    Stored { evicted: usize },
    /// A sample with this sequence is already in the window.
    Duplicate,
    /// Device is not part of the configured set.
    UnknownDevice,
}

/// Insertion-ordered, capacity-bounded history of one device.
#[derive(Debug, Clone)]
pub struct DeviceHistory {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl DeviceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append unless the sequence is already present, then trim to capacity.
    pub fn push(&mut self, sample: Sample) -> CommitOutcome {
        if let Some(seq) = sample.sequence {
            if self.samples.iter().any(|s| s.sequence == Some(seq)) {
                return CommitOutcome::Duplicate;
            }
        }

        self.samples.push_back(sample);
        let mut evicted = 0;
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
            evicted += 1;
        }
        CommitOutcome::Stored { evicted }
    }

    /// Magnitudes of the newest `n` samples, oldest first.
    pub fn tail_magnitudes(&self, n: usize) -> Vec<Option<u32>> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).map(|s| s.magnitude).collect()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Lookup table of device histories, fixed at construction.
#[derive(Debug)]
pub struct DeviceStore {
    histories: BTreeMap<DeviceId, Mutex<DeviceHistory>>,
}

impl DeviceStore {
    pub fn new(devices: &[DeviceId], capacity: usize) -> Self {
        Self {
            histories: devices
                .iter()
                .map(|&d| (d, Mutex::new(DeviceHistory::new(capacity))))
                .collect(),
        }
    }

    /// Record a sample in the history of the device it names.
    pub fn commit(&self, sample: Sample) -> CommitOutcome {
        let device = sample.device;
        let Some(history) = self.histories.get(&device) else {
            warn!("sample for unconfigured device {} dropped", device);
            return CommitOutcome::UnknownDevice;
        };

        let sequence = sample.sequence;
        let outcome = lock(history).push(sample);
        if outcome == CommitOutcome::Duplicate {
            debug!(
                "found replicated count: {} id: {}",
                sequence.unwrap_or_default(),
                device
            );
        }
        outcome
    }

    /// Last `n` magnitudes of `device`, oldest first. Empty if unknown.
    pub fn snapshot(&self, device: DeviceId, n: usize) -> Vec<Option<u32>> {
        self.histories
            .get(&device)
            .map(|h| lock(h).tail_magnitudes(n))
            .unwrap_or_default()
    }

    /// Copy of the newest sample of every device that has one.
    pub fn latest(&self) -> BTreeMap<DeviceId, Sample> {
        self.histories
            .iter()
            .filter_map(|(&d, h)| lock(h).latest().cloned().map(|s| (d, s)))
            .collect()
    }

    /// Copy of a device's full history, oldest first.
    pub fn history(&self, device: DeviceId) -> Vec<Sample> {
        self.histories
            .get(&device)
            .map(|h| lock(h).iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, device: DeviceId) -> usize {
        self.histories.get(&device).map_or(0, |h| lock(h).len())
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.histories.keys().copied()
    }
}

// `push` never leaves a history half-written, so a poisoned lock is still readable.
fn lock(history: &Mutex<DeviceHistory>) -> MutexGuard<'_, DeviceHistory> {
    history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

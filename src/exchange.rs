//! Hand-off between the poll loop and a consumer.
//!
//! A [`Session`] is created once and handed to both sides. The poll loop
//! writes into its store; a consumer asks a [`SnapshotExchange`] for the
//! last N magnitudes per device and gets back an owned [`Snapshot`]. The
//! request is a one-shot pull: it serves whatever is committed right now and
//! never waits for the next poll.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::config::PollerConfig;
use crate::scan::DeviceId;
use crate::store::DeviceStore;

/// Cooperative stop signal, checked by the poll loop before each cycle.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared context of one acquisition run.
#[derive(Debug, Clone)]
pub struct Session {
    store: Arc<DeviceStore>,
    cancel: CancelToken,
    poll_prefix: String,
}

impl Session {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            store: Arc::new(DeviceStore::new(&config.devices, config.max_history)),
            cancel: CancelToken::new(),
            poll_prefix: config.poll_prefix.clone(),
        }
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Consumer-side handle.
    pub fn exchange(&self) -> SnapshotExchange {
        SnapshotExchange {
            store: Arc::clone(&self.store),
            poll_prefix: self.poll_prefix.clone(),
        }
    }
}

/// Read-only view of the store for a consumer.
#[derive(Debug, Clone)]
pub struct SnapshotExchange {
    store: Arc<DeviceStore>,
    poll_prefix: String,
}

impl SnapshotExchange {
    /// Last `n` magnitudes of every configured device.
    pub fn request(&self, n: usize) -> Snapshot {
        Snapshot {
            window: n,
            poll_prefix: self.poll_prefix.clone(),
            magnitudes: self
                .store
                .devices()
                .map(|d| (d, self.store.snapshot(d, n)))
                .collect(),
        }
    }
}

/// Point-in-time copy of recent magnitudes, oldest first per device.
///
/// `None` entries are blank scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    window: usize,
    poll_prefix: String,
    magnitudes: BTreeMap<DeviceId, Vec<Option<u32>>>,
}

impl Snapshot {
    /// Requested window size; each series holds at most this many values.
    pub fn window(&self) -> usize {
        self.window
    }

    pub fn get(&self, device: DeviceId) -> Option<&[Option<u32>]> {
        self.magnitudes.get(&device).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &[Option<u32>])> {
        self.magnitudes.iter().map(|(&d, v)| (d, v.as_slice()))
    }

    /// Device label as used on the wire, e.g. `mb_0`.
    pub fn label(&self, device: DeviceId) -> String {
        format!("{}{}", self.poll_prefix, device.0)
    }
}

/// Serialises as `{ "mb_0": [477, null, ...], ... }`.
impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.magnitudes.len()))?;
        for (device, values) in &self.magnitudes {
            map.serialize_entry(&self.label(*device), values)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{Acceleration, Sample};

    fn commit(session: &Session, device: u8, seq: u32, x: i32) {
        session.store().commit(Sample::new(
            DeviceId(device),
            seq,
            Acceleration { x, y: 0, z: 0 },
        ));
    }

    #[test]
    fn covers_every_configured_device() {
        let session = Session::new(&PollerConfig::default());
        commit(&session, 1, 0, 12);

        let snapshot = session.exchange().request(5);
        assert_eq!(snapshot.window(), 5);
        assert_eq!(snapshot.iter().count(), 3);
        assert!(snapshot.get(DeviceId(0)).unwrap().is_empty());
        assert_eq!(snapshot.get(DeviceId(1)), Some(&[Some(12)][..]));
        assert_eq!(snapshot.get(DeviceId(7)), None);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let session = Session::new(&PollerConfig::default());
        commit(&session, 0, 0, 1);
        let before = session.exchange().request(10);
        commit(&session, 0, 1, 2);
        let after = session.exchange().request(10);

        assert_eq!(before.get(DeviceId(0)).unwrap().len(), 1);
        assert_eq!(after.get(DeviceId(0)), Some(&[Some(1), Some(2)][..]));
    }

    #[test]
    fn serialises_with_labels() {
        let session = Session::new(&PollerConfig::with_device_count(2));
        commit(&session, 0, 0, 477);
        session.store().commit(Sample::blank(DeviceId(0)));

        let json = serde_json::to_string(&session.exchange().request(3)).unwrap();
        assert_eq!(json, r#"{"mb_0":[477,null],"mb_1":[]}"#);
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let session = Session::new(&PollerConfig::default());
        let other = session.clone();
        assert!(!other.cancel_token().is_cancelled());
        session.cancel_token().cancel();
        assert!(other.cancel_token().is_cancelled());
    }
}

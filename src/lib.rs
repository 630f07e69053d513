//! Serial poller for BBC micro:bit accelerometer nodes.
//!
//! A receiver micro:bit on USB relays poll commands over radio to sensor
//! micro:bits and forwards their replies. This crate drives that link:
//!
//! 1. [`PortHandle`] finds the receiver by USB vendor/product id.
//! 2. [`PollLoop`] polls each node in turn, pulls `ST … EN` frames out of the
//!    noisy reply stream ([`frame::extract`]) and decodes them into
//!    [`Sample`]s ([`scan::decode`]).
//! 3. Samples land in a per-node, fixed-capacity [`DeviceStore`] with
//!    duplicate sequence counts dropped.
//! 4. A consumer on its own cadence asks the [`SnapshotExchange`] for the last
//!    N magnitudes of every node and receives an owned [`Snapshot`].
//!
//! # Timing
//!
//! Each poll takes one scan delay (100 ms by default): half after writing the
//! poll, half after reading the reply. With three nodes, each node is sampled
//! roughly every 300 ms. Nodes do not send timestamps; capture time is taken
//! on the host when a frame is decoded.

pub mod config;
pub mod errors;
pub mod exchange;
pub mod frame;
pub mod logging;
pub mod poller;
pub mod port;
pub mod scan;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use config::{PollerConfig, PortConfig};
pub use errors::*;
pub use exchange::{CancelToken, Session, Snapshot, SnapshotExchange};
pub use frame::Frame;
pub use poller::{Classification, PollLoop, PollOutcome, PollStats};
pub use port::{PortHandle, PortInfo, Transport};
pub use scan::{Acceleration, DeviceId, Sample};
pub use store::{CommitOutcome, DeviceHistory, DeviceStore};

//! Out-of-order offset commits for the Relay dispatch data plane.
//!
//! Records pulled from a partition are dispatched concurrently, so their
//! terminal outcomes arrive in any order. This crate decides, per
//! partition, when the offsets resolved so far form a contiguous run from
//! the last commit, and commits the next offset to read for that run.
//!
//! # Overview
//!
//! - **Tracker**: a sliding bitmap per partition marks resolved offsets
//!   relative to the commit point and grows on demand.
//! - **Coordinator**: receives lifecycle notifications and decides commits
//!   synchronously, one lock around all trackers.
//! - **Committer**: an actor that performs commit I/O with one ordered lane
//!   per partition, so commits never regress on the wire.
//!
//! # Outcomes
//!
//! | Notification                     | Resolves | Attempts commit |
//! |----------------------------------|----------|-----------------|
//! | `successfully_sent_to_subscriber`| yes      | yes             |
//! | `successfully_sent_to_dlq`       | yes      | yes             |
//! | `failed_to_send_to_dlq`          | yes      | no              |
//! | `record_discarded`               | yes      | no              |
//!
//! # Example
//!
//! ```ignore
//! use relay_core::{ConsumerRecord, Offset, PartitionId, TopicPartition};
//! use relay_dispatch::{CommitCoordinator, DispatchConfig, SimulatedConsumer};
//!
//! let consumer = SimulatedConsumer::new(42);
//! let coordinator = CommitCoordinator::spawn(consumer, DispatchConfig::default(), None)?;
//!
//! let key = TopicPartition::new("orders", PartitionId::new(0));
//! let record = ConsumerRecord::at(&key, Offset::new(0), "payload");
//! coordinator.record_received(&record);
//!
//! if let Some(receipt) = coordinator.successfully_sent_to_subscriber(&record)? {
//!     assert!(receipt.wait().await.is_committed());
//! }
//! coordinator.close().await;
//! ```
//!
//! # Testing
//!
//! [`SimulatedConsumer`] provides deterministic commit fault injection for
//! DST testing:
//!
//! ```ignore
//! use relay_dispatch::{CommitFaultConfig, SimulatedConsumer};
//!
//! let consumer = SimulatedConsumer::with_faults(seed, CommitFaultConfig::flaky());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Allow these for cleaner code in this crate.
#![allow(clippy::module_name_repetitions)]

mod committer;
mod consumer;
mod coordinator;
mod error;
mod tracker;
mod types;

// Re-export public API.
pub use committer::{spawn_commit_actor, CommitActorHandle, CommitObserver, CommitReceipt};
pub use consumer::{CommitFaultConfig, PartitionConsumer, SimulatedConsumer};
pub use coordinator::CommitCoordinator;
pub use error::{DispatchError, DispatchResult};
pub use tracker::{Advance, OffsetTracker, Resolution, TrackerState};
pub use types::{
    CommitStatus, DispatchConfig, DispatchOutcome, DEFAULT_TRACKER_SHRINK_THRESHOLD_BLOCKS,
};

//! Commit coordinator for out-of-order dispatch.
//!
//! The `CommitCoordinator` turns per-record lifecycle notifications from the
//! dispatch pipeline into offset commits:
//! - `record_received` seeds a partition's tracker the first time the
//!   partition is seen (records arrive in offset order).
//! - Every record then gets exactly one terminal notification, in any
//!   order. Each one marks the offset resolved; successful deliveries also
//!   try to take a contiguous run out of the tracker and commit it.
//!
//! Trackers are reset as soon as a commit is decided, before the commit
//! I/O completes. A failed commit is not rolled back: the next commit for
//! that partition carries a later offset, which is safe for at-least-once
//! delivery.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relay_core::{ConsumerRecord, TopicPartition};
use tracing::{debug, error, info, warn};

use crate::committer::{spawn_commit_actor, CommitActorHandle, CommitObserver, CommitReceipt};
use crate::consumer::PartitionConsumer;
use crate::error::{DispatchError, DispatchResult};
use crate::tracker::{OffsetTracker, Resolution, TrackerState};
use crate::types::{DispatchConfig, DispatchOutcome};

// -----------------------------------------------------------------------------
// Commit Coordinator
// -----------------------------------------------------------------------------

/// Coordinates offset commits for every partition assigned to one consumer.
///
/// # Thread Safety
///
/// The coordinator is `Send + Sync` and can be shared across dispatch
/// tasks. One lock covers the tracker map, so resolving an offset, testing
/// contiguity and resetting happen as a single step. The lock is never held
/// across an await; commit I/O runs on the commit actor.
pub struct CommitCoordinator {
    /// Tracker per assigned partition.
    trackers: Mutex<HashMap<TopicPartition, OffsetTracker>>,
    /// Commit actor.
    commits: CommitActorHandle,
    /// Configuration.
    config: DispatchConfig,
}

impl CommitCoordinator {
    /// Creates a coordinator that issues commits through `commits`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn new(commits: CommitActorHandle, config: DispatchConfig) -> DispatchResult<Self> {
        config.validate()?;
        Ok(Self {
            trackers: Mutex::new(HashMap::new()),
            commits,
            config,
        })
    }

    /// Spawns a commit actor over `consumer` and creates a coordinator on it.
    ///
    /// `on_commit` receives the number of offsets folded into each
    /// successful commit. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn spawn<C: PartitionConsumer>(
        consumer: C,
        config: DispatchConfig,
        on_commit: Option<CommitObserver>,
    ) -> DispatchResult<Self> {
        Self::new(spawn_commit_actor(Arc::new(consumer), on_commit), config)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Lifecycle Notifications
    // -------------------------------------------------------------------------

    /// A record was pulled from its partition.
    ///
    /// Called in offset order per partition. Seeds the partition's tracker
    /// on first sight; has no effect afterwards.
    pub fn record_received(&self, record: &ConsumerRecord) {
        let mut trackers = self.lock_trackers();
        if let Entry::Vacant(entry) = trackers.entry(record.topic_partition()) {
            debug!(
                topic = %record.topic,
                partition = record.partition.get(),
                offset = record.offset.get(),
                "Tracking partition"
            );
            entry.insert(OffsetTracker::new(
                record.offset,
                self.config.tracker_shrink_threshold_blocks,
            ));
        }
    }

    /// The subscriber accepted the record.
    ///
    /// # Errors
    ///
    /// Returns `UntrackedPartition` if the partition was never seeded.
    pub fn successfully_sent_to_subscriber(
        &self,
        record: &ConsumerRecord,
    ) -> DispatchResult<Option<CommitReceipt>> {
        self.record_outcome(record, &DispatchOutcome::Delivered)
    }

    /// The dead-letter sink accepted the record.
    ///
    /// # Errors
    ///
    /// Returns `UntrackedPartition` if the partition was never seeded.
    pub fn successfully_sent_to_dlq(
        &self,
        record: &ConsumerRecord,
    ) -> DispatchResult<Option<CommitReceipt>> {
        self.record_outcome(record, &DispatchOutcome::DeadLettered)
    }

    /// The dead-letter sink rejected the record or was unreachable.
    ///
    /// The offset is still resolved, so a later commit passes over it.
    ///
    /// # Errors
    ///
    /// Returns `UntrackedPartition` if the partition was never seeded.
    pub fn failed_to_send_to_dlq(
        &self,
        record: &ConsumerRecord,
        cause: &dyn std::error::Error,
    ) -> DispatchResult<()> {
        let outcome = DispatchOutcome::DeadLetterFailed {
            cause: cause.to_string(),
        };
        self.record_outcome(record, &outcome).map(|receipt| {
            debug_assert!(receipt.is_none());
        })
    }

    /// The record did not pass the filter.
    ///
    /// # Errors
    ///
    /// Returns `UntrackedPartition` if the partition was never seeded.
    pub fn record_discarded(&self, record: &ConsumerRecord) -> DispatchResult<()> {
        self.record_outcome(record, &DispatchOutcome::Discarded)
            .map(|receipt| {
                debug_assert!(receipt.is_none());
            })
    }

    /// Applies the terminal outcome of one record.
    ///
    /// Returns a receipt when a contiguous run was committed.
    ///
    /// # Errors
    ///
    /// Returns `UntrackedPartition` if the partition was never seeded.
    pub fn record_outcome(
        &self,
        record: &ConsumerRecord,
        outcome: &DispatchOutcome,
    ) -> DispatchResult<Option<CommitReceipt>> {
        if let DispatchOutcome::DeadLetterFailed { cause } = outcome {
            warn!(
                topic = %record.topic,
                partition = record.partition.get(),
                offset = record.offset.get(),
                error = %cause,
                "Failed to send record to dead letter sink, resolving offset anyway"
            );
        }

        let partition = record.topic_partition();
        let mut trackers = self.lock_trackers();

        let Some(tracker) = trackers.get_mut(&partition) else {
            error!(
                topic = %record.topic,
                partition = record.partition.get(),
                offset = record.offset.get(),
                outcome = outcome.as_str(),
                "Terminal notification for untracked partition"
            );
            return Err(DispatchError::UntrackedPartition {
                partition,
                offset: record.offset,
            });
        };

        match tracker.record_resolved(record.offset) {
            Resolution::Marked => {}
            Resolution::Stale => {
                debug!(
                    topic = %record.topic,
                    partition = record.partition.get(),
                    offset = record.offset.get(),
                    commit_point = tracker.commit_point().get(),
                    "Ignoring resolution below commit point"
                );
                return Ok(None);
            }
            Resolution::Duplicate => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition.get(),
                    offset = record.offset.get(),
                    "Offset resolved twice"
                );
            }
        }

        if !outcome.attempts_commit() {
            return Ok(None);
        }

        let Some(advance) = tracker.try_advance() else {
            return Ok(None);
        };

        // Issued under the lock so the lane receives commits in decision order.
        let receipt = self.commits.commit(partition, advance);
        drop(trackers);

        debug!(
            topic = %record.topic,
            partition = record.partition.get(),
            offset = advance.offset.get(),
            count = advance.count,
            "Issued commit"
        );
        Ok(Some(receipt))
    }

    // -------------------------------------------------------------------------
    // Assignment
    // -------------------------------------------------------------------------

    /// Drops a partition's tracker after it was revoked.
    ///
    /// No commit is owed for unresolved offsets; already issued commits
    /// still complete. Returns false if the partition was not tracked.
    pub fn revoke_partition(&self, partition: &TopicPartition) -> bool {
        let removed = self.lock_trackers().remove(partition);
        let Some(tracker) = removed else {
            return false;
        };

        self.commits.revoke(partition.clone());
        info!(
            topic = %partition.topic,
            partition = partition.partition.get(),
            commit_point = tracker.commit_point().get(),
            "Revoked partition"
        );
        true
    }

    /// Drops every tracker. Returns the number of partitions revoked.
    pub fn revoke_all(&self) -> usize {
        let drained: Vec<TopicPartition> = self.lock_trackers().drain().map(|(k, _)| k).collect();
        for partition in &drained {
            self.commits.revoke(partition.clone());
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Revoked all partitions");
        }
        drained.len()
    }

    /// Stops tracking and waits for issued commits to complete.
    pub async fn close(&self) {
        let revoked = self.revoke_all();
        self.commits.shutdown().await;
        debug!(revoked = revoked, "Closed commit coordinator");
    }

    // -------------------------------------------------------------------------
    // Query Operations
    // -------------------------------------------------------------------------

    /// Lists the partitions currently tracked, sorted.
    #[must_use]
    pub fn tracked_partitions(&self) -> Vec<TopicPartition> {
        let mut partitions: Vec<TopicPartition> = self.lock_trackers().keys().cloned().collect();
        partitions.sort();
        partitions
    }

    /// Returns a snapshot of a partition's tracker.
    #[must_use]
    pub fn tracker_state(&self, partition: &TopicPartition) -> Option<TrackerState> {
        self.lock_trackers().get(partition).map(OffsetTracker::state)
    }

    fn lock_trackers(&self) -> MutexGuard<'_, HashMap<TopicPartition, OffsetTracker>> {
        self.trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

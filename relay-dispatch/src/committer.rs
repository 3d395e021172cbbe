//! Commit actor for message-passing based offset commits.
//!
//! The coordinator decides commits synchronously while it holds its tracker
//! lock, then hands them to the commit actor without waiting. The actor
//! owns one lane per partition:
//!
//! ```text
//!                          ┌─────────────┐   lane orders/0 ──► commit, commit, ...
//! CommitCoordinator ──────►│ CommitActor │── lane orders/1 ──► commit, ...
//!   (decides offsets)      └─────────────┘   lane audit/0  ──► commit, ...
//! ```
//!
//! Commits within a lane run one at a time in the order they were decided,
//! so a partition's committed offset never moves backwards on the wire.
//! Lanes run concurrently with each other.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use relay_core::{Offset, TopicPartition};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::consumer::PartitionConsumer;
use crate::tracker::Advance;
use crate::types::CommitStatus;

/// Observer invoked with the number of offsets folded into each successful
/// commit.
pub type CommitObserver = Arc<dyn Fn(u64) + Send + Sync>;

/// A decided commit travelling to its lane.
#[derive(Debug)]
struct CommitRequest {
    partition: TopicPartition,
    offset: Offset,
    count: u64,
    reply: oneshot::Sender<CommitStatus>,
}

/// Commands that can be sent to a `CommitActor`.
#[derive(Debug)]
enum CommitCommand {
    /// Commit an offset for a partition.
    Commit(CommitRequest),
    /// Close the partition's lane once it drains.
    Revoke {
        /// Partition whose lane is closed.
        partition: TopicPartition,
    },
    /// Close every lane, wait for in-flight commits, then acknowledge.
    Shutdown {
        /// Signalled once every lane has drained.
        reply: oneshot::Sender<()>,
    },
}

// -----------------------------------------------------------------------------
// Commit Receipt
// -----------------------------------------------------------------------------

/// Handle to one issued commit.
///
/// Dropping the receipt does not cancel the commit.
#[derive(Debug)]
pub struct CommitReceipt {
    partition: TopicPartition,
    offset: Offset,
    count: u64,
    rx: oneshot::Receiver<CommitStatus>,
}

impl CommitReceipt {
    /// Partition being committed.
    #[must_use]
    pub const fn partition(&self) -> &TopicPartition {
        &self.partition
    }

    /// Offset being committed (next offset to read).
    #[must_use]
    pub const fn offset(&self) -> Offset {
        self.offset
    }

    /// Number of offsets folded into this commit.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Waits for the commit to complete.
    ///
    /// Resolves to `Abandoned` if the commit path shut down first.
    pub async fn wait(self) -> CommitStatus {
        let offset = self.offset;
        self.rx
            .await
            .unwrap_or(CommitStatus::Abandoned { offset })
    }
}

// -----------------------------------------------------------------------------
// Commit Actor Handle
// -----------------------------------------------------------------------------

/// Handle for sending commands to a `CommitActor`.
#[derive(Debug, Clone)]
pub struct CommitActorHandle {
    tx: mpsc::UnboundedSender<CommitCommand>,
}

impl CommitActorHandle {
    /// Issues a commit without waiting for it.
    ///
    /// Commits issued for the same partition are executed in call order.
    pub fn commit(&self, partition: TopicPartition, advance: Advance) -> CommitReceipt {
        let (reply, rx) = oneshot::channel();
        let request = CommitRequest {
            partition: partition.clone(),
            offset: advance.offset,
            count: advance.count,
            reply,
        };

        // A closed actor drops the request; the receipt then reports Abandoned.
        let _ = self.tx.send(CommitCommand::Commit(request));

        CommitReceipt {
            partition,
            offset: advance.offset,
            count: advance.count,
            rx,
        }
    }

    /// Closes a partition's lane after its queued commits complete.
    pub fn revoke(&self, partition: TopicPartition) {
        let _ = self.tx.send(CommitCommand::Revoke { partition });
    }

    /// Shuts the actor down, returning once every queued commit completed.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(CommitCommand::Shutdown { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Returns true once the actor has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// -----------------------------------------------------------------------------
// Commit Actor
// -----------------------------------------------------------------------------

/// One partition's commit queue.
struct Lane {
    tx: mpsc::UnboundedSender<CommitRequest>,
    task: JoinHandle<()>,
}

/// Actor that executes decided commits against the partition consumer.
struct CommitActor<C: PartitionConsumer> {
    /// Command receiver.
    cmd_rx: mpsc::UnboundedReceiver<CommitCommand>,
    /// Partition consumer client.
    consumer: Arc<C>,
    /// Successful-commit observer.
    on_commit: Option<CommitObserver>,
    /// Open lanes.
    lanes: HashMap<TopicPartition, Lane>,
    /// Revoked lanes that may still be draining.
    retired: HashMap<TopicPartition, JoinHandle<()>>,
}

impl<C: PartitionConsumer> CommitActor<C> {
    fn new(
        cmd_rx: mpsc::UnboundedReceiver<CommitCommand>,
        consumer: Arc<C>,
        on_commit: Option<CommitObserver>,
    ) -> Self {
        Self {
            cmd_rx,
            consumer,
            on_commit,
            lanes: HashMap::new(),
            retired: HashMap::new(),
        }
    }

    /// Gets or opens the lane for a partition.
    fn lane_for(&mut self, partition: &TopicPartition) -> &Lane {
        self.lanes.entry(partition.clone()).or_insert_with(|| {
            // A reopened lane starts after the revoked one has drained.
            let predecessor = self.retired.remove(partition);
            let (tx, rx) = mpsc::unbounded_channel();
            let task = tokio::spawn(run_lane(
                partition.clone(),
                rx,
                predecessor,
                Arc::clone(&self.consumer),
                self.on_commit.clone(),
            ));
            Lane { tx, task }
        })
    }

    /// Hands a request to its partition's lane, replacing a lane that died.
    fn route(&mut self, request: CommitRequest) {
        let partition = request.partition.clone();
        let Err(mpsc::error::SendError(request)) = self.lane_for(&partition).tx.send(request)
        else {
            return;
        };

        // A lane only stops early if its task panicked; its queued receipts
        // already resolved as Abandoned.
        error!(
            topic = %partition.topic,
            partition = partition.partition.get(),
            offset = request.offset.get(),
            "Commit lane stopped unexpectedly, reopening"
        );
        self.lanes.remove(&partition);
        if self.lane_for(&partition).tx.send(request).is_err() {
            error!(
                topic = %partition.topic,
                partition = partition.partition.get(),
                "Reopened commit lane is not accepting requests"
            );
        }
    }

    /// Runs the actor message loop.
    async fn run(mut self) {
        debug!("CommitActor started");

        let mut reply = None;
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                CommitCommand::Commit(request) => self.route(request),
                CommitCommand::Revoke { partition } => {
                    self.retired.retain(|_, task| !task.is_finished());
                    if let Some(lane) = self.lanes.remove(&partition) {
                        debug!(partition = %partition, "Closed commit lane");
                        self.retired.insert(partition, lane.task);
                    }
                }
                CommitCommand::Shutdown { reply: done } => {
                    reply = Some(done);
                    break;
                }
            }
        }

        // Refuse further commands; queued receipts resolve as Abandoned.
        self.cmd_rx.close();

        let mut tasks: Vec<JoinHandle<()>> = self.retired.drain().map(|(_, task)| task).collect();
        tasks.extend(self.lanes.drain().map(|(_, lane)| lane.task));
        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "Commit lane ended abnormally");
            }
        }

        if let Some(done) = reply {
            let _ = done.send(());
        }
        debug!("CommitActor stopped");
    }
}

/// Executes one partition's commits in order.
async fn run_lane<C: PartitionConsumer>(
    partition: TopicPartition,
    mut rx: mpsc::UnboundedReceiver<CommitRequest>,
    predecessor: Option<JoinHandle<()>>,
    consumer: Arc<C>,
    on_commit: Option<CommitObserver>,
) {
    if let Some(previous) = predecessor {
        if let Err(err) = previous.await {
            error!(
                topic = %partition.topic,
                partition = partition.partition.get(),
                error = %err,
                "Revoked commit lane ended abnormally"
            );
        }
    }

    while let Some(request) = rx.recv().await {
        let status = match consumer.commit(&partition, request.offset).await {
            Ok(()) => {
                if let Some(observer) = &on_commit {
                    let count = request.count;
                    if panic::catch_unwind(AssertUnwindSafe(|| observer(count))).is_err() {
                        error!(
                            topic = %partition.topic,
                            partition = partition.partition.get(),
                            offset = request.offset.get(),
                            "Commit observer panicked"
                        );
                    }
                }
                debug!(
                    topic = %partition.topic,
                    partition = partition.partition.get(),
                    offset = request.offset.get(),
                    count = request.count,
                    "Committed offset"
                );
                CommitStatus::Committed {
                    offset: request.offset,
                    count: request.count,
                }
            }
            Err(err) => {
                error!(
                    topic = %partition.topic,
                    partition = partition.partition.get(),
                    offset = request.offset.get(),
                    error = %err,
                    "Failed to commit offset"
                );
                CommitStatus::Failed {
                    offset: request.offset,
                    reason: err.to_string(),
                }
            }
        };
        let _ = request.reply.send(status);
    }
}

/// Spawns a `CommitActor` and returns a handle to communicate with it.
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn spawn_commit_actor<C: PartitionConsumer>(
    consumer: Arc<C>,
    on_commit: Option<CommitObserver>,
) -> CommitActorHandle {
    let (tx, rx) = mpsc::unbounded_channel();

    let actor = CommitActor::new(rx, consumer, on_commit);
    tokio::spawn(actor.run());

    CommitActorHandle { tx }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use relay_core::PartitionId;

    use crate::consumer::{CommitFaultConfig, SimulatedConsumer};
    use crate::error::DispatchResult;

    /// Consumer client whose commit future panics for one offset.
    struct PanicsAt {
        inner: SimulatedConsumer,
        offset: Offset,
    }

    #[async_trait]
    impl PartitionConsumer for PanicsAt {
        async fn commit(&self, partition: &TopicPartition, offset: Offset) -> DispatchResult<()> {
            assert_ne!(offset, self.offset, "consumer client panicked");
            self.inner.commit(partition, offset).await
        }
    }

    fn key(partition: u32) -> TopicPartition {
        TopicPartition::new("orders", PartitionId::new(partition))
    }

    fn advance(offset: u64, count: u64) -> Advance {
        Advance {
            offset: Offset::new(offset),
            count,
        }
    }

    #[tokio::test]
    async fn test_commit_reports_status_and_observer() {
        let consumer = SimulatedConsumer::new(42);
        let observed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&observed);
        let handle = spawn_commit_actor(
            Arc::new(consumer.clone()),
            Some(Arc::new(move |count| {
                counter.fetch_add(count, Ordering::Relaxed);
            })),
        );

        let receipt = handle.commit(key(0), advance(3, 3));
        assert_eq!(receipt.offset(), Offset::new(3));
        assert_eq!(receipt.count(), 3);
        assert_eq!(receipt.partition(), &key(0));

        let status = receipt.wait().await;
        assert_eq!(
            status,
            CommitStatus::Committed {
                offset: Offset::new(3),
                count: 3
            }
        );
        assert_eq!(observed.load(Ordering::Relaxed), 3);
        assert_eq!(consumer.committed(&key(0)), Some(Offset::new(3)));
    }

    #[tokio::test]
    async fn test_failed_commit_skips_observer() {
        let consumer = SimulatedConsumer::new(42);
        consumer.fault_config().force_commit_fail = true;
        let observed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&observed);
        let handle = spawn_commit_actor(
            Arc::new(consumer.clone()),
            Some(Arc::new(move |count| {
                counter.fetch_add(count, Ordering::Relaxed);
            })),
        );

        let status = handle.commit(key(0), advance(1, 1)).wait().await;
        assert!(matches!(status, CommitStatus::Failed { offset, .. } if offset == Offset::new(1)));
        assert_eq!(observed.load(Ordering::Relaxed), 0);
        assert_eq!(consumer.committed(&key(0)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lane_preserves_commit_order() {
        let consumer = SimulatedConsumer::with_faults(
            42,
            CommitFaultConfig::none().with_commit_delay(Duration::from_millis(10)),
        );
        let handle = spawn_commit_actor(Arc::new(consumer.clone()), None);

        let receipts: Vec<CommitReceipt> = (1..=5)
            .map(|i| handle.commit(key(0), advance(i * 10, 10)))
            .collect();
        // Interleave a second partition.
        let other = handle.commit(key(1), advance(7, 7));

        for receipt in receipts {
            assert!(receipt.wait().await.is_committed());
        }
        assert!(other.wait().await.is_committed());

        let history: Vec<u64> = consumer
            .commit_history(&key(0))
            .into_iter()
            .map(Offset::get)
            .collect();
        assert_eq!(history, vec![10, 20, 30, 40, 50]);
        assert_eq!(consumer.committed(&key(1)), Some(Offset::new(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_in_flight_commits() {
        let consumer = SimulatedConsumer::with_faults(
            42,
            CommitFaultConfig::none().with_commit_delay(Duration::from_millis(100)),
        );
        let handle = spawn_commit_actor(Arc::new(consumer.clone()), None);

        let _dropped = handle.commit(key(0), advance(5, 5));
        let _also_dropped = handle.commit(key(1), advance(9, 9));
        handle.shutdown().await;

        assert_eq!(consumer.committed(&key(0)), Some(Offset::new(5)));
        assert_eq!(consumer.committed(&key(1)), Some(Offset::new(9)));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_commit_after_shutdown_is_abandoned() {
        let consumer = SimulatedConsumer::new(42);
        let handle = spawn_commit_actor(Arc::new(consumer.clone()), None);
        handle.shutdown().await;

        let status = handle.commit(key(0), advance(1, 1)).wait().await;
        assert_eq!(
            status,
            CommitStatus::Abandoned {
                offset: Offset::new(1)
            }
        );
        assert_eq!(consumer.total_commits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoked_lane_drains_and_reopens() {
        let consumer = SimulatedConsumer::with_faults(
            42,
            CommitFaultConfig::none().with_commit_delay(Duration::from_millis(50)),
        );
        let handle = spawn_commit_actor(Arc::new(consumer.clone()), None);

        let first = handle.commit(key(0), advance(4, 4));
        handle.revoke(key(0));
        // Reassigned immediately: the new lane waits for the old one.
        let second = handle.commit(key(0), advance(8, 4));

        assert!(second.wait().await.is_committed());
        assert!(first.wait().await.is_committed());
        assert_eq!(
            consumer.commit_history(&key(0)),
            vec![Offset::new(4), Offset::new(8)]
        );
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_stop_lane() {
        let consumer = SimulatedConsumer::new(42);
        let observed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&observed);
        let handle = spawn_commit_actor(
            Arc::new(consumer.clone()),
            Some(Arc::new(move |count| {
                assert_ne!(count, 1, "observer panicked");
                counter.fetch_add(count, Ordering::Relaxed);
            })),
        );

        let first = handle.commit(key(0), advance(1, 1)).wait().await;
        let second = handle.commit(key(0), advance(5, 4)).wait().await;
        let third = handle.commit(key(0), advance(9, 4)).wait().await;

        // The consumer stored the first commit, so it still reports Committed.
        assert_eq!(
            first,
            CommitStatus::Committed {
                offset: Offset::new(1),
                count: 1
            }
        );
        assert!(second.is_committed());
        assert!(third.is_committed());
        assert_eq!(observed.load(Ordering::Relaxed), 8);
        assert_eq!(
            consumer.commit_history(&key(0)),
            vec![Offset::new(1), Offset::new(5), Offset::new(9)]
        );
    }

    #[tokio::test]
    async fn test_dead_lane_is_reopened() {
        let consumer = SimulatedConsumer::new(42);
        let handle = spawn_commit_actor(
            Arc::new(PanicsAt {
                inner: consumer.clone(),
                offset: Offset::new(1),
            }),
            None,
        );

        let lost = handle.commit(key(0), advance(1, 1)).wait().await;
        assert_eq!(
            lost,
            CommitStatus::Abandoned {
                offset: Offset::new(1)
            }
        );

        let second = handle.commit(key(0), advance(5, 4)).wait().await;
        let third = handle.commit(key(0), advance(9, 4)).wait().await;
        assert!(second.is_committed());
        assert!(third.is_committed());
        assert_eq!(
            consumer.commit_history(&key(0)),
            vec![Offset::new(5), Offset::new(9)]
        );

        // Shutdown still drains cleanly after a lane was replaced.
        handle.shutdown().await;
        assert!(handle.is_closed());
    }
}

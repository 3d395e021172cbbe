//! Partition consumer client abstraction.
//!
//! Provides the `PartitionConsumer` trait the commit path writes offsets
//! through, and `SimulatedConsumer` for deterministic simulation testing.

#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{Offset, TopicPartition};

use crate::error::{DispatchError, DispatchResult};

// -----------------------------------------------------------------------------
// Partition Consumer Trait
// -----------------------------------------------------------------------------

/// The client that owns partition offsets on the messaging system.
///
/// The commit path only ever writes forward through this trait; it never
/// reads committed state back.
#[async_trait]
pub trait PartitionConsumer: Send + Sync + 'static {
    /// Commits `offset` as the next offset to read for `partition`.
    ///
    /// # Errors
    ///
    /// Returns `CommitFailed` if the messaging system rejected the commit.
    async fn commit(&self, partition: &TopicPartition, offset: Offset) -> DispatchResult<()>;
}

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated consumer.
#[derive(Debug, Clone, Default)]
pub struct CommitFaultConfig {
    /// Probability of a commit failing (0.0 - 1.0).
    pub commit_fail_rate: f64,
    /// Force next commit to fail (one-shot).
    pub force_commit_fail: bool,
    /// Latency added to every commit.
    pub commit_delay: Option<Duration>,
}

impl CommitFaultConfig {
    /// No faults (all commits succeed immediately).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            commit_fail_rate: 0.0,
            force_commit_fail: false,
            commit_delay: None,
        }
    }

    /// Flaky configuration for stress testing.
    #[must_use]
    pub const fn flaky() -> Self {
        Self {
            commit_fail_rate: 0.05,
            force_commit_fail: false,
            commit_delay: None,
        }
    }

    /// Builder: set commit fail rate.
    #[must_use]
    pub const fn with_commit_fail_rate(mut self, rate: f64) -> Self {
        self.commit_fail_rate = rate;
        self
    }

    /// Builder: set commit latency.
    #[must_use]
    pub const fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }
}

// -----------------------------------------------------------------------------
// Simulated Consumer
// -----------------------------------------------------------------------------

/// Per-partition commit log of the simulated consumer.
#[derive(Debug, Clone, Default)]
struct PartitionCommits {
    /// Latest committed offset.
    committed: Option<Offset>,
    /// Every successful commit in arrival order.
    history: Vec<Offset>,
    /// Number of rejected commits.
    failures: u64,
}

/// In-memory simulated partition consumer for DST.
///
/// Clones share state via `Arc` for multi-handle testing.
/// Supports deterministic fault injection for testing error paths.
#[derive(Debug, Clone)]
pub struct SimulatedConsumer {
    /// Commit state per partition.
    partitions: Arc<Mutex<HashMap<TopicPartition, PartitionCommits>>>,
    /// Fault configuration.
    fault_config: Arc<Mutex<CommitFaultConfig>>,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: Arc<AtomicU64>,
}

impl SimulatedConsumer {
    /// Creates a new simulated consumer with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, CommitFaultConfig::none())
    }

    /// Creates a simulated consumer with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: CommitFaultConfig) -> Self {
        Self {
            partitions: Arc::new(Mutex::new(HashMap::new())),
            fault_config: Arc::new(Mutex::new(config)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns fault config for modification.
    pub fn fault_config(&self) -> MutexGuard<'_, CommitFaultConfig> {
        self.fault_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest committed offset for a partition (bypasses faults).
    #[must_use]
    pub fn committed(&self, partition: &TopicPartition) -> Option<Offset> {
        self.lock_partitions()
            .get(partition)
            .and_then(|commits| commits.committed)
    }

    /// Every successful commit for a partition, in arrival order.
    #[must_use]
    pub fn commit_history(&self, partition: &TopicPartition) -> Vec<Offset> {
        self.lock_partitions()
            .get(partition)
            .map(|commits| commits.history.clone())
            .unwrap_or_default()
    }

    /// Number of rejected commits for a partition.
    #[must_use]
    pub fn failed_commits(&self, partition: &TopicPartition) -> u64 {
        self.lock_partitions()
            .get(partition)
            .map_or(0, |commits| commits.failures)
    }

    /// Total successful commits across all partitions.
    #[must_use]
    pub fn total_commits(&self) -> usize {
        self.lock_partitions()
            .values()
            .map(|commits| commits.history.len())
            .sum()
    }

    fn lock_partitions(&self) -> MutexGuard<'_, HashMap<TopicPartition, PartitionCommits>> {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Deterministic RNG.
    ///
    /// Uses `(seed + counter) * M` formula for reproducible fault injection.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    /// Decides whether the next commit fails, consuming a forced fault.
    fn next_commit_fails(&self) -> Option<&'static str> {
        let mut config = self.fault_config();
        if config.force_commit_fail {
            config.force_commit_fail = false;
            return Some("simulated failure (forced)");
        }
        let rate = config.commit_fail_rate;
        drop(config);

        self.should_inject_fault(rate)
            .then_some("simulated failure (random)")
    }
}

#[async_trait]
impl PartitionConsumer for SimulatedConsumer {
    async fn commit(&self, partition: &TopicPartition, offset: Offset) -> DispatchResult<()> {
        let delay = self.fault_config().commit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.next_commit_fails() {
            self.lock_partitions()
                .entry(partition.clone())
                .or_default()
                .failures += 1;
            return Err(DispatchError::CommitFailed {
                partition: partition.clone(),
                offset,
                message: message.into(),
            });
        }

        let mut partitions = self.lock_partitions();
        let commits = partitions.entry(partition.clone()).or_default();
        commits.committed = Some(offset);
        commits.history.push(offset);

        // Postcondition.
        assert_eq!(commits.committed, Some(offset));
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

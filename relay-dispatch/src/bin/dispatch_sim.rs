//! Relay dispatch simulation binary.
//!
//! Drives a `CommitCoordinator` with a randomized concurrent dispatch
//! pipeline over a simulated partition consumer, then reports what each
//! partition committed.
//!
//! ```bash
//! dispatch-sim --partitions 8 --records 50000 --seed 7 --max-delay-ms 3
//! ```
//!
//! With `--commit-fail-rate 0` (the default) the process exits non-zero if
//! any partition's committed offset, plus its resolved tail that no
//! success has committed yet, falls short of the records it read.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relay_core::{ConsumerRecord, Offset, PartitionId, TopicPartition};
use relay_dispatch::{
    CommitCoordinator, CommitFaultConfig, CommitObserver, CommitStatus, DispatchConfig,
    DispatchResult, SimulatedConsumer, TrackerState,
};
use tokio::task::JoinSet;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Relay dispatch commit simulation.
#[derive(Parser, Debug)]
#[command(name = "dispatch-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of partitions to consume.
    #[arg(long, default_value = "4")]
    partitions: u32,

    /// Records read from each partition.
    #[arg(long, default_value = "10000")]
    records: u64,

    /// Seed for outcomes, delays and commit faults.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Topic name.
    #[arg(long, default_value = "relay-sim")]
    topic: String,

    /// Probability that subscriber delivery fails and the record goes to
    /// the dead-letter sink.
    #[arg(long, default_value = "0.05", value_parser = parse_rate)]
    dead_letter_rate: f64,

    /// Probability that a dead-letter delivery fails too.
    #[arg(long, default_value = "0.2", value_parser = parse_rate)]
    dead_letter_fail_rate: f64,

    /// Probability that a record does not pass the filter.
    #[arg(long, default_value = "0.1", value_parser = parse_rate)]
    discard_rate: f64,

    /// Probability that a commit is rejected by the consumer.
    #[arg(long, default_value = "0.0", value_parser = parse_rate)]
    commit_fail_rate: f64,

    /// Upper bound of the random dispatch latency per record.
    #[arg(long, default_value = "2")]
    max_delay_ms: u64,

    /// Tracker bitmap blocks kept across a reset.
    #[arg(long, default_value = "128")]
    shrink_threshold: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

/// Parses a probability in `0.0..=1.0`.
fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s
        .parse()
        .map_err(|_| format!("invalid rate '{s}', expected a number"))?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("rate must be between 0 and 1, got {rate}"));
    }
    Ok(rate)
}

/// Error reported for records whose dead-letter delivery failed.
#[derive(Debug, thiserror::Error)]
#[error("dead letter sink unreachable (simulated)")]
struct SinkUnreachable;

/// What the simulated pipeline does with one record.
#[derive(Debug, Clone, Copy)]
enum Disposition {
    Deliver,
    DeadLetter,
    DeadLetterFail,
    Discard,
}

impl Disposition {
    fn draw(rng: &mut StdRng, args: &Args) -> Self {
        if rng.gen_bool(args.discard_rate) {
            Self::Discard
        } else if !rng.gen_bool(args.dead_letter_rate) {
            Self::Deliver
        } else if rng.gen_bool(args.dead_letter_fail_rate) {
            Self::DeadLetterFail
        } else {
            Self::DeadLetter
        }
    }
}

/// Reports the terminal outcome of one record and waits for its commit.
async fn dispatch(
    coordinator: &CommitCoordinator,
    record: &ConsumerRecord,
    disposition: Disposition,
) -> DispatchResult<Option<CommitStatus>> {
    let receipt = match disposition {
        Disposition::Deliver => coordinator.successfully_sent_to_subscriber(record)?,
        Disposition::DeadLetter => coordinator.successfully_sent_to_dlq(record)?,
        Disposition::DeadLetterFail => {
            coordinator.failed_to_send_to_dlq(record, &SinkUnreachable)?;
            None
        }
        Disposition::Discard => {
            coordinator.record_discarded(record)?;
            None
        }
    };

    match receipt {
        Some(receipt) => Ok(Some(receipt.wait().await)),
        None => Ok(None),
    }
}

/// Commit statuses seen by dispatch tasks.
#[derive(Debug, Default)]
struct Stats {
    committed: u64,
    failed: u64,
    abandoned: u64,
    errors: u64,
}

impl Stats {
    fn record(&mut self, status: &CommitStatus) {
        match status {
            CommitStatus::Committed { .. } => self.committed += 1,
            CommitStatus::Failed { .. } => self.failed += 1,
            CommitStatus::Abandoned { .. } => self.abandoned += 1,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging to stderr; the report goes to stdout.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        partitions = args.partitions,
        records = args.records,
        seed = args.seed,
        topic = %args.topic,
        commit_fail_rate = args.commit_fail_rate,
        shrink_threshold = args.shrink_threshold,
        "Starting dispatch simulation"
    );

    let consumer = SimulatedConsumer::with_faults(
        args.seed,
        CommitFaultConfig::none().with_commit_fail_rate(args.commit_fail_rate),
    );
    let folded = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&folded);
    let on_commit: CommitObserver = Arc::new(move |count| {
        counter.fetch_add(count, Ordering::Relaxed);
    });
    let config = DispatchConfig::new().with_tracker_shrink_threshold_blocks(args.shrink_threshold);
    let coordinator = Arc::new(CommitCoordinator::spawn(
        consumer.clone(),
        config,
        Some(on_commit),
    )?);

    let topic: Arc<str> = Arc::from(args.topic.as_str());
    let keys: Vec<TopicPartition> = (0..args.partitions)
        .map(|p| TopicPartition::new(Arc::clone(&topic), PartitionId::new(p)))
        .collect();

    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut tasks = JoinSet::new();

    // Partitions are polled round robin; each one is read in offset order.
    for offset in 0..args.records {
        for key in &keys {
            let record = ConsumerRecord::at(
                key,
                Offset::new(offset),
                Bytes::from(format!("event-{}-{offset}", key.partition)),
            );
            coordinator.record_received(&record);

            let disposition = Disposition::draw(&mut rng, &args);
            let delay = Duration::from_millis(rng.gen_range(0..=args.max_delay_ms));
            let coordinator = Arc::clone(&coordinator);
            tasks.spawn(async move {
                tokio::time::sleep(delay).await;
                dispatch(&coordinator, &record, disposition).await
            });
        }
    }

    let mut stats = Stats::default();
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(Some(status)) => stats.record(&status),
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "Dispatch notification rejected");
                stats.errors += 1;
            }
        }
    }

    let states: Vec<_> = keys
        .iter()
        .map(|key| (key, coordinator.tracker_state(key)))
        .collect();
    coordinator.close().await;

    let elapsed = started.elapsed();
    info!(
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        commits = stats.committed,
        failed_commits = stats.failed,
        abandoned_commits = stats.abandoned,
        "Simulation finished"
    );

    let mut shortfall = false;
    println!("partition\tcommitted\tuncommitted_tail\tcommits");
    for (key, state) in states {
        let committed = consumer.committed(key).map_or(0, Offset::get);
        let tail = state.as_ref().map_or(0, TrackerState::committable_run);
        println!(
            "{key}\t{committed}\t{tail}\t{}",
            consumer.commit_history(key).len()
        );
        if committed + tail != args.records {
            shortfall = true;
            warn!(
                topic = %key.topic,
                partition = key.partition.get(),
                committed = committed,
                tail = tail,
                records = args.records,
                "Partition did not commit every record"
            );
        }
    }
    println!(
        "records folded into commits: {}",
        folded.load(Ordering::Relaxed)
    );

    if stats.errors > 0 {
        return Err(format!("{} dispatch notifications were rejected", stats.errors).into());
    }
    if shortfall && args.commit_fail_rate <= 0.0 {
        return Err("committed offsets fell short without commit faults".into());
    }
    Ok(())
}

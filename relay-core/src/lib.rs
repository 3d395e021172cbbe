//! Relay Core - Strongly-typed offsets, partition keys and records.
//!
//! This crate provides the vocabulary shared by the Relay data plane. It
//! does NOT talk to Kafka or any subscriber - it only defines the values
//! that flow between the dispatch pipeline and the commit path.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: an `Offset` can't be passed where a
//!   `PartitionId` is expected
//! - **Explicit types**: use u32/u64, not usize
//! - **Cheap keys**: `TopicPartition` clones are reference-count bumps
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod record;
mod types;

pub use error::{Error, Result};
pub use record::{ConsumerRecord, Offset};
pub use types::{PartitionId, TopicPartition};

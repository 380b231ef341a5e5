//! # workpool
//!
//! Persistent, partitioned work-queue store on top of redb.
//!
//! Records move through named partitions (pending, in-progress, completed)
//! with atomic enqueue, dequeue-with-lease, cross-partition move, maintained
//! per-partition counts, and time-based reclamation of abandoned leases.
//! redb only offers atomic batches, so read-modify-write atomicity is built
//! in-process on a table of named FIFO locks.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
pub use model::{Disposition, NewWork, Partition, QueueStats, Record};
pub use queue::{Partitions, WorkQueue};
pub use store::PartitionStore;

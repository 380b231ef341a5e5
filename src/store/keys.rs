//! Storage key and lock name derivation.
//!
//! Layout of the single key space:
//!
//! ```text
//! <partition>:<id>          record
//! __count:<partition>       partition counter
//! __lock:queue:<partition>  dequeue lock name (never stored)
//! ```
//!
//! Partition names can neither contain `:` nor start with `__`, so a record
//! key can never equal a reserved key and the range `["<p>:", "<p>;")`
//! holds exactly the records of partition `p`.

use std::fmt;

use crate::model::Partition;

pub(crate) const SEPARATOR: char = ':';
/// The byte after `:`; exclusive upper bound for a partition scan.
const SEPARATOR_END: char = ';';
pub(crate) const RESERVED_PREFIX: &str = "__";

const COUNTER_PREFIX: &str = "__count:";
const QUEUE_LOCK_PREFIX: &str = "__lock:queue:";

pub fn record_key(partition: &Partition, id: &str) -> String {
    format!("{partition}{SEPARATOR}{id}")
}

pub fn counter_key(partition: &Partition) -> String {
    format!("{COUNTER_PREFIX}{partition}")
}

pub fn queue_lock_key(partition: &Partition) -> String {
    format!("{QUEUE_LOCK_PREFIX}{partition}")
}

/// Half-open key range `[start, end)` covering every record in `partition`.
pub fn partition_range(partition: &Partition) -> (String, String) {
    (
        format!("{partition}{SEPARATOR}"),
        format!("{partition}{SEPARATOR_END}"),
    )
}

/// Strip the partition prefix from a record key, yielding the id.
pub fn id_from_key<'a>(partition: &Partition, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(partition.as_str())?
        .strip_prefix(SEPARATOR)
}

/// Name of a lockable resource.
///
/// The derived `Ord` is the global acquisition order: every queue lock
/// sorts before every record lock, which sorts before every counter lock,
/// with ties broken by key. Any operation holding more than one lock must
/// take them in ascending order; this is what keeps two opposite-direction
/// moves (or a put racing a move) from deadlocking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Queue(String),
    Record(String),
    Counter(String),
}

impl LockKey {
    pub fn queue(partition: &Partition) -> Self {
        Self::Queue(queue_lock_key(partition))
    }

    pub fn record(partition: &Partition, id: &str) -> Self {
        Self::Record(record_key(partition, id))
    }

    pub fn counter(partition: &Partition) -> Self {
        Self::Counter(counter_key(partition))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Queue(_) => "queue",
            Self::Record(_) => "record",
            Self::Counter(_) => "counter",
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queue(k) | Self::Record(k) | Self::Counter(k) => f.write_str(k),
        }
    }
}

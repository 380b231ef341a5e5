//! Core data model.
//!
//! A record is one unit of queued work. It lives in exactly one partition
//! (a lifecycle stage such as "pending") and carries an opaque JSON payload
//! plus the time it was last written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Partition
// ---------------------------------------------------------------------------

/// Validated partition name.
///
/// Names are non-empty, contain no `:` and no control characters, and never
/// start with `__` (that prefix is reserved for counter and lock keys).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Partition(String);

impl Partition {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && !name.starts_with(crate::store::keys::RESERVED_PREFIX)
            && !name.contains(crate::store::keys::SEPARATOR)
            && !name.chars().any(char::is_control);
        if valid {
            Ok(Self(name))
        } else {
            Err(Error::InvalidPartition(name))
        }
    }

    /// For compile-time constants known to be valid.
    pub(crate) fn new_unchecked(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Partition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Partition {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Partition> for String {
    fn from(p: Partition) -> Self {
        p.0
    }
}

/// Check a record id: non-empty, no control characters.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.chars().any(char::is_control) {
        return Err(Error::InvalidId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A record as handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub partition: Partition,
    /// Caller-supplied value. The store never interprets it.
    pub payload: serde_json::Value,
    /// Time of the most recent write (put or move), not first insertion.
    pub created_at: DateTime<Utc>,
}

/// The value persisted under a record key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub payload: serde_json::Value,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl StoredRecord {
    pub(crate) fn into_record(self, partition: &Partition, id: impl Into<String>) -> Record {
        Record {
            id: id.into(),
            partition: partition.clone(),
            payload: self.payload,
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Operation options
// ---------------------------------------------------------------------------

/// What to do with a record taken off a partition by `shift` or `cleanup`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Disposition {
    /// Remove it from the store.
    #[default]
    Delete,
    /// Relocate it to another partition, keeping its id and payload.
    MoveTo(Partition),
}

impl Disposition {
    /// Short label used in logs and metric attributes.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::MoveTo(_) => "move",
        }
    }
}

// ---------------------------------------------------------------------------
// Work items (queue boundary)
// ---------------------------------------------------------------------------

/// A piece of work submitted to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWork {
    /// What kind of work this is. Interpreted only by workers.
    pub kind: String,
    /// Work parameters. Must be a JSON object.
    pub data: serde_json::Value,
}

impl NewWork {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Cardinality of each lifecycle partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
}

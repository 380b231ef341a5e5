//! Partitioned record store with per-partition counters.
//!
//! Records live under `<partition>:<id>`; each partition has a counter that
//! always equals its record count once no lock on that partition is held.
//! The embedded store only offers atomic batches, so every mutation that
//! touches a counter takes the relevant locks from a process-local
//! [`LockTable`], re-reads state under those locks, and writes the record
//! change and the counter change in one batch.
//!
//! Lock acquisition follows the order defined by [`keys::LockKey`].

pub mod cursor;
pub mod keys;
pub mod lock;
mod shift;
mod sweep;
mod write;

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;

use crate::clock::{Clock, SystemClock};
use crate::db::Db;
use crate::error::Result;
use crate::model::{Partition, Record, StoredRecord, validate_id};
use crate::telemetry::metrics;

pub use cursor::PartitionCursor;
pub use keys::LockKey;
pub use lock::{LockGuard, LockSet, LockTable};

/// The partition store. Cheap to clone; clones share the database, the
/// lock table and the clock.
#[derive(Clone)]
pub struct PartitionStore {
    db: Db,
    locks: LockTable<LockKey>,
    clock: Arc<dyn Clock>,
}

impl PartitionStore {
    pub fn new(db: Db) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    /// Build a store that stamps and ages records with `clock`.
    pub fn with_clock(db: Db, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            locks: LockTable::new(),
            clock,
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// The lock table guarding this store.
    pub fn locks(&self) -> &LockTable<LockKey> {
        &self.locks
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Get one record. Absent records are `None`.
    pub async fn get(&self, partition: &Partition, id: &str) -> Result<Option<Record>> {
        validate_id(id)?;
        let stored = self.read_stored(&keys::record_key(partition, id)).await?;
        Ok(stored.map(|s| s.into_record(partition, id)))
    }

    /// Get several records from one snapshot. Output order matches `ids`.
    pub async fn get_many(
        &self,
        partition: &Partition,
        ids: &[String],
    ) -> Result<Vec<Option<Record>>> {
        for id in ids {
            validate_id(id)?;
        }
        let raw = self
            .db
            .get_many(ids.iter().map(|id| keys::record_key(partition, id)).collect())
            .await?;
        ids.iter()
            .zip(raw)
            .map(|(id, bytes)| match bytes {
                Some(b) => Ok(Some(decode_record(&b)?.into_record(partition, id))),
                None => Ok(None),
            })
            .collect()
    }

    /// Maintained cardinality of `partition`. Zero if never written.
    pub async fn count(&self, partition: &Partition) -> Result<u64> {
        self.read_counter(&keys::counter_key(partition)).await
    }

    /// Every record of `partition`, in ascending id order.
    pub async fn find(&self, partition: &Partition) -> Result<Vec<Record>> {
        let (start, end) = keys::partition_range(partition);
        let entries = self.db.scan(start, end, None, None).await?;
        decode_entries(partition, entries)
    }

    /// A lazy, restartable walk over `partition` in ascending id order.
    pub fn cursor(&self, partition: &Partition) -> PartitionCursor {
        PartitionCursor::new(self.clone(), partition.clone())
    }

    /// Call `f` on every record of `partition`, in ascending id order.
    pub async fn for_each<F>(&self, partition: &Partition, mut f: F) -> Result<()>
    where
        F: FnMut(&Record),
    {
        let mut cursor = self.cursor(partition);
        while let Some(record) = cursor.next().await? {
            f(&record);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals shared by the operation modules
    // -----------------------------------------------------------------------

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    async fn read_stored(&self, key: &str) -> Result<Option<StoredRecord>> {
        match self.db.get(key).await? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn read_counter(&self, key: &str) -> Result<u64> {
        match self.db.get(key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(0),
        }
    }

    async fn lock(&self, key: LockKey) -> LockGuard<LockKey> {
        let kind = key.kind();
        let started = Instant::now();
        let guard = self.locks.acquire(key).await;
        record_lock_wait(kind, started);
        guard
    }

    async fn lock_all(&self, keys: Vec<LockKey>) -> LockSet<LockKey> {
        let started = Instant::now();
        let set = self.locks.acquire_many(keys).await;
        record_lock_wait("set", started);
        set
    }
}

fn record_lock_wait(kind: &'static str, started: Instant) {
    metrics::lock_wait_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("kind", kind)],
    );
}

fn decode_record(bytes: &[u8]) -> Result<StoredRecord> {
    Ok(serde_json::from_slice(bytes)?)
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode_entries(partition: &Partition, entries: Vec<(String, Vec<u8>)>) -> Result<Vec<Record>> {
    let mut out = Vec::with_capacity(entries.len());
    for (key, bytes) in entries {
        let Some(id) = keys::id_from_key(partition, &key) else {
            continue;
        };
        out.push(decode_record(&bytes)?.into_record(partition, id));
    }
    Ok(out)
}

//! Counter-consistent mutations: put, delete, move and their batch helpers.

use opentelemetry::KeyValue;
use tokio::task::JoinSet;
use tracing::debug;

use super::{PartitionStore, encode, keys};
use crate::db::WriteBatch;
use crate::error::{Error, Result};
use crate::model::{Partition, Record, StoredRecord, validate_id};
use crate::telemetry::metrics;

impl PartitionStore {
    /// Insert or overwrite a record.
    ///
    /// A new record bumps the partition counter in the same batch. An
    /// overwrite replaces the payload and refreshes `created_at`; the
    /// counter is left alone.
    pub async fn put(
        &self,
        partition: &Partition,
        id: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        validate_id(id)?;
        let key = keys::record_key(partition, id);
        let stored = StoredRecord {
            payload,
            created_at: self.now(),
        };
        let value = encode(&stored)?;

        let record_guard = self.lock(keys::LockKey::Record(key.clone())).await;
        // The record lock serializes every mutator of this id, so a plain
        // existence check is enough.
        let exists = self.db.get(&key).await?.is_some();

        let mut batch = WriteBatch::new();
        batch.put(key, value);
        let result = if exists {
            self.db.write(batch, record_guard).await?;
            "updated"
        } else {
            let counter_key = keys::counter_key(partition);
            let counter_guard = self.lock(keys::LockKey::Counter(counter_key.clone())).await;
            let count = self.read_counter(&counter_key).await?;
            batch.put(counter_key, encode(&(count + 1))?);
            // Tuple fields drop in order: counter first, then record.
            self.db.write(batch, (counter_guard, record_guard)).await?;
            "created"
        };

        metrics::records_written().add(
            1,
            &[
                KeyValue::new("partition", partition.to_string()),
                KeyValue::new("result", result),
            ],
        );
        Ok(())
    }

    /// Remove a record. Returns `false` if there was nothing to remove.
    pub async fn delete(&self, partition: &Partition, id: &str) -> Result<bool> {
        validate_id(id)?;
        let removed = self.delete_unchecked(partition, id).await?;
        if removed {
            metrics::records_removed().add(
                1,
                &[
                    KeyValue::new("partition", partition.to_string()),
                    KeyValue::new("reason", "delete"),
                ],
            );
        }
        Ok(removed)
    }

    /// Delete without metrics; shared with shift and cleanup, which label
    /// the removal themselves.
    pub(super) async fn delete_unchecked(&self, partition: &Partition, id: &str) -> Result<bool> {
        let key = keys::record_key(partition, id);
        let record_guard = self.lock(keys::LockKey::Record(key.clone())).await;
        if self.db.get(&key).await?.is_none() {
            return Ok(false);
        }

        let counter_key = keys::counter_key(partition);
        let counter_guard = self.lock(keys::LockKey::Counter(counter_key.clone())).await;
        let count = self.read_counter(&counter_key).await?;

        let mut batch = WriteBatch::new();
        batch
            .delete(key)
            .put(counter_key, encode(&count.saturating_sub(1))?);
        self.db.write(batch, (counter_guard, record_guard)).await?;
        Ok(true)
    }

    /// Relocate a record from `source` to `dest`, keeping its id and payload
    /// and refreshing `created_at`.
    ///
    /// Returns `false` when `source == dest` or the source record is absent.
    /// If `dest` already holds a record with this id it is overwritten and
    /// the destination counter is not incremented.
    pub async fn move_record(&self, source: &Partition, id: &str, dest: &Partition) -> Result<bool> {
        validate_id(id)?;
        if source == dest {
            return Ok(false);
        }

        let source_key = keys::record_key(source, id);
        let dest_key = keys::record_key(dest, id);
        let source_counter = keys::counter_key(source);
        let dest_counter = keys::counter_key(dest);

        let held = self
            .lock_all(vec![
                keys::LockKey::Record(source_key.clone()),
                keys::LockKey::Record(dest_key.clone()),
                keys::LockKey::Counter(source_counter.clone()),
                keys::LockKey::Counter(dest_counter.clone()),
            ])
            .await;

        let mut current = self
            .db
            .get_many(vec![
                source_key.clone(),
                dest_key.clone(),
                source_counter.clone(),
                dest_counter.clone(),
            ])
            .await?
            .into_iter();
        let (Some(source_value), dest_value, source_count, dest_count) = (
            current.next().flatten(),
            current.next().flatten(),
            current.next().flatten(),
            current.next().flatten(),
        ) else {
            return Ok(false);
        };

        let mut moved: StoredRecord = serde_json::from_slice(&source_value)?;
        moved.created_at = self.now();
        let source_count: u64 = decode_count(source_count)?;
        let dest_count: u64 = decode_count(dest_count)?;

        let mut batch = WriteBatch::new();
        batch
            .delete(source_key)
            .put(dest_key, encode(&moved)?)
            .put(source_counter, encode(&source_count.saturating_sub(1))?);
        if dest_value.is_none() {
            batch.put(dest_counter, encode(&(dest_count + 1))?);
        }
        self.db.write(batch, held).await?;

        debug!(%source, %dest, id, "record moved");
        metrics::records_moved().add(
            1,
            &[
                KeyValue::new("from", source.to_string()),
                KeyValue::new("to", dest.to_string()),
            ],
        );
        Ok(true)
    }

    /// Put several records, one at a time. Not atomic across records.
    pub async fn put_many<I>(&self, partition: &Partition, items: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        for (id, payload) in items {
            self.put(partition, &id, payload).await?;
        }
        Ok(())
    }

    /// Delete several records, one at a time. Returns how many existed.
    pub async fn delete_many(&self, partition: &Partition, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            if self.delete(partition, id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Read a record and then delete it. Returns what was read.
    pub async fn get_and_delete(&self, partition: &Partition, id: &str) -> Result<Option<Record>> {
        let record = self.get(partition, id).await?;
        if record.is_some() {
            self.delete(partition, id).await?;
        }
        Ok(record)
    }

    /// [`get_and_delete`](Self::get_and_delete) for each id, concurrently.
    /// Output order matches `ids`.
    pub async fn get_and_delete_many(
        &self,
        partition: &Partition,
        ids: &[String],
    ) -> Result<Vec<Option<Record>>> {
        let mut tasks = JoinSet::new();
        for (index, id) in ids.iter().cloned().enumerate() {
            let store = self.clone();
            let partition = partition.clone();
            tasks.spawn(async move { (index, store.get_and_delete(&partition, &id).await) });
        }

        let mut out = vec![None; ids.len()];
        let mut first_error: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined?;
            match result {
                Ok(record) => out[index] = record,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}

fn decode_count(bytes: Option<Vec<u8>>) -> Result<u64> {
    match bytes {
        Some(b) => Ok(serde_json::from_slice(&b)?),
        None => Ok(0),
    }
}

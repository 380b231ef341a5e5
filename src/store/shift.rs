//! Dequeue: take the first records of a partition off the front.
//!
//! "First" is ascending key order, i.e. lexicographic order of ids. Ids
//! issued by [`crate::queue::WorkQueue`] sort by admission time, but the
//! store itself makes no ordering promise beyond key order.

use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{Instrument, debug};

use super::{PartitionStore, decode_entries, keys};
use crate::error::{Error, Result};
use crate::model::{Disposition, Partition, Record};
use crate::telemetry::{metrics, store as spans};

impl PartitionStore {
    /// Take one record off `partition`. `None` when the partition is empty.
    pub async fn shift(
        &self,
        partition: &Partition,
        disposition: &Disposition,
    ) -> Result<Option<Record>> {
        Ok(self
            .shift_many(partition, 1, disposition)
            .await?
            .into_iter()
            .next())
    }

    /// Take up to `count` records off `partition`, deleting each or moving
    /// it according to `disposition`.
    ///
    /// Concurrent shifts on one partition are serialized by the partition's
    /// queue lock, so they never hand out the same record. Returns the
    /// records as they were before removal, in key order. A `count` of zero
    /// yields an empty result.
    pub async fn shift_many(
        &self,
        partition: &Partition,
        count: usize,
        disposition: &Disposition,
    ) -> Result<Vec<Record>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if let Disposition::MoveTo(dest) = disposition
            && dest == partition
        {
            return Err(Error::Validation(format!(
                "cannot shift {partition} into itself"
            )));
        }

        let span = spans::start_op_span("shift", partition.as_str());
        let started = Instant::now();
        let taken = self
            .shift_locked(partition, count, disposition)
            .instrument(span.clone())
            .await?;
        spans::record_affected(&span, taken.len());

        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "shift")],
        );
        Ok(taken)
    }

    async fn shift_locked(
        &self,
        partition: &Partition,
        count: usize,
        disposition: &Disposition,
    ) -> Result<Vec<Record>> {
        let _queue = self.lock(keys::LockKey::queue(partition)).await;

        let (start, end) = keys::partition_range(partition);
        let entries = self.db.scan(start, end, None, Some(count)).await?;
        let candidates = decode_entries(partition, entries)?;

        let mut taken = Vec::with_capacity(candidates.len());
        for record in candidates {
            // The queue lock only excludes other shifts; a direct delete or
            // a reclamation sweep may have removed this id since the scan.
            let removed = match disposition {
                Disposition::Delete => self.delete_unchecked(partition, &record.id).await?,
                Disposition::MoveTo(dest) => {
                    self.move_record(partition, &record.id, dest).await?
                }
            };
            if removed {
                taken.push(record);
            } else {
                debug!(%partition, id = %record.id, "record vanished before shift");
            }
        }

        if matches!(disposition, Disposition::Delete) && !taken.is_empty() {
            metrics::records_removed().add(
                taken.len() as u64,
                &[
                    KeyValue::new("partition", partition.to_string()),
                    KeyValue::new("reason", "shift"),
                ],
            );
        }
        Ok(taken)
    }
}

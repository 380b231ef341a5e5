//! Time-based reclamation of records that have sat in a partition too long.

use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, debug, info};

use super::PartitionStore;
use crate::error::{Error, Result};
use crate::model::{Disposition, Partition};
use crate::telemetry::{metrics, store as spans};

impl PartitionStore {
    /// Delete or relocate every record of `partition` whose `created_at` is
    /// more than `max_age` in the past.
    ///
    /// The scan takes no locks. Each stale id is then handed to the regular
    /// delete/move path, which is a no-op for ids removed in the meantime,
    /// so the returned number (ids found stale) can exceed the number
    /// actually reclaimed. Treat it as advisory.
    pub async fn cleanup(
        &self,
        partition: &Partition,
        max_age: Duration,
        disposition: &Disposition,
    ) -> Result<usize> {
        if let Disposition::MoveTo(dest) = disposition
            && dest == partition
        {
            return Err(Error::Validation(format!(
                "cannot reclaim {partition} into itself"
            )));
        }

        let span = spans::start_op_span("cleanup", partition.as_str());
        let started = Instant::now();
        let stale = self
            .sweep(partition, max_age, disposition)
            .instrument(span.clone())
            .await?;
        spans::record_affected(&span, stale);

        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "cleanup")],
        );
        Ok(stale)
    }

    async fn sweep(
        &self,
        partition: &Partition,
        max_age: Duration,
        disposition: &Disposition,
    ) -> Result<usize> {
        let now = self.now();
        let mut stale = Vec::new();
        let mut cursor = self.cursor(partition);
        while let Some(record) = cursor.next().await? {
            // A negative age (clock moved backwards) is never stale.
            let expired = (now - record.created_at)
                .to_std()
                .is_ok_and(|age| age > max_age);
            if expired {
                stale.push(record.id);
            }
        }
        if stale.is_empty() {
            return Ok(0);
        }

        let mut reclaimed = 0u64;
        for id in &stale {
            let done = match disposition {
                Disposition::Delete => self.delete_unchecked(partition, id).await?,
                Disposition::MoveTo(dest) => self.move_record(partition, id, dest).await?,
            };
            if done {
                reclaimed += 1;
            } else {
                debug!(%partition, id, "stale record already gone");
            }
        }

        info!(
            %partition,
            found = stale.len(),
            reclaimed,
            action = disposition.label(),
            "reclaimed stale records"
        );
        let labels = [
            KeyValue::new("partition", partition.to_string()),
            KeyValue::new("action", disposition.label()),
        ];
        metrics::records_reclaimed().add(reclaimed, &labels);
        if matches!(disposition, Disposition::Delete) {
            metrics::records_removed().add(
                reclaimed,
                &[
                    KeyValue::new("partition", partition.to_string()),
                    KeyValue::new("reason", "cleanup"),
                ],
            );
        }
        Ok(stale.len())
    }
}

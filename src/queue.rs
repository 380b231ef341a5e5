//! Work queue built on three lifecycle partitions.
//!
//! Work enters `pending`, is leased into `in-progress`, and is retired into
//! `completed` with its result. A [`Reclaimer`](crate::engine::Reclaimer)
//! returns stale leases to `pending` and expires old results.

use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::engine::ReclaimPolicy;
use crate::error::{Error, Result};
use crate::model::{Disposition, NewWork, Partition, QueueStats, Record};
use crate::store::PartitionStore;

/// Names of the three lifecycle partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitions {
    pub pending: Partition,
    pub in_progress: Partition,
    pub completed: Partition,
}

impl Partitions {
    pub fn new(pending: Partition, in_progress: Partition, completed: Partition) -> Result<Self> {
        if pending == in_progress || pending == completed || in_progress == completed {
            return Err(Error::Config(
                "pending, in-progress and completed partitions must be distinct".to_string(),
            ));
        }
        Ok(Self {
            pending,
            in_progress,
            completed,
        })
    }
}

impl Default for Partitions {
    fn default() -> Self {
        Self {
            pending: Partition::new_unchecked("pending"),
            in_progress: Partition::new_unchecked("in-progress"),
            completed: Partition::new_unchecked("completed"),
        }
    }
}

/// Generate a record id: 13-digit unix millis followed by 8 random hex
/// digits. Ids sort by admission millisecond.
pub fn new_work_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0);
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{millis:013}{}", &random[..8])
}

/// The queue facade. Cheap to clone.
#[derive(Clone)]
pub struct WorkQueue {
    store: PartitionStore,
    partitions: Partitions,
}

impl WorkQueue {
    pub fn new(store: PartitionStore, partitions: Partitions) -> Self {
        Self { store, partitions }
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    pub fn partitions(&self) -> &Partitions {
        &self.partitions
    }

    /// Add work to `pending`. Returns the generated ids in input order.
    pub async fn enqueue(&self, items: Vec<NewWork>) -> Result<Vec<String>> {
        if items.is_empty() {
            return Err(Error::Validation("at least one work item is required".to_string()));
        }
        for item in &items {
            if item.kind.is_empty() {
                return Err(Error::Validation("work kind must not be empty".to_string()));
            }
            if !item.data.is_object() {
                return Err(Error::Validation(format!(
                    "work data for kind {:?} must be a JSON object",
                    item.kind
                )));
            }
        }

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = new_work_id();
            let payload = json!({ "kind": item.kind, "data": item.data });
            self.store.put(&self.partitions.pending, &id, payload).await?;
            ids.push(id);
        }
        info!(count = ids.len(), "work enqueued");
        Ok(ids)
    }

    /// Lease up to `count` pending items, moving them to `in-progress`.
    pub async fn lease(&self, count: usize) -> Result<Vec<Record>> {
        let leased = self
            .store
            .shift_many(
                &self.partitions.pending,
                count,
                &Disposition::MoveTo(self.partitions.in_progress.clone()),
            )
            .await?;
        if !leased.is_empty() {
            info!(count = leased.len(), "work leased");
        }
        Ok(leased)
    }

    /// Retire leased work: drop each id from `in-progress` and store its
    /// result under the same id in `completed`.
    pub async fn complete(&self, results: Vec<(String, serde_json::Value)>) -> Result<()> {
        if results.is_empty() {
            return Err(Error::Validation("at least one result is required".to_string()));
        }
        for (id, result) in &results {
            if !result.is_object() {
                return Err(Error::Validation(format!(
                    "result for {id} must be a JSON object"
                )));
            }
        }

        let count = results.len();
        for (id, result) in results {
            self.store.delete(&self.partitions.in_progress, &id).await?;
            self.store
                .put(&self.partitions.completed, &id, result)
                .await?;
        }
        info!(count, "work completed");
        Ok(())
    }

    /// Look up one completed result.
    pub async fn inspect(&self, id: &str) -> Result<Option<Record>> {
        self.store.get(&self.partitions.completed, id).await
    }

    /// Look up several completed results; absent ids yield `None`.
    pub async fn inspect_many(&self, ids: &[String]) -> Result<Vec<Option<Record>>> {
        if ids.is_empty() {
            return Err(Error::Validation("at least one id is required".to_string()));
        }
        self.store.get_many(&self.partitions.completed, ids).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self.store.count(&self.partitions.pending).await?,
            in_progress: self.store.count(&self.partitions.in_progress).await?,
            completed: self.store.count(&self.partitions.completed).await?,
        })
    }

    /// Reclamation policies for this queue: stale leases go back to
    /// `pending`, stale results are dropped.
    pub fn reclaim_policies(&self, max_age: Duration) -> Vec<ReclaimPolicy> {
        vec![
            ReclaimPolicy {
                partition: self.partitions.in_progress.clone(),
                max_age,
                disposition: Disposition::MoveTo(self.partitions.pending.clone()),
            },
            ReclaimPolicy {
                partition: self.partitions.completed.clone(),
                max_age,
                disposition: Disposition::Delete,
            },
        ]
    }
}

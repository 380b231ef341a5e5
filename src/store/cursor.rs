//! Lazy, restartable iteration over one partition.

use std::collections::VecDeque;

use super::{PartitionStore, decode_entries, keys};
use crate::error::Result;
use crate::model::{Partition, Record};

const DEFAULT_PAGE_SIZE: usize = 256;

/// Walks a partition in ascending key order, one page at a time.
///
/// The walk ends at the greatest key present when the first page is read,
/// so it is finite even while records keep arriving. Each page is read from
/// a fresh snapshot starting after the last key returned: records deleted
/// ahead of the cursor are skipped, records inserted ahead of it but below
/// the end key are seen. It never yields a key twice.
pub struct PartitionCursor {
    store: PartitionStore,
    partition: Partition,
    page_size: usize,
    last_key: Option<String>,
    /// Inclusive end of the walk, fixed by the first fill.
    end_key: Option<String>,
    buffer: VecDeque<Record>,
    started: bool,
    exhausted: bool,
}

impl PartitionCursor {
    pub(super) fn new(store: PartitionStore, partition: Partition) -> Self {
        Self {
            store,
            partition,
            page_size: DEFAULT_PAGE_SIZE,
            last_key: None,
            end_key: None,
            buffer: VecDeque::new(),
            started: false,
            exhausted: false,
        }
    }

    /// Use pages of `size` records (at least one).
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// The next record, or `None` once the partition is exhausted.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Start again from the first key. The end key is taken afresh.
    pub fn rewind(&mut self) {
        self.last_key = None;
        self.end_key = None;
        self.buffer.clear();
        self.started = false;
        self.exhausted = false;
    }

    async fn fill(&mut self) -> Result<()> {
        let (start, end) = keys::partition_range(&self.partition);
        if !self.started {
            self.end_key = self.store.db.last_key(start.clone(), end.clone()).await?;
            self.started = true;
        }
        let Some(end_key) = self.end_key.clone() else {
            self.exhausted = true;
            return Ok(());
        };

        let mut entries = self
            .store
            .db
            .scan(start, end, self.last_key.clone(), Some(self.page_size))
            .await?;
        if entries.len() < self.page_size {
            self.exhausted = true;
        }
        entries.retain(|(key, _)| *key <= end_key);
        if entries.last().is_none_or(|(key, _)| *key == end_key) {
            self.exhausted = true;
        }
        if let Some((key, _)) = entries.last() {
            self.last_key = Some(key.clone());
        }
        self.buffer = decode_entries(&self.partition, entries)?.into();
        Ok(())
    }
}

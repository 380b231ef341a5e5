//! Embedded key-value store handle.
//!
//! Thin adapter over a single redb table of `&str -> &[u8]`. redb gives us
//! ordered iteration and atomic write transactions but nothing higher level;
//! all counter bookkeeping and locking lives in [`crate::store`].
//!
//! Every call runs on the blocking pool, so each store access is a
//! suspension point for the calling task.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use redb::backends::InMemoryBackend;
use redb::{Database, TableDefinition};
use tracing::debug;

use crate::error::Result;

/// Single table holding records and counters. Key: see `store::keys`.
const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

/// An ordered list of mutations applied in one write transaction.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value,
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Database handle. Cheap to clone; all clones share one redb instance.
#[derive(Clone)]
pub struct Db {
    inner: Arc<Database>,
}

impl Db {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(redb::Error::from)?;
        let this = Self::init(db)?;
        debug!(path = %path.display(), "opened store");
        Ok(this)
    }

    /// Create a database that lives only in memory (for testing).
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(redb::Error::from)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        // Create the table eagerly so read transactions never see it missing.
        let create = || -> std::result::Result<(), redb::Error> {
            let wtx = db.begin_write()?;
            wtx.open_table(ENTRIES)?;
            wtx.commit()?;
            Ok(())
        };
        create()?;
        Ok(Self {
            inner: Arc::new(db),
        })
    }

    /// Read one value. A missing key is `None`, never an error.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.blocking(move |db| {
            let rtx = db.begin_read()?;
            let table = rtx.open_table(ENTRIES)?;
            Ok(table.get(key.as_str())?.map(|v| v.value().to_vec()))
        })
        .await
    }

    /// Read several values from one snapshot, preserving input order.
    pub async fn get_many(&self, keys: Vec<String>) -> Result<Vec<Option<Vec<u8>>>> {
        self.blocking(move |db| {
            let rtx = db.begin_read()?;
            let table = rtx.open_table(ENTRIES)?;
            let mut out = Vec::with_capacity(keys.len());
            for key in &keys {
                out.push(table.get(key.as_str())?.map(|v| v.value().to_vec()));
            }
            Ok(out)
        })
        .await
    }

    /// Apply `batch` atomically.
    ///
    /// `held` is dropped only after the transaction has committed or
    /// aborted, even if the calling future is dropped first. Callers pass
    /// their lock guards here so a lock is never released while the write
    /// it protects is still in flight.
    pub async fn write<H>(&self, batch: WriteBatch, held: H) -> Result<()>
    where
        H: Send + 'static,
    {
        if batch.is_empty() {
            return Ok(());
        }
        self.blocking(move |db| {
            let _held = held;
            let wtx = db.begin_write()?;
            {
                let mut table = wtx.open_table(ENTRIES)?;
                for op in &batch.ops {
                    match op {
                        BatchOp::Put { key, value } => {
                            table.insert(key.as_str(), value.as_slice())?;
                        }
                        BatchOp::Delete { key } => {
                            table.remove(key.as_str())?;
                        }
                    }
                }
            }
            // An early return above drops `wtx`, which aborts the transaction.
            wtx.commit()?;
            Ok(())
        })
        .await
    }

    /// Scan keys in `[start, end)` in ascending order, optionally starting
    /// strictly after `after`, returning at most `limit` entries.
    pub async fn scan(
        &self,
        start: String,
        end: String,
        after: Option<String>,
        limit: Option<usize>,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        self.blocking(move |db| {
            let rtx = db.begin_read()?;
            let table = rtx.open_table(ENTRIES)?;
            let lower = match after.as_deref() {
                Some(a) if a >= start.as_str() => Bound::Excluded(a),
                _ => Bound::Included(start.as_str()),
            };
            let limit = limit.unwrap_or(usize::MAX);
            let mut out = Vec::new();
            for entry in table.range::<&str>((lower, Bound::Excluded(end.as_str())))? {
                if out.len() >= limit {
                    break;
                }
                let (k, v) = entry?;
                out.push((k.value().to_string(), v.value().to_vec()));
            }
            Ok(out)
        })
        .await
    }

    /// The greatest key in `[start, end)`, if any.
    pub async fn last_key(&self, start: String, end: String) -> Result<Option<String>> {
        self.blocking(move |db| {
            let rtx = db.begin_read()?;
            let table = rtx.open_table(ENTRIES)?;
            let mut range = table.range::<&str>(start.as_str()..end.as_str())?;
            let last = match range.next_back() {
                Some(entry) => Some(entry?.0.value().to_string()),
                None => None,
            };
            Ok(last)
        })
        .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> std::result::Result<T, redb::Error> + Send + 'static,
    {
        let db = Arc::clone(&self.inner);
        let out = tokio::task::spawn_blocking(move || f(&db)).await??;
        Ok(out)
    }
}

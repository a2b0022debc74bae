use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use bytes::Bytes;
use ramjet_core::{Bucket, CacheKey, CachedResponse};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError};
use tokio::task;
use tracing::debug;

use crate::StoreError;

/// Expired entries are deleted in groups of this size, one write transaction
/// per group, so the sweep never monopolizes the single writer.
const SWEEP_BATCH: usize = 1_000;

/// Visitor verdict for [`Store::scan`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanAction {
    /// Leave the entry in place.
    Keep,
    /// Queue the entry for batched deletion.
    Delete,
}

fn table_def(bucket: &Bucket) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(bucket.as_str())
}

/// Open database handles, one per canonical path.
///
/// Opening the same path twice from one process must hand back the same
/// underlying database: the engine takes an exclusive file lock, and two
/// directors pointed at one file are expected to share it. The registry
/// holds `Weak` so the file is released once the last handle drops.
fn registry() -> &'static Mutex<HashMap<PathBuf, Weak<Database>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Weak<Database>>>> = OnceLock::new();
    REGISTRY.get_or_init(Default::default)
}

/// Persistent store for packed response records, keyed by `(bucket, key)`.
///
/// A thin layer over a single-file [`redb`] database: buckets map to named
/// tables, writes are atomic transactions, and reads see a consistent
/// snapshot. Blocking engine calls run on the blocking thread pool.
///
/// Cloning is cheap — clones share the same underlying database.
///
/// ```no_run
/// use ramjet_core::{Bucket, CacheKey};
/// use ramjet_store::Store;
///
/// # async fn open() -> Result<(), ramjet_store::StoreError> {
/// let store = Store::open("/var/cache/ramjet.db")?;
/// let bucket = Bucket::new("default");
/// store.create_bucket(&bucket)?;
/// let cached = store.get(&bucket, &CacheKey::from("GET /")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Creates or opens the single-file database at `path`.
    ///
    /// Idempotent per path within one process: a second `open` of the same
    /// path returns a handle to the same database instead of fighting over
    /// the engine's exclusive file lock.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let canonical = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        let mut open_dbs = registry().lock().unwrap_or_else(PoisonError::into_inner);
        open_dbs.retain(|_, db| db.strong_count() > 0);
        if let Some(db) = open_dbs.get(&canonical).and_then(Weak::upgrade) {
            return Ok(Store { db });
        }

        let db = Arc::new(Database::create(path)?);
        debug!(path = %canonical.display(), "opened store");
        open_dbs.insert(canonical, Arc::downgrade(&db));
        Ok(Store { db })
    }

    /// Creates a bucket. Idempotent.
    pub fn create_bucket(&self, bucket: &Bucket) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        txn.open_table(table_def(bucket))?;
        txn.commit()?;
        Ok(())
    }

    /// Writes a record atomically.
    ///
    /// A concurrent reader sees either the full prior value or the full new
    /// one, never a tear.
    pub async fn put(
        &self,
        bucket: &Bucket,
        key: &CacheKey,
        value: Bytes,
    ) -> Result<(), StoreError> {
        let db = self.db.clone();
        let bucket = bucket.clone();
        let key = key.clone();
        task::spawn_blocking(move || {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(table_def(&bucket))?;
                table.insert(key.as_bytes(), value.as_ref())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await?
    }

    /// Reads a record, or `None` when absent.
    ///
    /// The engine's borrowed view is only valid inside the read transaction;
    /// the value is copied out before the transaction ends, which is what
    /// makes the returned bytes safe to retain.
    pub async fn get(&self, bucket: &Bucket, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let db = self.db.clone();
        let bucket = bucket.clone();
        let key = key.clone();
        task::spawn_blocking(move || {
            let txn = db.begin_read()?;
            let table = match txn.open_table(table_def(&bucket)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let value = table
                .get(key.as_bytes())?
                .map(|guard| Bytes::copy_from_slice(guard.value()));
            Ok(value)
        })
        .await?
    }

    /// Deletes a record. Idempotent.
    pub async fn delete(&self, bucket: &Bucket, key: &CacheKey) -> Result<(), StoreError> {
        let db = self.db.clone();
        let bucket = bucket.clone();
        let key = key.clone();
        task::spawn_blocking(move || {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(table_def(&bucket))?;
                table.remove(key.as_bytes())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await?
    }

    /// Number of entries in the bucket. A missing bucket counts as empty.
    pub async fn size(&self, bucket: &Bucket) -> Result<u64, StoreError> {
        let db = self.db.clone();
        let bucket = bucket.clone();
        task::spawn_blocking(move || {
            let txn = db.begin_read()?;
            match txn.open_table(table_def(&bucket)) {
                Ok(table) => Ok(table.len()?),
                Err(TableError::TableDoesNotExist(_)) => Ok(0),
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    /// Visits every entry in the bucket and deletes the ones the visitor
    /// marks [`ScanAction::Delete`]. Returns the number deleted.
    ///
    /// The visiting pass runs inside one read snapshot; deletions happen
    /// afterwards in batches of 1,000 keys per write transaction, yielding
    /// between batches so the serving path keeps making progress.
    pub async fn scan<F>(&self, bucket: &Bucket, visit: F) -> Result<u64, StoreError>
    where
        F: FnMut(&[u8], &[u8]) -> ScanAction + Send + 'static,
    {
        let db = self.db.clone();
        let scan_bucket = bucket.clone();
        let doomed: Vec<Vec<u8>> = task::spawn_blocking(move || {
            let mut visit = visit;
            let txn = db.begin_read()?;
            let table = match txn.open_table(table_def(&scan_bucket)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(StoreError::from(e)),
            };
            let mut doomed = Vec::new();
            for pair in table.iter()? {
                let (key, value) = pair?;
                if visit(key.value(), value.value()) == ScanAction::Delete {
                    doomed.push(key.value().to_vec());
                }
            }
            Ok(doomed)
        })
        .await??;

        let mut deleted = 0u64;
        for batch in doomed.chunks(SWEEP_BATCH) {
            let db = self.db.clone();
            let batch_bucket = bucket.clone();
            let batch = batch.to_vec();
            deleted += task::spawn_blocking(move || -> Result<u64, StoreError> {
                let txn = db.begin_write()?;
                let mut removed = 0;
                {
                    let mut table = txn.open_table(table_def(&batch_bucket))?;
                    for key in &batch {
                        if table.remove(key.as_slice())?.is_some() {
                            removed += 1;
                        }
                    }
                }
                txn.commit()?;
                Ok(removed)
            })
            .await??;
            task::yield_now().await;
        }
        Ok(deleted)
    }

    /// Deletes every record in the bucket whose `created_at + ttl` lies
    /// before `now`. Returns the number deleted.
    ///
    /// Only the fixed record prefix is parsed, straight from the engine's
    /// borrowed view. A record too short to carry the prefix is unreadable
    /// anyway and is swept with the expired ones.
    pub async fn clear_expired(&self, bucket: &Bucket, now: u32) -> Result<u64, StoreError> {
        let deleted = self
            .scan(bucket, move |_key, value| {
                match CachedResponse::decode_expiry(value) {
                    Ok((created_at, ttl)) if now > created_at.saturating_add(ttl) => {
                        ScanAction::Delete
                    }
                    Ok(_) => ScanAction::Keep,
                    Err(_) => ScanAction::Delete,
                }
            })
            .await?;
        if deleted > 0 {
            debug!(bucket = %bucket, deleted, "swept expired records");
        }
        Ok(deleted)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

//! The cache client facade.
//!
//! [`CacheClient`] joins the status table and the persistent store behind
//! the three calls the proxy middleware makes: classify a request
//! ([`get`](CacheClient::get)), report a fetched response
//! ([`save_response`](CacheClient::save_response)), and mark a key
//! uncacheable ([`hit_for_pass`](CacheClient::hit_for_pass)).
//!
//! There is no process-global client: each one is an explicit value built at
//! startup and threaded to its collaborators, so tests run isolated clients
//! side by side. Clients pointed at the same database file share the
//! underlying store handle.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use ramjet_core::{Bucket, CacheKey, CacheStatus, CachedResponse, CodecError, EntryState, clock};
use ramjet_store::Store;
use tracing::warn;

use crate::config::{CacheConfig, default_hit_for_pass_ttl};
use crate::error::CacheError;
use crate::table::{RequestStatus, StatusTable, TableStats};

/// What [`CacheClient::get`] resolved a request to.
///
/// `response` is populated exactly when `status` is
/// [`CacheStatus::Cacheable`].
#[derive(Debug)]
pub struct CacheResult {
    /// The cache decision for this request.
    pub status: CacheStatus,
    /// The stored response, on a cache hit.
    pub response: Option<CachedResponse>,
}

impl CacheResult {
    fn miss(status: CacheStatus) -> Self {
        CacheResult {
            status,
            response: None,
        }
    }

    fn hit(response: CachedResponse) -> Self {
        CacheResult {
            status: CacheStatus::Cacheable,
            response: Some(response),
        }
    }
}

/// Builder for [`CacheClient`].
///
/// ```no_run
/// use ramjet::CacheClient;
///
/// # fn build() -> Result<(), ramjet::CacheError> {
/// let client = CacheClient::builder()
///     .path("/var/cache/ramjet.db")
///     .bucket("default")
///     .hit_for_pass_ttl(300)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct CacheClientBuilder {
    path: Option<PathBuf>,
    bucket: Option<Bucket>,
    hit_for_pass_ttl: Option<u32>,
}

impl CacheClientBuilder {
    /// Location of the store's database file. Required.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Store bucket this client serves, typically the director name.
    pub fn bucket(mut self, bucket: impl Into<Bucket>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// TTL applied when a fetcher reports "uncacheable".
    pub fn hit_for_pass_ttl(mut self, ttl: u32) -> Self {
        self.hit_for_pass_ttl = Some(ttl);
        self
    }

    /// Opens the store, creates the bucket, and produces the client.
    pub fn build(self) -> Result<CacheClient, CacheError> {
        let path = self.path.ok_or(CacheError::StoreNotInitialized)?;
        let store = Store::open(path)?;
        let bucket = self.bucket.unwrap_or_else(|| Bucket::new("default"));
        store.create_bucket(&bucket)?;
        Ok(CacheClient {
            store: Mutex::new(Some(store)),
            table: StatusTable::new(),
            bucket,
            hit_for_pass_ttl: self.hit_for_pass_ttl.unwrap_or_else(default_hit_for_pass_ttl),
        })
    }
}

/// Cache facade over one store bucket and its status table.
pub struct CacheClient {
    store: Mutex<Option<Store>>,
    table: StatusTable,
    bucket: Bucket,
    hit_for_pass_ttl: u32,
}

impl CacheClient {
    /// Starts building a client.
    pub fn builder() -> CacheClientBuilder {
        CacheClientBuilder::default()
    }

    /// Builds a client from configuration.
    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        CacheClient::builder()
            .path(config.db_path.clone())
            .bucket(config.bucket.as_str())
            .hit_for_pass_ttl(config.hit_for_pass_ttl)
            .build()
    }

    fn store(&self) -> Result<Store, CacheError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CacheError::StoreNotInitialized)
    }

    /// Classifies a request and, on a hit, loads the stored response.
    ///
    /// A `Waiting` classification parks here until the in-flight fetcher
    /// resolves the key; the caller only ever sees the resolved outcome.
    /// When the table says `Cacheable` but the record has expired, vanished,
    /// or fails to parse, the caller is told `Fetching` and takes over the
    /// origin fetch; undecodable records are deleted best-effort.
    pub async fn get(&self, key: &CacheKey) -> Result<CacheResult, CacheError> {
        let store = self.store()?;
        let resolved = match self.table.status(key) {
            RequestStatus::Fetching => return Ok(CacheResult::miss(CacheStatus::Fetching)),
            RequestStatus::HitForPass => return Ok(CacheResult::miss(CacheStatus::HitForPass)),
            RequestStatus::Cacheable => EntryState::Cacheable,
            RequestStatus::Waiting(signal) => match signal.await {
                Ok(state) => state,
                // The entry vanished under the fetcher; this caller starts over.
                Err(_) => return Ok(CacheResult::miss(CacheStatus::Fetching)),
            },
        };
        match resolved {
            EntryState::Fetching => Ok(CacheResult::miss(CacheStatus::Fetching)),
            EntryState::HitForPass => Ok(CacheResult::miss(CacheStatus::HitForPass)),
            EntryState::Cacheable => self.read_record(&store, key).await,
        }
    }

    async fn read_record(&self, store: &Store, key: &CacheKey) -> Result<CacheResult, CacheError> {
        let Some(buf) = store.get(&self.bucket, key).await? else {
            // Lost a race with the expiry sweep.
            return Ok(CacheResult::miss(CacheStatus::Fetching));
        };
        match CachedResponse::decode(&buf) {
            Ok(response) if response.is_expired(clock::unix_seconds()) => {
                let _ = store.delete(&self.bucket, key).await;
                Ok(CacheResult::miss(CacheStatus::Fetching))
            }
            Ok(response) => Ok(CacheResult::hit(response)),
            Err(err) => {
                warn!(?key, %err, "dropping undecodable record");
                let _ = store.delete(&self.bucket, key).await;
                Ok(CacheResult::miss(CacheStatus::Fetching))
            }
        }
    }

    /// Persists a fetched response and marks the key `Cacheable`, releasing
    /// every parked caller.
    ///
    /// A response with `ttl == 0` means the fetcher found it uncacheable:
    /// nothing is written and the key goes to `HitForPass` for the
    /// configured TTL. The same downgrade absorbs a header block too large
    /// to pack. The store write completes before the transition, so a
    /// released waiter always finds the record.
    pub async fn save_response(
        &self,
        key: &CacheKey,
        response: &CachedResponse,
    ) -> Result<(), CacheError> {
        let store = self.store()?;
        if response.ttl == 0 {
            self.table.hit_for_pass(key, self.hit_for_pass_ttl);
            return Ok(());
        }

        let mut record = response.clone();
        if record.created_at == 0 {
            record.created_at = clock::unix_seconds();
        }
        let encoded = match record.encode() {
            Ok(encoded) => encoded,
            Err(err @ CodecError::HeaderTooLarge { .. }) => {
                warn!(?key, %err, "response not cached");
                self.table.hit_for_pass(key, self.hit_for_pass_ttl);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        store.put(&self.bucket, key, encoded).await?;
        self.table.cacheable(key, record.ttl);
        Ok(())
    }

    /// Marks the key uncacheable for `ttl` seconds and releases its waiters.
    pub fn hit_for_pass(&self, key: &CacheKey, ttl: u32) {
        self.table.hit_for_pass(key, ttl);
    }

    /// Marks the key `Cacheable` for `ttl` seconds and releases its waiters.
    pub fn cacheable(&self, key: &CacheKey, ttl: u32) {
        self.table.cacheable(key, ttl);
    }

    /// Number of live status-table entries.
    pub fn size(&self) -> usize {
        self.table.size()
    }

    /// Status-table entry counts by state.
    pub fn stats(&self) -> TableStats {
        self.table.stats()
    }

    /// Number of records persisted in this client's bucket.
    pub async fn store_size(&self) -> Result<u64, CacheError> {
        Ok(self.store()?.size(&self.bucket).await?)
    }

    /// Sweeps expired entries from the status table and expired records from
    /// the bucket. Returns the number of records deleted from the store.
    pub async fn clear_expired(&self) -> Result<u64, CacheError> {
        let now = clock::unix_seconds();
        self.table.clear_expired(now);
        let store = self.store()?;
        Ok(store.clear_expired(&self.bucket, now).await?)
    }

    /// Releases the store handle and drops the in-memory table.
    ///
    /// Every later call surfaces [`CacheError::StoreNotInitialized`].
    /// Waiters parked at the time of the close observe a dropped signal and
    /// re-enter as fetchers.
    pub fn close(&self) {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.table.clear();
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("bucket", &self.bucket)
            .field("hit_for_pass_ttl", &self.hit_for_pass_ttl)
            .field("table", &self.table)
            .finish()
    }
}

//! Request-coalescing status table.
//!
//! The table answers, per cache key: is someone already fetching this, is it
//! known uncacheable, or is a stored response available? The first caller to
//! ask about an unknown (or expired) key becomes the fetcher; everyone else
//! parks on a single-shot signal until the fetcher reports back, so an
//! origin sees at most one outstanding request per key.
//!
//! One mutex guards the whole map. Every state read, mutation, waiter-list
//! edit, and signal send happens inside that critical section; sends are
//! non-blocking because each waiter's channel is a [`oneshot`], and a send
//! into an abandoned channel (the waiter timed out or disconnected) is a
//! plain drop. The only thing that ever blocks is the waiter's receive, and
//! that happens outside the lock.

use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ramjet_core::{CacheKey, EntryState, clock};
use tokio::sync::oneshot;
use tracing::debug;

/// Single-shot signal a parked caller receives its resolved state on.
///
/// The value is exactly the state assigned by the transition that released
/// the waiter; dropping the receiver deregisters nothing and harms nobody.
pub type Signal = oneshot::Receiver<EntryState>;

/// Outcome of classifying one arriving request.
#[derive(Debug)]
pub enum RequestStatus {
    /// No live entry existed; this caller owns the origin fetch.
    Fetching,
    /// Another caller is fetching. Receive once on the signal, then act on
    /// the resolved state.
    Waiting(Signal),
    /// The key is known uncacheable; forward to origin without caching.
    HitForPass,
    /// A stored response exists; read it from the store.
    Cacheable,
}

/// Counts of table entries by state, plus parked callers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Keys currently in `Fetching`.
    pub fetching: usize,
    /// Callers parked across all `Fetching` keys.
    pub waiting: usize,
    /// Keys currently in `HitForPass`.
    pub hit_for_pass: usize,
    /// Keys currently in `Cacheable`.
    pub cacheable: usize,
}

struct Entry {
    state: EntryState,
    created_at: u32,
    ttl: u32,
    waiters: Vec<oneshot::Sender<EntryState>>,
}

impl Entry {
    fn fetching(now: u32) -> Self {
        Entry {
            state: EntryState::Fetching,
            created_at: now,
            // No expiry bound yet: the entry stays live until the fetcher
            // resolves it or the sweep gives up on it.
            ttl: 0,
            waiters: Vec::new(),
        }
    }

    fn is_expired(&self, now: u32) -> bool {
        self.ttl != 0 && now.saturating_sub(self.created_at) > self.ttl
    }
}

/// In-memory map from cache key to its per-key state machine.
#[derive(Default)]
pub struct StatusTable {
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl StatusTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classifies one arriving request for `key`.
    ///
    /// Expiry is checked here, lazily: an expired entry is replaced with a
    /// fresh `Fetching` one inside the same critical section, so two callers
    /// can never both observe the stale entry and both become fetchers.
    pub fn status(&self, key: &CacheKey) -> RequestStatus {
        let now = clock::unix_seconds();
        let mut entries = self.lock();
        match entries.entry(key.clone()) {
            MapEntry::Vacant(slot) => {
                slot.insert(Entry::fetching(now));
                RequestStatus::Fetching
            }
            MapEntry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if entry.is_expired(now) {
                    *entry = Entry::fetching(now);
                    return RequestStatus::Fetching;
                }
                match entry.state {
                    EntryState::Fetching => {
                        let (sender, receiver) = oneshot::channel();
                        entry.waiters.push(sender);
                        RequestStatus::Waiting(receiver)
                    }
                    EntryState::HitForPass => RequestStatus::HitForPass,
                    EntryState::Cacheable => RequestStatus::Cacheable,
                }
            }
        }
    }

    /// Moves `key` to `state` with `ttl` counted from now, signalling every
    /// parked caller with the new state and emptying the waiter list, all in
    /// one critical section.
    ///
    /// A missing entry (swept concurrently) makes this a no-op: the next
    /// [`status`](Self::status) call starts over from `Fetching`.
    pub fn update(&self, key: &CacheKey, state: EntryState, ttl: u32) {
        let now = clock::unix_seconds();
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.state = state;
        entry.created_at = now;
        entry.ttl = ttl;
        if !entry.waiters.is_empty() {
            debug!(?key, ?state, waiters = entry.waiters.len(), "releasing waiters");
        }
        for waiter in entry.waiters.drain(..) {
            // The receiver may have walked away; the send is then dropped.
            let _ = waiter.send(state);
        }
    }

    /// Marks `key` uncacheable for `ttl` seconds and releases its waiters.
    pub fn hit_for_pass(&self, key: &CacheKey, ttl: u32) {
        self.update(key, EntryState::HitForPass, ttl);
    }

    /// Marks `key` as having a stored response for `ttl` seconds and
    /// releases its waiters.
    pub fn cacheable(&self, key: &CacheKey, ttl: u32) {
        self.update(key, EntryState::Cacheable, ttl);
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Entry counts by state; `waiting` sums parked callers over all
    /// `Fetching` keys.
    pub fn stats(&self) -> TableStats {
        let entries = self.lock();
        let mut stats = TableStats::default();
        for entry in entries.values() {
            match entry.state {
                EntryState::Fetching => {
                    stats.fetching += 1;
                    stats.waiting += entry.waiters.len();
                }
                EntryState::HitForPass => stats.hit_for_pass += 1,
                EntryState::Cacheable => stats.cacheable += 1,
            }
        }
        stats
    }

    /// Drops every entry whose TTL elapsed before `now`. Returns the number
    /// removed.
    pub fn clear_expired(&self, now: u32) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Drops every entry. Parked callers observe their sender going away and
    /// re-enter as fetchers.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}

impl std::fmt::Debug for StatusTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTable")
            .field("entries", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn first_caller_fetches_the_rest_wait() {
        let table = Arc::new(StatusTable::new());
        let key = CacheKey::from("GET /users/me");

        assert!(matches!(table.status(&key), RequestStatus::Fetching));

        let parked = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let table = table.clone();
            let key = key.clone();
            let parked = parked.clone();
            handles.push(tokio::spawn(async move {
                let RequestStatus::Waiting(signal) = table.status(&key) else {
                    panic!("every follow-up caller should wait");
                };
                parked.fetch_add(1, Ordering::SeqCst);
                signal.await.expect("transition must signal the waiter")
            }));
        }

        // Every waiter is parked before the fetcher resolves.
        while parked.load(Ordering::SeqCst) < 20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(table.stats().waiting, 20);

        table.cacheable(&key, 600);
        for handle in handles {
            assert_eq!(handle.await.unwrap(), EntryState::Cacheable);
        }

        // The late caller observes the resolved state without parking.
        assert!(matches!(table.status(&key), RequestStatus::Cacheable));
        assert_eq!(table.stats().waiting, 0);
    }

    #[tokio::test]
    async fn hit_for_pass_releases_waiters_with_its_own_state() {
        let table = Arc::new(StatusTable::new());
        let key = CacheKey::from("POST /login");

        assert!(matches!(table.status(&key), RequestStatus::Fetching));
        let RequestStatus::Waiting(signal) = table.status(&key) else {
            panic!("second caller should wait");
        };

        table.hit_for_pass(&key, 300);
        assert_eq!(signal.await.unwrap(), EntryState::HitForPass);
        assert!(matches!(table.status(&key), RequestStatus::HitForPass));
    }

    #[tokio::test]
    async fn expired_entry_restarts_as_fetching() {
        let table = StatusTable::new();
        let key = CacheKey::from("GET /volatile");

        assert!(matches!(table.status(&key), RequestStatus::Fetching));
        table.cacheable(&key, 1);
        assert!(matches!(table.status(&key), RequestStatus::Cacheable));

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert!(matches!(table.status(&key), RequestStatus::Fetching));
    }

    #[test]
    fn update_on_missing_key_is_a_no_op() {
        let table = StatusTable::new();
        table.cacheable(&CacheKey::from("never seen"), 600);
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn abandoned_waiter_does_not_block_the_transition() {
        let table = StatusTable::new();
        let key = CacheKey::from("GET /slow");

        assert!(matches!(table.status(&key), RequestStatus::Fetching));
        let RequestStatus::Waiting(signal) = table.status(&key) else {
            panic!("second caller should wait");
        };
        drop(signal);

        // The send into the dropped channel is discarded; nothing panics and
        // the waiter list still empties.
        table.cacheable(&key, 600);
        assert_eq!(table.stats().waiting, 0);
    }

    #[test]
    fn stats_count_by_state() {
        let table = StatusTable::new();

        let fetching = CacheKey::from("1");
        table.status(&fetching);
        table.status(&fetching);
        table.status(&fetching);

        let passed = CacheKey::from("2");
        table.status(&passed);
        table.hit_for_pass(&passed, 300);

        let cached = CacheKey::from("3");
        table.status(&cached);
        table.cacheable(&cached, 300);

        assert_eq!(
            table.stats(),
            TableStats {
                fetching: 1,
                waiting: 2,
                hit_for_pass: 1,
                cacheable: 1,
            }
        );
        assert_eq!(table.size(), 3);
    }

    #[test]
    fn sweep_drops_expired_entries() {
        let table = StatusTable::new();
        for index in 0..1_000u32 {
            let key = CacheKey::new(index.to_be_bytes().to_vec());
            table.status(&key);
            table.update(&key, EntryState::HitForPass, 1);
        }
        assert_eq!(table.size(), 1_000);

        // Far enough in the future that every TTL has elapsed.
        let removed = table.clear_expired(clock::unix_seconds() + 10);
        assert_eq!(removed, 1_000);
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn fetching_entries_never_expire_by_ttl() {
        let table = StatusTable::new();
        let key = CacheKey::from("GET /in-flight");
        table.status(&key);

        // ttl == 0 means "no bound yet": the sweep must leave the in-flight
        // fetch alone.
        assert_eq!(table.clear_expired(clock::unix_seconds() + 3_600), 0);
        assert_eq!(table.size(), 1);
    }
}

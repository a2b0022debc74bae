//! Per-key cache states and the per-request cache decision.

/// State stored in the status table for one key.
///
/// `Waiting` is deliberately absent: it is something a caller is told, never
/// something a key is in. Parked callers receive the `EntryState` the key
/// resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// One caller is fetching this key from the origin.
    Fetching,
    /// The key is known uncacheable for the entry's TTL.
    HitForPass,
    /// A stored response exists for the entry's TTL.
    Cacheable,
}

/// The cache decision surfaced for one served request.
///
/// This is what the dispatcher exposes in the `X-Status` response header.
/// `Pass` is assigned by the caller for requests that never enter the state
/// machine (uncacheable by method or path).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    /// Classified as never-cacheable before reaching the cache.
    Pass,
    /// This caller owns the origin fetch.
    Fetching,
    /// Known uncacheable; forwarded to origin without caching.
    HitForPass,
    /// Served from (or about to fill) the cache.
    Cacheable,
}

impl CacheStatus {
    /// Header value for the `X-Status` response header.
    pub const fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Pass => "pass",
            CacheStatus::Fetching => "fetching",
            CacheStatus::HitForPass => "hitForPass",
            CacheStatus::Cacheable => "cacheable",
        }
    }
}

impl From<EntryState> for CacheStatus {
    fn from(state: EntryState) -> Self {
        match state {
            EntryState::Fetching => CacheStatus::Fetching,
            EntryState::HitForPass => CacheStatus::HitForPass,
            EntryState::Cacheable => CacheStatus::Cacheable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_values() {
        assert_eq!(CacheStatus::Pass.as_str(), "pass");
        assert_eq!(CacheStatus::Fetching.as_str(), "fetching");
        assert_eq!(CacheStatus::HitForPass.as_str(), "hitForPass");
        assert_eq!(CacheStatus::Cacheable.as_str(), "cacheable");
    }
}

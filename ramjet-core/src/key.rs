//! Cache key and namespace types.
//!
//! - [`CacheKey`] - The request fingerprint a cached entry is stored under
//! - [`Bucket`] - A named partition of the store, one per upstream director
//!
//! Keys are opaque: they are produced upstream from method, host, path, and
//! vary-normalized headers, and the core compares them as raw bytes. Case
//! folding and canonicalization are the producer's responsibility.
//!
//! # Cheap Cloning
//!
//! `CacheKey` wraps [`Bytes`], so `clone()` only bumps a reference count.
//! Keys are cloned on every table lookup and store call, which makes this
//! worth having. `Bucket` uses [`SmolStr`]: director names are short and
//! stay inline without heap allocation.

use std::fmt;

use bytes::Bytes;
use smol_str::SmolStr;

/// Opaque fingerprint identifying one cacheable request variant.
///
/// ```
/// use ramjet_core::CacheKey;
///
/// let key = CacheKey::new("GET example.com/users/me");
/// assert_eq!(key.as_bytes(), b"GET example.com/users/me");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Bytes);

impl CacheKey {
    /// Creates a key from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        CacheKey(bytes.into())
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        CacheKey(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<&[u8]> for CacheKey {
    fn from(value: &[u8]) -> Self {
        CacheKey(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for CacheKey {
    fn from(value: Vec<u8>) -> Self {
        CacheKey(Bytes::from(value))
    }
}

/// A named partition of the store.
///
/// Each upstream director owns one bucket; the core treats the name as an
/// opaque label and never parses it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Bucket(SmolStr);

impl Bucket {
    /// Creates a bucket from its name.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Bucket(name.into())
    }

    /// Returns the bucket name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Bucket {
    fn from(name: &str) -> Self {
        Bucket(SmolStr::new(name))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#![warn(missing_docs)]
//! # ramjet-core
//!
//! Core types for the ramjet HTTP response cache.
//!
//! This crate holds everything the status table, the store, and the
//! dispatcher agree on:
//!
//! - **Identity**: [`CacheKey`] (opaque request fingerprint) and [`Bucket`]
//!   (per-director store namespace)
//! - **States**: [`EntryState`] (what the table remembers per key) and
//!   [`CacheStatus`] (the per-request decision surfaced in `X-Status`)
//! - **The record**: [`CachedResponse`] with its big-endian binary codec
//! - **Compression**: gzip and brotli body variants ([`compress`])

pub mod compress;
pub mod error;
pub mod key;
pub mod record;
pub mod state;

pub use error::{CodecError, CompressionError};
pub use key::{Bucket, CacheKey};
pub use record::{CachedResponse, status_has_body};
pub use state::{CacheStatus, EntryState};

/// Wall-clock helpers for record and entry timestamps.
pub mod clock {
    use chrono::Utc;

    /// Current wall time in whole seconds, as stored in records and entries.
    pub fn unix_seconds() -> u32 {
        Utc::now().timestamp().max(0) as u32
    }
}

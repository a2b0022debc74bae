//! Error type for cache operations.
//!
//! The policy is two-tier: recoverable faults (corrupt records, races with
//! the expiry sweep, oversized headers) are absorbed inside the facade and
//! downgraded so serving continues, while structural faults — a closed
//! client, a dispatch with no response to write — surface to the caller as
//! 5xx material.

use ramjet_core::{CodecError, CompressionError};
use ramjet_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the cache facade and dispatcher.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The facade was used before the store was opened, or after `close()`.
    #[error("cache store is not initialized")]
    StoreNotInitialized,

    /// The persistent store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record failed to pack or parse.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A body variant failed to compress or decompress.
    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// Every body variant of a record is empty for a body-bearing status.
    #[error("no body variant available for a body-bearing status")]
    BodyContentNotFound,

    /// The dispatcher was asked to write a response it was never given.
    #[error("cache state is missing or invalid for this dispatch")]
    CacheInvalid,

    /// A configured content-type pattern failed to compile.
    #[error("invalid compress type pattern: {0}")]
    InvalidCompressType(#[from] regex::Error),
}

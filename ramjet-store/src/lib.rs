#![warn(missing_docs)]
//! # ramjet-store
//!
//! Persistent response store for the ramjet HTTP cache.
//!
//! Packed [`CachedResponse`](ramjet_core::CachedResponse) records live in a
//! single-file embedded database, partitioned into one [`Bucket`] per
//! upstream director (plus a reserved bucket for configuration, owned by the
//! caller). The store guarantees:
//!
//! - **Atomic writes**: a reader sees the whole prior value or the whole new
//!   value, never a tear
//! - **Consistent reads**: each read runs against one engine snapshot
//! - **Crash safety**: committed writes survive the process
//! - **Batched expiry**: the sweep deletes in bounded groups so it cannot
//!   starve the serving path
//!
//! [`Bucket`]: ramjet_core::Bucket

mod error;
mod store;

pub use error::StoreError;
pub use store::{ScanAction, Store};

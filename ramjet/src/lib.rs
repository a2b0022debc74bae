#![warn(missing_docs)]
//! # ramjet
//!
//! HTTP response caching core of a reverse-proxy accelerator.
//!
//! For every request fingerprint the core answers one question: *is there a
//! usable cached response, is someone already fetching one, or must this
//! caller fetch it now?* Three subsystems cooperate:
//!
//! - [`StatusTable`] — per-key request coalescing, so an origin sees at most
//!   one outstanding fetch per distinct key while every other concurrent
//!   caller parks on the outcome
//! - [`CacheClient`] — the facade the proxy middleware talks to, joining the
//!   table with the persistent [`ramjet_store::Store`]
//! - [`Dispatcher`] — content-encoding negotiation on the serve path and
//!   compression policy on the store path
//!
//! The HTTP listener, upstream client, request routing, and configuration
//! parsing live in the surrounding proxy; they hand the core a
//! [`CacheKey`] and get back a decision and, on hits, a response to write.
//!
//! ```no_run
//! use ramjet::{CacheClient, CacheKey, CacheStatus};
//!
//! # async fn serve() -> Result<(), ramjet::CacheError> {
//! let client = CacheClient::builder().path("/var/cache/ramjet.db").build()?;
//! let key = CacheKey::from("GET example.com /users/me");
//!
//! match client.get(&key).await? {
//!     result if result.status == CacheStatus::Cacheable => {
//!         // serve result.response through the Dispatcher
//!     }
//!     result if result.status == CacheStatus::Fetching => {
//!         // fetch from origin, then save_response / hit_for_pass
//!     }
//!     _ => {
//!         // HitForPass: forward to origin without caching
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod table;

pub use client::{CacheClient, CacheClientBuilder, CacheResult};
pub use config::CacheConfig;
pub use dispatch::{Dispatcher, PrepareOutcome, X_STATUS};
pub use error::CacheError;
pub use table::{RequestStatus, Signal, StatusTable, TableStats};

pub use ramjet_core::{
    Bucket, CacheKey, CacheStatus, CachedResponse, CodecError, CompressionError, EntryState,
};
pub use ramjet_store::{Store, StoreError};

//! Cache configuration.
//!
//! Deserializable from whatever configuration tree the surrounding proxy
//! parses; every knob has a serving-grade default so a bare `db_path` is a
//! complete configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for one [`CacheClient`](crate::CacheClient).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct CacheConfig {
    /// Location of the store's database file.
    pub db_path: PathBuf,

    /// Store bucket this client serves, typically the director name.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Content-type substring patterns that enable compression.
    #[serde(default = "default_compress_types")]
    pub compress_types: Vec<String>,

    /// Bodies below this many bytes are stored raw, uncompressed.
    #[serde(default = "default_compress_min_length")]
    pub compress_min_length: usize,

    /// Gzip/brotli quality level.
    #[serde(default = "default_compress_level")]
    pub compress_level: u32,

    /// TTL in seconds applied when the fetcher reports "uncacheable".
    #[serde(default = "default_hit_for_pass_ttl")]
    pub hit_for_pass_ttl: u32,
}

impl CacheConfig {
    /// Configuration with every knob at its default.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        CacheConfig {
            db_path: db_path.into(),
            bucket: default_bucket(),
            compress_types: default_compress_types(),
            compress_min_length: default_compress_min_length(),
            compress_level: default_compress_level(),
            hit_for_pass_ttl: default_hit_for_pass_ttl(),
        }
    }
}

fn default_bucket() -> String {
    "default".to_string()
}

fn default_compress_types() -> Vec<String> {
    vec![
        "text".to_string(),
        "javascript".to_string(),
        "json".to_string(),
    ]
}

fn default_compress_min_length() -> usize {
    1024
}

fn default_compress_level() -> u32 {
    6
}

pub(crate) fn default_hit_for_pass_ttl() -> u32 {
    300
}

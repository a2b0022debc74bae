//! Error types for the record codec and body compression.

use thiserror::Error;

/// Errors from packing or parsing the binary response record.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The buffer is shorter than the fixed prefix, or a length field
    /// overruns the buffer.
    #[error("cached record is corrupt")]
    Corrupt,

    /// The header block does not fit the record's 16-bit length field.
    #[error("header block of {len} bytes exceeds the record's u16 length field")]
    HeaderTooLarge {
        /// Size of the offending header block.
        len: usize,
    },
}

/// Errors from compressing or decompressing a body variant.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// Compression failed. Non-fatal to callers: the raw body is kept.
    #[error("compression failed: {0}")]
    Encode(#[source] std::io::Error),

    /// The stored variant could not be decompressed.
    #[error("decompression failed: {0}")]
    Decode(#[source] std::io::Error),
}

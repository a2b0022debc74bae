//! Gzip and brotli body compression.
//!
//! Compression runs once, when a response is stored; the serving path only
//! ever decompresses, and only when the client accepts none of the
//! precomputed variants. Empty input short-circuits to empty output in both
//! directions, so no-body responses never pay for a codec round trip.

use std::io::{Cursor, Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::CompressionError;

const MAX_GZIP_LEVEL: u32 = 9;
const MAX_BROTLI_LEVEL: u32 = 11;

/// Compresses `raw` to gzip at the given level (clamped to 0..=9).
pub fn gzip(raw: &[u8], level: u32) -> Result<Bytes, CompressionError> {
    if raw.is_empty() {
        return Ok(Bytes::new());
    }
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(raw.len() / 2),
        Compression::new(level.min(MAX_GZIP_LEVEL)),
    );
    encoder.write_all(raw).map_err(CompressionError::Encode)?;
    let compressed = encoder.finish().map_err(CompressionError::Encode)?;
    Ok(compressed.into())
}

/// Decompresses a gzip body variant back to raw bytes.
pub fn gunzip(buf: &[u8]) -> Result<Bytes, CompressionError> {
    if buf.is_empty() {
        return Ok(Bytes::new());
    }
    let mut decoder = GzDecoder::new(buf);
    let mut raw = Vec::with_capacity(buf.len() * 2);
    decoder
        .read_to_end(&mut raw)
        .map_err(CompressionError::Decode)?;
    Ok(raw.into())
}

/// Compresses `raw` to brotli at the given quality (clamped to 0..=11).
pub fn brotli_encode(raw: &[u8], level: u32) -> Result<Bytes, CompressionError> {
    if raw.is_empty() {
        return Ok(Bytes::new());
    }
    let params = brotli::enc::BrotliEncoderParams {
        quality: level.min(MAX_BROTLI_LEVEL) as i32,
        ..Default::default()
    };
    let mut compressed = Vec::with_capacity(raw.len() / 2);
    brotli::BrotliCompress(&mut Cursor::new(raw), &mut compressed, &params)
        .map_err(CompressionError::Encode)?;
    Ok(compressed.into())
}

/// Decompresses a brotli body variant back to raw bytes.
pub fn brotli_decode(buf: &[u8]) -> Result<Bytes, CompressionError> {
    if buf.is_empty() {
        return Ok(Bytes::new());
    }
    let mut raw = Vec::with_capacity(buf.len() * 2);
    brotli::BrotliDecompress(&mut Cursor::new(buf), &mut raw)
        .map_err(CompressionError::Decode)?;
    Ok(raw.into())
}

//! The packed cached-response record.
//!
//! A [`CachedResponse`] is stored as one contiguous byte value:
//!
//! | Offset | Bytes        | Field |
//! |--------|--------------|-------|
//! | 0      | 4            | `created_at` (seconds since the epoch) |
//! | 4      | 2            | `status_code` |
//! | 6      | 2            | compress flag (reserved; which variants are present) |
//! | 8      | 4            | `ttl` (seconds) |
//! | 12     | 2            | header block length |
//! | 14     | `header_len` | header block |
//! | …      | …            | raw, gzip, brotli variants, each with a `u32` length prefix |
//!
//! The header block is a sequence of `(u16 name_len, name, u16 value_len,
//! value)` pairs. All multi-byte integers are **big-endian**; records written
//! with a little-endian layout are not interchangeable with this one.
//!
//! The expiry sweep needs only `created_at` and `ttl`, so both live in the
//! fixed prefix and can be parsed from a borrowed value without unpacking
//! the rest ([`CachedResponse::decode_expiry`]).

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::CodecError;

const CREATED_AT_OFFSET: usize = 0;
const STATUS_CODE_OFFSET: usize = 4;
const COMPRESS_FLAG_OFFSET: usize = 6;
const TTL_OFFSET: usize = 8;
const HEADER_LEN_OFFSET: usize = 12;
const HEADER_OFFSET: usize = 14;

const FLAG_RAW: u16 = 0b001;
const FLAG_GZIP: u16 = 0b010;
const FLAG_BROTLI: u16 = 0b100;

/// Whether a status code carries a response body.
///
/// Informational responses, `204` and `304` do not; everything else does.
pub fn status_has_body(status_code: u16) -> bool {
    !matches!(status_code, 100..=199 | 204 | 304)
}

/// One cached upstream response with up to three body variants.
///
/// Any variant may be empty. For a body-bearing status at least one variant
/// is non-empty once the response has been prepared for storage; for `204`
/// and friends all three stay empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachedResponse {
    /// Wall-clock seconds at which the response was cached.
    pub created_at: u32,
    /// Upstream HTTP status code.
    pub status_code: u16,
    /// Seconds the response stays fresh; `created_at + ttl` is the expiry
    /// wall time.
    pub ttl: u32,
    /// Response headers as captured from upstream.
    pub headers: HeaderMap,
    /// Raw (identity-encoded) body variant.
    pub body: Bytes,
    /// Gzip body variant.
    pub gzip_body: Bytes,
    /// Brotli body variant.
    pub br_body: Bytes,
}

impl CachedResponse {
    /// Packs the record into its binary layout.
    ///
    /// Fails only with [`CodecError::HeaderTooLarge`] when the header block
    /// does not fit the 16-bit length field.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let header_block = encode_header_block(&self.headers)?;
        let header_len = u16::try_from(header_block.len()).map_err(|_| {
            CodecError::HeaderTooLarge {
                len: header_block.len(),
            }
        })?;

        let body_len = self.body.len() + self.gzip_body.len() + self.br_body.len();
        let mut buf = BytesMut::with_capacity(HEADER_OFFSET + header_block.len() + 12 + body_len);
        buf.put_u32(self.created_at);
        buf.put_u16(self.status_code);
        buf.put_u16(self.compress_flag());
        buf.put_u32(self.ttl);
        buf.put_u16(header_len);
        buf.put_slice(&header_block);
        for variant in [&self.body, &self.gzip_body, &self.br_body] {
            buf.put_u32(variant.len() as u32);
            buf.put_slice(variant);
        }
        Ok(buf.freeze())
    }

    /// Parses a packed record.
    ///
    /// Returns [`CodecError::Corrupt`] when the buffer is shorter than the
    /// fixed prefix, any length field overruns the buffer, or the header
    /// block does not parse back into valid header names and values.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_OFFSET {
            return Err(CodecError::Corrupt);
        }
        let created_at = read_u32(buf, CREATED_AT_OFFSET)?;
        let status_code = read_u16(buf, STATUS_CODE_OFFSET)?;
        // Reserved: variant presence is re-derived from the length prefixes.
        let _compress_flag = read_u16(buf, COMPRESS_FLAG_OFFSET)?;
        let ttl = read_u32(buf, TTL_OFFSET)?;
        let header_len = read_u16(buf, HEADER_LEN_OFFSET)? as usize;

        let header_end = HEADER_OFFSET + header_len;
        let header_block = buf.get(HEADER_OFFSET..header_end).ok_or(CodecError::Corrupt)?;
        let headers = decode_header_block(header_block)?;

        let mut at = header_end;
        let body = read_variant(buf, &mut at)?;
        let gzip_body = read_variant(buf, &mut at)?;
        let br_body = read_variant(buf, &mut at)?;
        if at != buf.len() {
            return Err(CodecError::Corrupt);
        }

        Ok(CachedResponse {
            created_at,
            status_code,
            ttl,
            headers,
            body,
            gzip_body,
            br_body,
        })
    }

    /// Reads `created_at` and `ttl` from a packed record's fixed prefix.
    ///
    /// The expiry sweep calls this against borrowed store values so a full
    /// unpack is never paid for entries that are merely being aged out.
    pub fn decode_expiry(buf: &[u8]) -> Result<(u32, u32), CodecError> {
        Ok((
            read_u32(buf, CREATED_AT_OFFSET)?,
            read_u32(buf, TTL_OFFSET)?,
        ))
    }

    /// Whether the record has outlived `created_at + ttl`.
    ///
    /// Readers treat an expired record as absent.
    pub fn is_expired(&self, now: u32) -> bool {
        now > self.created_at.saturating_add(self.ttl)
    }

    fn compress_flag(&self) -> u16 {
        let mut flag = 0;
        if !self.body.is_empty() {
            flag |= FLAG_RAW;
        }
        if !self.gzip_body.is_empty() {
            flag |= FLAG_GZIP;
        }
        if !self.br_body.is_empty() {
            flag |= FLAG_BROTLI;
        }
        flag
    }
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16, CodecError> {
    let bytes = buf.get(at..at + 2).ok_or(CodecError::Corrupt)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, CodecError> {
    let bytes = buf.get(at..at + 4).ok_or(CodecError::Corrupt)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_variant(buf: &[u8], at: &mut usize) -> Result<Bytes, CodecError> {
    let len = read_u32(buf, *at)? as usize;
    *at += 4;
    let data = buf.get(*at..*at + len).ok_or(CodecError::Corrupt)?;
    *at += len;
    Ok(Bytes::copy_from_slice(data))
}

fn encode_header_block(headers: &HeaderMap) -> Result<Vec<u8>, CodecError> {
    let mut block = Vec::new();
    for (name, value) in headers {
        let name = name.as_str().as_bytes();
        let value = value.as_bytes();
        let name_len = u16::try_from(name.len())
            .map_err(|_| CodecError::HeaderTooLarge { len: name.len() })?;
        let value_len = u16::try_from(value.len())
            .map_err(|_| CodecError::HeaderTooLarge { len: value.len() })?;
        block.extend_from_slice(&name_len.to_be_bytes());
        block.extend_from_slice(name);
        block.extend_from_slice(&value_len.to_be_bytes());
        block.extend_from_slice(value);
    }
    Ok(block)
}

fn decode_header_block(block: &[u8]) -> Result<HeaderMap, CodecError> {
    let mut headers = HeaderMap::new();
    let mut at = 0;
    while at < block.len() {
        let name_len = read_u16(block, at)? as usize;
        at += 2;
        let name = block.get(at..at + name_len).ok_or(CodecError::Corrupt)?;
        at += name_len;
        let value_len = read_u16(block, at)? as usize;
        at += 2;
        let value = block.get(at..at + value_len).ok_or(CodecError::Corrupt)?;
        at += value_len;

        let name = HeaderName::from_bytes(name).map_err(|_| CodecError::Corrupt)?;
        let value = HeaderValue::from_bytes(value).map_err(|_| CodecError::Corrupt)?;
        headers.append(name, value);
    }
    Ok(headers)
}

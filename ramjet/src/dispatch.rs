//! Content-encoding dispatch.
//!
//! Two jobs, both driven by the configured compression policy:
//!
//! - **Store path** ([`Dispatcher::prepare`]): before a fetched response is
//!   saved, decide which body variants to persist. Small bodies stay raw;
//!   compressible bodies get gzip and brotli variants, after which the raw
//!   copy is dropped; a gzip-only upstream body is decompressed once to
//!   feed the brotli encoder.
//! - **Serve path** ([`Dispatcher::dispatch`]): given the cache decision and
//!   the request's `Accept-Encoding`, pick a variant, decompressing on the
//!   fly when the client accepts none of the precomputed ones, and write
//!   the response with its `X-Status`, `Age`, and encoding headers.
//!
//! Compression cost sits on the store path on purpose: it is paid once per
//! cache fill, never per served request.

use bytes::Bytes;
use http::header::{
    AGE, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, DATE, HeaderName,
    HeaderValue, TRANSFER_ENCODING,
};
use http::{Response, StatusCode};
use ramjet_core::{CacheStatus, CachedResponse, CodecError, clock, compress, status_has_body};
use regex::Regex;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::CacheError;

/// Response header exposing the cache decision for the request.
pub const X_STATUS: HeaderName = HeaderName::from_static("x-status");

/// Headers recomputed or meaningless on replay, stripped before a response
/// is packed.
const STRIPPED_HEADERS: [HeaderName; 5] = [
    CONNECTION,
    CONTENT_ENCODING,
    CONTENT_LENGTH,
    DATE,
    TRANSFER_ENCODING,
];

/// What the store path decided about a prepared response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Persist the response as prepared.
    Store,
    /// The response turned out to have nothing servable; mark the key
    /// uncacheable instead of storing it.
    HitForPass,
}

/// Selects body variants and writes HTTP responses for cache outcomes.
#[derive(Debug)]
pub struct Dispatcher {
    compress_types: Vec<Regex>,
    compress_min_length: usize,
    compress_level: u32,
}

impl Dispatcher {
    /// Builds a dispatcher from configuration, compiling the content-type
    /// patterns.
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let compress_types = config
            .compress_types
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Dispatcher {
            compress_types,
            compress_min_length: config.compress_min_length,
            compress_level: config.compress_level,
        })
    }

    /// Whether a content type is worth compressing.
    pub fn is_compressible(&self, content_type: &str) -> bool {
        self.compress_types
            .iter()
            .any(|pattern| pattern.is_match(content_type))
    }

    /// Prepares a fetched response for storage.
    ///
    /// Strips replay-hostile headers, then applies the compression policy:
    /// no-body statuses and non-compressible content types are stored as
    /// they arrived; bodies under the minimum length keep only their raw
    /// variant; anything else gets gzip and brotli variants built once,
    /// here. Compression failures are absorbed — the raw variant is simply
    /// kept.
    pub fn prepare(&self, response: &mut CachedResponse) -> PrepareOutcome {
        for name in &STRIPPED_HEADERS {
            response.headers.remove(name);
        }
        if !status_has_body(response.status_code) {
            return PrepareOutcome::Store;
        }
        let content_type = header_str(response, CONTENT_TYPE);
        if !self.is_compressible(&content_type) {
            return PrepareOutcome::Store;
        }

        // An upstream that already gzips hands over no raw bytes; recover
        // them once to feed the brotli encoder.
        let raw = if response.body.is_empty() && !response.gzip_body.is_empty() {
            match compress::gunzip(&response.gzip_body) {
                Ok(raw) => raw,
                Err(err) => {
                    debug!(%err, "upstream gzip undecodable, stored as-is");
                    return PrepareOutcome::Store;
                }
            }
        } else {
            response.body.clone()
        };

        if raw.is_empty() {
            return PrepareOutcome::HitForPass;
        }
        if raw.len() < self.compress_min_length {
            return PrepareOutcome::Store;
        }

        if response.gzip_body.is_empty() {
            match compress::gzip(&raw, self.compress_level) {
                Ok(gzip_body) if !gzip_body.is_empty() => {
                    // With a gzip variant stored, the raw copy is redundant:
                    // clients that accept nothing get a decode on demand.
                    response.gzip_body = gzip_body;
                    response.body = Bytes::new();
                }
                Ok(_) => {}
                Err(err) => debug!(%err, "gzip failed, raw variant kept"),
            }
        }
        if response.br_body.is_empty() {
            match compress::brotli_encode(&raw, self.compress_level) {
                Ok(br_body) => response.br_body = br_body,
                Err(err) => debug!(%err, "brotli failed"),
            }
        }
        PrepareOutcome::Store
    }

    /// Writes the HTTP response for one cache outcome.
    ///
    /// `fresh` means the caller already established that the client's
    /// conditional headers are satisfied; the reply is then `304` with no
    /// body. Otherwise the record is required — a missing one is a facade
    /// bug surfaced as [`CacheError::CacheInvalid`].
    pub fn dispatch(
        &self,
        status: CacheStatus,
        record: Option<&CachedResponse>,
        accept_encoding: &str,
        fresh: bool,
    ) -> Result<Response<Bytes>, CacheError> {
        if fresh {
            let mut response = Response::new(Bytes::new());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            response
                .headers_mut()
                .insert(X_STATUS, HeaderValue::from_static(status.as_str()));
            return Ok(response);
        }

        let record = record.ok_or(CacheError::CacheInvalid)?;
        let status_code = StatusCode::from_u16(record.status_code)
            .map_err(|_| CacheError::Codec(CodecError::Corrupt))?;
        let (body, encoding) = self.select_variant(record, accept_encoding)?;

        let mut response = Response::new(Bytes::new());
        *response.status_mut() = status_code;
        let headers = response.headers_mut();
        for (name, value) in record.headers.iter() {
            headers.append(name, value.clone());
        }
        if status == CacheStatus::Cacheable {
            let age = clock::unix_seconds().saturating_sub(record.created_at);
            headers.insert(AGE, HeaderValue::from(age));
        }
        headers.insert(X_STATUS, HeaderValue::from_static(status.as_str()));
        if let Some(encoding) = encoding {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
        }
        // No Content-Length on 204 and friends.
        if status_has_body(record.status_code) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        }
        *response.body_mut() = body;
        Ok(response)
    }

    fn select_variant(
        &self,
        record: &CachedResponse,
        accept_encoding: &str,
    ) -> Result<(Bytes, Option<&'static str>), CacheError> {
        if !status_has_body(record.status_code) {
            return Ok((Bytes::new(), None));
        }
        // A non-compressible content type is served as if the client
        // accepted no encodings at all, even when compressed variants exist.
        let content_type = header_str(record, CONTENT_TYPE);
        let accept = if self.is_compressible(&content_type) {
            accept_encoding
        } else {
            ""
        };

        if accepts(accept, "br") && !record.br_body.is_empty() {
            return Ok((record.br_body.clone(), Some("br")));
        }
        if accepts(accept, "gzip") && !record.gzip_body.is_empty() {
            return Ok((record.gzip_body.clone(), Some("gzip")));
        }
        if !record.body.is_empty() {
            return Ok((record.body.clone(), None));
        }
        if !record.gzip_body.is_empty() {
            return Ok((compress::gunzip(&record.gzip_body)?, None));
        }
        if !record.br_body.is_empty() {
            return Ok((compress::brotli_decode(&record.br_body)?, None));
        }
        Err(CacheError::BodyContentNotFound)
    }
}

fn header_str(record: &CachedResponse, name: HeaderName) -> String {
    record
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Whether an `Accept-Encoding` header lists the given coding, ignoring
/// quality parameters.
fn accepts(accept_encoding: &str, token: &str) -> bool {
    accept_encoding
        .split(',')
        .map(|entry| entry.split(';').next().unwrap_or_default().trim())
        .any(|entry| entry == token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ramjet_core::clock::unix_seconds;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&CacheConfig::new("/unused")).unwrap()
    }

    fn text_record(status_code: u16) -> CachedResponse {
        let mut record = CachedResponse {
            created_at: unix_seconds(),
            status_code,
            ttl: 600,
            ..Default::default()
        };
        record
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        record
    }

    fn long_body() -> Bytes {
        Bytes::from("needs to be well past the minimum compression length ".repeat(40))
    }

    #[test]
    fn accept_encoding_tokens() {
        assert!(accepts("gzip, deflate, br", "br"));
        assert!(accepts("gzip;q=0.5, br;q=1.0", "gzip"));
        assert!(!accepts("gzip, deflate", "br"));
        assert!(!accepts("", "gzip"));
    }

    #[test]
    fn brotli_variant_served_when_accepted() {
        let mut record = text_record(200);
        record.br_body = compress::brotli_encode(&long_body(), 6).unwrap();

        let response = dispatcher()
            .dispatch(
                CacheStatus::Cacheable,
                Some(&record),
                "gzip, deflate, br",
                false,
            )
            .unwrap();
        assert_eq!(response.headers()[CONTENT_ENCODING], "br");
        assert_eq!(response.body(), &record.br_body);
    }

    #[test]
    fn brotli_only_record_is_decoded_for_clients_without_br() {
        let mut record = text_record(200);
        record.br_body = compress::brotli_encode(&long_body(), 6).unwrap();

        let response = dispatcher()
            .dispatch(CacheStatus::Cacheable, Some(&record), "gzip, deflate", false)
            .unwrap();
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(response.body(), &long_body());
    }

    #[test]
    fn gzip_variant_served_when_brotli_absent() {
        let mut record = text_record(200);
        record.gzip_body = compress::gzip(&long_body(), 6).unwrap();

        let response = dispatcher()
            .dispatch(
                CacheStatus::Cacheable,
                Some(&record),
                "gzip, deflate, br",
                false,
            )
            .unwrap();
        assert_eq!(response.headers()[CONTENT_ENCODING], "gzip");
        assert_eq!(response.body(), &record.gzip_body);
    }

    #[test]
    fn non_compressible_type_forces_raw() {
        let mut record = text_record(200);
        record
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        record.body = long_body();
        record.gzip_body = compress::gzip(&long_body(), 6).unwrap();

        let response = dispatcher()
            .dispatch(CacheStatus::Cacheable, Some(&record), "gzip, br", false)
            .unwrap();
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        assert_eq!(response.body(), &long_body());
    }

    #[test]
    fn no_body_status_sends_empty_body() {
        let record = text_record(204);
        let response = dispatcher()
            .dispatch(CacheStatus::Cacheable, Some(&record), "gzip, br", false)
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.body().is_empty());
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
        assert!(response.headers().get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn fresh_request_gets_304_with_no_body() {
        let response = dispatcher()
            .dispatch(CacheStatus::Cacheable, None, "gzip", true)
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.body().is_empty());
        assert_eq!(response.headers()[&X_STATUS], "cacheable");
    }

    #[test]
    fn x_status_and_age_are_set_on_hits() {
        let mut record = text_record(200);
        record.created_at = unix_seconds() - 10;
        record.body = long_body();

        let response = dispatcher()
            .dispatch(CacheStatus::Cacheable, Some(&record), "", false)
            .unwrap();
        assert_eq!(response.headers()[&X_STATUS], "cacheable");
        let age: u32 = response.headers()[AGE].to_str().unwrap().parse().unwrap();
        assert!(age >= 10);
        assert_eq!(
            response.headers()[CONTENT_LENGTH].to_str().unwrap(),
            long_body().len().to_string()
        );
    }

    #[test]
    fn fetching_dispatch_carries_no_age() {
        let mut record = text_record(200);
        record.created_at = unix_seconds() - 10;
        record.body = long_body();

        let response = dispatcher()
            .dispatch(CacheStatus::Fetching, Some(&record), "", false)
            .unwrap();
        assert_eq!(response.headers()[&X_STATUS], "fetching");
        assert!(response.headers().get(AGE).is_none());
    }

    #[test]
    fn missing_record_is_a_dispatch_bug() {
        assert!(matches!(
            dispatcher().dispatch(CacheStatus::Cacheable, None, "", false),
            Err(CacheError::CacheInvalid)
        ));
    }

    #[test]
    fn all_variants_empty_on_body_status_is_an_error() {
        let record = text_record(200);
        assert!(matches!(
            dispatcher().dispatch(CacheStatus::Cacheable, Some(&record), "gzip", false),
            Err(CacheError::BodyContentNotFound)
        ));
    }

    #[test]
    fn short_body_skips_compression() {
        let mut record = text_record(200);
        record.body = Bytes::from_static(b"abcd");

        assert_eq!(dispatcher().prepare(&mut record), PrepareOutcome::Store);
        assert_eq!(record.body, "abcd");
        assert!(record.gzip_body.is_empty());
        assert!(record.br_body.is_empty());
    }

    #[test]
    fn long_compressible_body_gets_both_variants() {
        let mut record = text_record(200);
        record.body = long_body();

        assert_eq!(dispatcher().prepare(&mut record), PrepareOutcome::Store);
        // Raw is dropped once the gzip variant exists.
        assert!(record.body.is_empty());
        assert_eq!(compress::gunzip(&record.gzip_body).unwrap(), long_body());
        assert_eq!(
            compress::brotli_decode(&record.br_body).unwrap(),
            long_body()
        );
    }

    #[test]
    fn gzip_only_upstream_derives_brotli() {
        let mut record = text_record(200);
        record.gzip_body = compress::gzip(&long_body(), 6).unwrap();

        assert_eq!(dispatcher().prepare(&mut record), PrepareOutcome::Store);
        assert!(record.body.is_empty());
        assert_eq!(
            compress::brotli_decode(&record.br_body).unwrap(),
            long_body()
        );
    }

    #[test]
    fn undecodable_upstream_gzip_is_stored_as_is() {
        let mut record = text_record(200);
        record.gzip_body = Bytes::from_static(b"not actually gzip");

        assert_eq!(dispatcher().prepare(&mut record), PrepareOutcome::Store);
        assert_eq!(record.gzip_body, "not actually gzip");
        assert!(record.br_body.is_empty());
    }

    #[test]
    fn empty_compressible_body_becomes_hit_for_pass() {
        let mut record = text_record(200);
        assert_eq!(
            dispatcher().prepare(&mut record),
            PrepareOutcome::HitForPass
        );
    }

    #[test]
    fn non_compressible_body_is_stored_untouched() {
        let mut record = text_record(200);
        record
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        record.body = long_body();

        assert_eq!(dispatcher().prepare(&mut record), PrepareOutcome::Store);
        assert_eq!(record.body, long_body());
        assert!(record.gzip_body.is_empty());
    }

    #[test]
    fn replay_hostile_headers_are_stripped() {
        let mut record = text_record(204);
        record
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from_static("12"));
        record
            .headers
            .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        record
            .headers
            .insert("x-app", HeaderValue::from_static("kept"));

        dispatcher().prepare(&mut record);
        assert!(record.headers.get(CONTENT_LENGTH).is_none());
        assert!(record.headers.get(CONNECTION).is_none());
        assert_eq!(record.headers.get("x-app").unwrap(), "kept");
    }
}

//! HTTP layer: request/response types, the transport trait with its retry
//! wrapper, and the protocol request builder.

use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};

pub mod client;
mod creator;
mod request;
mod response;

pub use client::{HttpClient, HttpTransport, NetworkStats, TransportError};
pub use creator::ProtocolRequestCreator;
pub use request::{HttpMethod, HttpRequest, RequestError};
pub use response::{HttpResponse, HttpResponseBuilder};

pub const CONTENT_TYPE_HDR: &str = "Content-Type";
pub const CONTENT_LENGTH_HDR: &str = "Content-Length";
pub const CONTENT_ENCODING_HDR: &str = "Content-Encoding";
pub const ACCEPT_ENCODING_HDR: &str = "Accept-Encoding";
pub const GZIP_ENCODING: &str = "gzip";
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";
pub const IDEMPOTENCY_KEY_HDR: &str = "odp-idempotency-key";
pub const OWNER_ID_DIGEST_HDR: &str = "fcp-owner-id-digest";

/// Statuses treated as success by the protocol.
pub const HTTP_OK_STATUS: [u16; 2] = [200, 201];
/// Accepted as a non-fatal "unauthenticated" signal by auth-aware call
/// sites, never as a protocol success.
pub const HTTP_UNAUTHENTICATED_STATUS: u16 = 401;

pub(crate) fn is_ok_status(status: u16) -> bool {
    HTTP_OK_STATUS.contains(&status)
}

/// Joins a base URI and a path suffix with exactly one `/` between them.
///
/// The suffix must be non-empty and carry a leading `/`; a trailing `/` on
/// the base is dropped.
pub fn join_base_uri_with_suffix(base_uri: &str, suffix: &str) -> Result<String, RequestError> {
    if suffix.is_empty() || !suffix.starts_with('/') {
        return Err(RequestError::InvalidUriSuffix(suffix.to_string()));
    }
    Ok(format!("{}{}", base_uri.trim_end_matches('/'), suffix))
}

/// Compresses `data` with gzip.
pub fn compress_with_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len()), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses gzip-encoded `data`.
pub fn uncompress_with_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_base_uri_with_suffix() {
        assert_eq!(
            join_base_uri_with_suffix("https://x", "/v1/y").unwrap(),
            "https://x/v1/y"
        );
        assert_eq!(
            join_base_uri_with_suffix("https://x/", "/v1/y").unwrap(),
            "https://x/v1/y"
        );
    }

    #[test]
    fn test_join_rejects_bad_suffix() {
        assert!(join_base_uri_with_suffix("https://x", "").is_err());
        assert!(join_base_uri_with_suffix("https://x", "v1/y").is_err());
    }

    #[test]
    fn test_gzip_round_trip() {
        let data = b"some checkpoint bytes".repeat(64);
        let compressed = compress_with_gzip(&data).unwrap();
        assert_ne!(compressed, data);
        assert_eq!(uncompress_with_gzip(&compressed).unwrap(), data);
    }

    #[test]
    fn test_uncompress_rejects_garbage() {
        assert!(uncompress_with_gzip(b"definitely not gzip").is_err());
    }
}

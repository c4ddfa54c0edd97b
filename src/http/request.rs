use std::collections::HashMap;

use thiserror::Error;

use super::CONTENT_LENGTH_HDR;

const HTTPS_SCHEME: &str = "https://";
// Loopback is permitted so tests and local integrations can run without TLS.
const LOCALHOST_PREFIX: &str = "http://localhost:";
const LOOPBACK_PREFIX: &str = "http://127.0.0.1:";

/// Error raised when a request cannot be constructed from the given
/// arguments. Always local, never retried.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("non-HTTPS URIs are not supported: {0}")]
    NonHttpsUri(String),

    #[error("Content-Length header must not be provided by the caller")]
    CallerContentLength,

    #[error("request method {0} does not allow a request body")]
    BodyNotAllowed(HttpMethod),

    #[error("uri suffix must be non-empty and have a leading '/': {0:?}")]
    InvalidUriSuffix(String),

    #[error("missing ForwardingInfo.target_uri_prefix")]
    MissingTargetUriPrefix,
}

/// The supported HTTP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum HttpMethod {
    #[display(fmt = "GET")]
    Get,
    #[display(fmt = "POST")]
    Post,
    #[display(fmt = "PUT")]
    Put,
}

/// A validated request to a federated compute endpoint.
///
/// Construction enforces the transport-level invariants: HTTPS (or local
/// loopback) only, no caller-supplied `Content-Length`, and a body only on
/// `POST`/`PUT`. The `Content-Length` header is computed from the body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    uri: String,
    method: HttpMethod,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(
        uri: String,
        method: HttpMethod,
        mut headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Result<Self, RequestError> {
        if !uri.starts_with(HTTPS_SCHEME)
            && !uri.starts_with(LOCALHOST_PREFIX)
            && !uri.starts_with(LOOPBACK_PREFIX)
        {
            return Err(RequestError::NonHttpsUri(uri));
        }
        if headers.contains_key(CONTENT_LENGTH_HDR) {
            return Err(RequestError::CallerContentLength);
        }
        if !body.is_empty() {
            if !matches!(method, HttpMethod::Post | HttpMethod::Put) {
                return Err(RequestError::BodyNotAllowed(method));
            }
            headers.insert(CONTENT_LENGTH_HDR.to_string(), body.len().to_string());
        }
        Ok(HttpRequest {
            uri,
            method,
            headers,
            body,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_headers() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_rejects_plain_http() {
        let err = HttpRequest::new(
            "http://example.com/x".to_string(),
            HttpMethod::Get,
            no_headers(),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RequestError::NonHttpsUri(_)));
    }

    #[test]
    fn test_allows_localhost() {
        assert!(HttpRequest::new(
            "http://localhost:8080/x".to_string(),
            HttpMethod::Get,
            no_headers(),
            Vec::new(),
        )
        .is_ok());
    }

    #[test]
    fn test_rejects_caller_content_length() {
        let mut headers = no_headers();
        headers.insert("Content-Length".to_string(), "12".to_string());
        let err = HttpRequest::new(
            "https://example.com/x".to_string(),
            HttpMethod::Post,
            headers,
            b"body".to_vec(),
        )
        .unwrap_err();
        assert!(matches!(err, RequestError::CallerContentLength));
    }

    #[test]
    fn test_rejects_body_on_get() {
        let err = HttpRequest::new(
            "https://example.com/x".to_string(),
            HttpMethod::Get,
            no_headers(),
            b"body".to_vec(),
        )
        .unwrap_err();
        assert!(matches!(err, RequestError::BodyNotAllowed(HttpMethod::Get)));
    }

    #[test]
    fn test_computes_content_length() {
        let request = HttpRequest::new(
            "https://example.com/x".to_string(),
            HttpMethod::Put,
            no_headers(),
            b"eight by".to_vec(),
        )
        .unwrap();
        assert_eq!(request.headers().get("Content-Length").unwrap(), "8");
    }

    #[test]
    fn test_empty_body_sets_no_content_length() {
        let request = HttpRequest::new(
            "https://example.com/x".to_string(),
            HttpMethod::Post,
            no_headers(),
            Vec::new(),
        )
        .unwrap();
        assert!(!request.headers().contains_key("Content-Length"));
    }
}

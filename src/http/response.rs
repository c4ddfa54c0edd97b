use std::{collections::HashMap, path::PathBuf};

use super::{CONTENT_ENCODING_HDR, GZIP_ENCODING};

/// A response from a federated compute endpoint. Immutable once built.
///
/// The payload is either held in memory or, for large downloads, stored in a
/// temporary file whose path and byte count are recorded instead.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status_code: u16,
    headers: HashMap<String, Vec<String>>,
    payload: Vec<u8>,
    payload_file: Option<PathBuf>,
    downloaded_size: u64,
}

impl HttpResponse {
    /// Starts building a response. The status code is mandatory, everything
    /// else defaults to empty.
    pub fn builder(status_code: u16) -> HttpResponseBuilder {
        HttpResponseBuilder {
            response: HttpResponse {
                status_code,
                headers: HashMap::new(),
                payload: Vec::new(),
                payload_file: None,
                downloaded_size: 0,
            },
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn headers(&self) -> &HashMap<String, Vec<String>> {
        &self.headers
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Path of the file-backed payload, if the request asked for one.
    pub fn payload_file(&self) -> Option<&PathBuf> {
        self.payload_file.as_ref()
    }

    /// Bytes written to the file-backed payload.
    pub fn downloaded_size(&self) -> u64 {
        self.downloaded_size
    }

    /// Whether the response body is gzip-encoded. Header names are matched
    /// case-insensitively since transports may normalize them.
    pub fn is_compressed(&self) -> bool {
        self.headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(CONTENT_ENCODING_HDR))
            .any(|(_, values)| values.iter().any(|v| v.contains(GZIP_ENCODING)))
    }
}

pub struct HttpResponseBuilder {
    response: HttpResponse,
}

impl HttpResponseBuilder {
    pub fn headers(mut self, headers: HashMap<String, Vec<String>>) -> Self {
        self.response.headers = headers;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.response.payload = payload;
        self
    }

    pub fn payload_file(mut self, path: PathBuf, downloaded_size: u64) -> Self {
        self.response.payload_file = Some(path);
        self.response.downloaded_size = downloaded_size;
        self
    }

    pub fn build(self) -> HttpResponse {
        self.response
    }
}

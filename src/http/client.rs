//! The transport seam and its retry wrapper.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::settings::Flags;

use super::{is_ok_status, HttpRequest, HttpResponse, RequestError, CONTENT_LENGTH_HDR};

#[cfg(feature = "reqwest-client")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest-client")))]
pub mod reqwest;

/// Error raised while performing a request. Connection-level failures are
/// retryable at the caller's discretion; the rest are not.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed request URI: {0}")]
    MalformedUri(String),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("request retries exhausted")]
    RetriesExhausted,
}

/// A basic HTTP interface that [`HttpClient`] backends must implement.
///
/// `perform` reads the whole payload into memory (the error body too, on a
/// non-2xx status, so callers can inspect it). `perform_into_file` streams
/// the payload of a successful response to a temporary file instead, for
/// large downloads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    async fn perform_into_file(&self, request: HttpRequest)
        -> Result<HttpResponse, TransportError>;
}

/// Network byte counters, fed from estimated wire sizes of every request and
/// response that goes through an [`HttpClient`]. Telemetry only; the
/// counters include the request line and headers, not just payloads.
#[derive(Debug, Default)]
pub struct NetworkStats {
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl NetworkStats {
    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded.load(Ordering::Relaxed)
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }

    pub(crate) fn record_request(&self, request: &HttpRequest) {
        self.bytes_uploaded
            .fetch_add(estimated_sent_bytes(request), Ordering::Relaxed);
    }

    pub(crate) fn record_response(&self, response: &HttpResponse) {
        self.bytes_downloaded
            .fetch_add(estimated_received_bytes(response), Ordering::Relaxed);
    }
}

/// Estimates the wire size of a request: request line, headers and body.
pub fn estimated_sent_bytes(request: &HttpRequest) -> u64 {
    let mut total = (request.method().to_string().len()
        + " ".len()
        + request.uri().len()
        + " HTTP/1.1\r\n".len()) as u64;
    for (name, value) in request.headers() {
        total += (name.len() + ": ".len() + value.len() + "\r\n".len()) as u64;
    }
    total += request.body().len() as u64;
    total
}

/// Estimates the wire size of a response from its headers, preferring the
/// `Content-Length` header over the in-memory payload size.
pub fn estimated_received_bytes(response: &HttpResponse) -> u64 {
    let mut total = 0u64;
    let mut found_content_length = false;
    for (name, values) in response.headers() {
        for value in values {
            total += (name.len() + ": ".len() + value.len()) as u64;
        }
        if name.eq_ignore_ascii_case(CONTENT_LENGTH_HDR) {
            if let Some(length) = values.first().and_then(|v| v.parse::<u64>().ok()) {
                total += length;
                found_content_length = true;
            }
        }
    }
    if !found_content_length {
        total += if response.payload_file().is_some() {
            response.downloaded_size()
        } else {
            response.payload().len() as u64
        };
    }
    total
}

/// Wraps an [`HttpTransport`] with retry-with-backoff and byte accounting.
///
/// A request is attempted up to `http_request_retry_limit` times. Transport
/// errors and non-OK statuses are both retried, with a jittered,
/// per-attempt-doubling delay in between; the final non-OK response is
/// returned as-is so the protocol layer can attach its stage label to the
/// status.
pub struct HttpClient<T> {
    transport: T,
    retry_limit: u32,
    base_delay: Duration,
    jitter_percent: f32,
    stats: NetworkStats,
}

impl<T> HttpClient<T>
where
    T: HttpTransport,
{
    pub fn new(transport: T, flags: &Flags) -> Self {
        HttpClient {
            transport,
            retry_limit: flags.http_request_retry_limit,
            base_delay: Duration::from_millis(flags.http_retry_base_delay_millis),
            jitter_percent: flags.http_retry_delay_jitter_percent,
            stats: NetworkStats::default(),
        }
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub async fn perform_with_retry(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        self.retry(request, false).await
    }

    pub async fn perform_into_file_with_retry(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        self.retry(request, true).await
    }

    async fn retry(
        &self,
        request: HttpRequest,
        into_file: bool,
    ) -> Result<HttpResponse, TransportError> {
        let attempts = self.retry_limit.max(1);
        let mut last_response = None;
        for attempt in 1..=attempts {
            self.stats.record_request(&request);
            let result = if into_file {
                self.transport.perform_into_file(request.clone()).await
            } else {
                self.transport.perform(request.clone()).await
            };
            match result {
                Ok(response) => {
                    self.stats.record_response(&response);
                    if is_ok_status(response.status_code()) {
                        return Ok(response);
                    }
                    debug!(
                        status = response.status_code(),
                        attempt, "request returned non-OK status"
                    );
                    last_response = Some(response);
                }
                Err(e) => {
                    if attempt == attempts {
                        return Err(e);
                    }
                    warn!(error = %e, attempt, "request failed, will retry");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay(attempt)).await;
            }
        }
        // Every attempt produced a non-OK response; hand back the last one
        // so the caller can inspect the server's error body.
        last_response.ok_or(TransportError::RetriesExhausted)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as f64 * f64::from(1u32 << (attempt - 1).min(16));
        let jitter = base * f64::from(self.jitter_percent);
        let delay = rand::thread_rng().gen_range((base - jitter)..=(base + jitter));
        Duration::from_millis(delay.max(0.0) as u64)
    }
}

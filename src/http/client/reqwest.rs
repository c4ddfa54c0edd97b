//! A [`HttpTransport`] backed by `reqwest`.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::{
    http::{is_ok_status, HttpMethod, HttpRequest, HttpResponse},
    settings::Flags,
};

use super::{HttpTransport, TransportError};

/// Production transport. Applies the configured connect/read timeouts to
/// every request and follows redirects.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(flags: &Flags) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(flags.connect_timeout())
            // Covers reading the response as well; reqwest has no separate
            // read timeout on all versions we support.
            .timeout(flags.read_timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(ReqwestTransport { client })
    }

    async fn send(&self, request: &HttpRequest) -> Result<reqwest::Response, TransportError> {
        let url = reqwest::Url::parse(request.uri())
            .map_err(|e| TransportError::MalformedUri(format!("{}: {}", request.uri(), e)))?;
        let method = match request.method() {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        };
        let mut builder = self.client.request(method, url);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().to_vec());
        }
        builder
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}

fn collect_headers(response: &reqwest::Response) -> HashMap<String, Vec<String>> {
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    headers
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn perform(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self.send(&request).await?;
        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        // The body of a non-2xx response is captured too, so callers can
        // inspect server error messages.
        let payload = response
            .bytes()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(HttpResponse::builder(status)
            .headers(headers)
            .payload(payload.to_vec())
            .build())
    }

    async fn perform_into_file(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse, TransportError> {
        let response = self.send(&request).await?;
        let status = response.status().as_u16();
        let headers = collect_headers(&response);
        if !is_ok_status(status) {
            let payload = response
                .bytes()
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;
            return Ok(HttpResponse::builder(status)
                .headers(headers)
                .payload(payload.to_vec())
                .build());
        }

        let path = std::env::temp_dir().join(format!("fcp-input-{}.tmp", uuid::Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::Connection(e.to_string()))?;
            downloaded += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(HttpResponse::builder(status)
            .headers(headers)
            .payload_file(path, downloaded)
            .build())
    }
}

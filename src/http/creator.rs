use std::collections::HashMap;

use crate::proto::ForwardingInfo;

use super::{
    join_base_uri_with_suffix, HttpMethod, HttpRequest, RequestError, CONTENT_TYPE_HDR,
    PROTOBUF_CONTENT_TYPE,
};

/// Builds [`HttpRequest`]s against a base URI, carrying a set of default
/// headers on every request it creates.
#[derive(Debug, Clone)]
pub struct ProtocolRequestCreator {
    request_base_uri: String,
    default_headers: HashMap<String, String>,
}

impl ProtocolRequestCreator {
    pub fn new(request_base_uri: String, default_headers: HashMap<String, String>) -> Self {
        ProtocolRequestCreator {
            request_base_uri,
            default_headers,
        }
    }

    /// Builds a creator from server-provided forwarding info, validating
    /// that the target URI prefix is present.
    pub fn from_forwarding_info(forwarding_info: &ForwardingInfo) -> Result<Self, RequestError> {
        if forwarding_info.target_uri_prefix.is_empty() {
            return Err(RequestError::MissingTargetUriPrefix);
        }
        Ok(ProtocolRequestCreator::new(
            forwarding_info.target_uri_prefix.clone(),
            forwarding_info.extra_request_headers.clone(),
        ))
    }

    /// Creates a request for `uri_suffix`, merging the default headers with
    /// `extra_headers` (per-call headers win on conflict). When
    /// `is_protobuf_encoded` and the body is non-empty, the protobuf
    /// content type is set.
    pub fn create_proto_request(
        &self,
        uri_suffix: &str,
        method: HttpMethod,
        extra_headers: HashMap<String, String>,
        body: Vec<u8>,
        is_protobuf_encoded: bool,
    ) -> Result<HttpRequest, RequestError> {
        let mut headers = self.default_headers.clone();
        headers.extend(extra_headers);
        if is_protobuf_encoded && !body.is_empty() {
            headers.insert(
                CONTENT_TYPE_HDR.to_string(),
                PROTOBUF_CONTENT_TYPE.to_string(),
            );
        }
        let uri = join_base_uri_with_suffix(&self.request_base_uri, uri_suffix)?;
        HttpRequest::new(uri, method, headers, body)
    }
}

//! Wire messages exchanged with the coordination server.
//!
//! These mirror the task-assignment protocol: a device POSTs a
//! [`CreateTaskAssignmentRequest`] to check in, downloads the plan and
//! checkpoint resources named in the [`TaskAssignment`], and PUTs a
//! [`ReportResultRequest`] (plus an optional result upload) once training
//! finished. All bodies are protobuf-encoded (`application/x-protobuf`).

/// Version information of the client issuing a check-in.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientVersion {
    /// Opaque version string, chosen by the client integration.
    #[prost(string, tag = "1")]
    pub version_code: ::prost::alloc::string::String,
}

/// Compression formats a resource (or upload) may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ResourceCompressionFormat {
    Unspecified = 0,
    Gzip = 1,
}

/// Compression formats the client is able to decode.
///
/// All clients are assumed to support uncompressed payloads.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResourceCapabilities {
    #[prost(enumeration = "ResourceCompressionFormat", repeated, tag = "1")]
    pub supported_compression_formats: ::prost::alloc::vec::Vec<i32>,
}

/// Body of `POST {base}/v1/population/{name}:create-task-assignment`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateTaskAssignmentRequest {
    #[prost(message, optional, tag = "1")]
    pub client_version: ::core::option::Option<ClientVersion>,
    #[prost(message, optional, tag = "2")]
    pub resource_capabilities: ::core::option::Option<ResourceCapabilities>,
}

/// Server-side refusal of a check-in or a result report.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RejectionInfo {
    /// Human-readable reason, for logs only.
    #[prost(string, tag = "1")]
    pub reason: ::prost::alloc::string::String,
}

/// Points subsequent requests at another server frontend.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardingInfo {
    /// URI prefix all follow-up requests must be issued against.
    #[prost(string, tag = "1")]
    pub target_uri_prefix: ::prost::alloc::string::String,
    /// Headers to attach to every follow-up request.
    #[prost(map = "string, string", tag = "2")]
    pub extra_request_headers:
        ::std::collections::HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

/// A downloadable artifact named by the task assignment.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Resource {
    #[prost(enumeration = "ResourceCompressionFormat", tag = "3")]
    pub compression_format: i32,
    #[prost(oneof = "resource::Kind", tags = "1, 2")]
    pub kind: ::core::option::Option<resource::Kind>,
}

pub mod resource {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        /// Location the resource can be fetched from with a plain GET.
        #[prost(string, tag = "1")]
        Uri(::prost::alloc::string::String),
        /// Resource data carried inline in the response.
        #[prost(bytes, tag = "2")]
        InlineResource(::prost::alloc::vec::Vec<u8>),
    }
}

/// A single unit of work handed to the device for one round.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskAssignment {
    #[prost(string, tag = "1")]
    pub population_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub task_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub aggregation_id: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub assignment_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "5")]
    pub plan: ::core::option::Option<Resource>,
    #[prost(message, optional, tag = "6")]
    pub init_checkpoint: ::core::option::Option<Resource>,
    /// Display name of the task, for logs only.
    #[prost(string, tag = "7")]
    pub task_name: ::prost::alloc::string::String,
}

/// Response to a check-in: either a rejection or a task assignment.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateTaskAssignmentResponse {
    #[prost(oneof = "create_task_assignment_response::Result", tags = "1, 2")]
    pub result: ::core::option::Option<create_task_assignment_response::Result>,
}

pub mod create_task_assignment_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        RejectionInfo(super::RejectionInfo),
        #[prost(message, tag = "2")]
        TaskAssignment(super::TaskAssignment),
    }
}

/// The plan a device executes for one task, as downloaded from the plan
/// resource. The graph payload is opaque to this crate; it is handed to the
/// training runtime as-is.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientPlan {
    #[prost(int32, tag = "1")]
    pub version: i32,
    #[prost(bytes, tag = "2")]
    pub graph: ::prost::alloc::vec::Vec<u8>,
}

/// Body of the report-result PUT.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReportResultRequest {
    #[prost(enumeration = "report_result_request::Result", tag = "1")]
    pub result: i32,
}

pub mod report_result_request {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Result {
        Unspecified = 0,
        Completed = 1,
        Failed = 2,
    }
}

/// Where and how to upload the result checkpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UploadInstruction {
    /// Destination of the `PUT` carrying the raw result bytes.
    #[prost(string, tag = "1")]
    pub upload_location: ::prost::alloc::string::String,
    /// Headers the server requires on the upload request.
    #[prost(map = "string, string", tag = "2")]
    pub extra_request_headers:
        ::std::collections::HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
    #[prost(enumeration = "ResourceCompressionFormat", tag = "3")]
    pub compression_format: i32,
}

/// Response to a result report: either a rejection or an upload instruction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReportResultResponse {
    #[prost(oneof = "report_result_response::Result", tags = "1, 2")]
    pub result: ::core::option::Option<report_result_response::Result>,
}

pub mod report_result_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        RejectionInfo(super::RejectionInfo),
        #[prost(message, tag = "2")]
        UploadInstruction(super::UploadInstruction),
    }
}

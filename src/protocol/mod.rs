//! The checkin / report-result protocol.
//!
//! One [`FederatedProtocol`] instance covers one session: a successful
//! [`issue_checkin`](FederatedProtocol::issue_checkin) caches the assignment
//! ids the server handed out, and
//! [`report_result`](FederatedProtocol::report_result) addresses its PUT with
//! them. The session is not reusable across rounds.

use std::{collections::HashMap, path::PathBuf};

use prost::Message;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    http::{
        compress_with_gzip,
        is_ok_status,
        uncompress_with_gzip,
        HttpClient,
        HttpMethod,
        HttpRequest,
        HttpResponse,
        HttpTransport,
        ProtocolRequestCreator,
        RequestError,
        TransportError,
        ACCEPT_ENCODING_HDR,
        CONTENT_ENCODING_HDR,
        CONTENT_TYPE_HDR,
        GZIP_ENCODING,
        HTTP_UNAUTHENTICATED_STATUS,
        IDEMPOTENCY_KEY_HDR,
        OCTET_STREAM_CONTENT_TYPE,
        OWNER_ID_DIGEST_HDR,
    },
    proto::{
        create_task_assignment_response,
        report_result_request,
        report_result_response,
        ClientPlan,
        ClientVersion,
        CreateTaskAssignmentRequest,
        CreateTaskAssignmentResponse,
        ReportResultRequest,
        ReportResultResponse,
        Resource,
        ResourceCapabilities,
        ResourceCompressionFormat,
        TaskAssignment,
        UploadInstruction,
    },
    scheduling::ContributionResult,
};

/// The protocol stage a failure happened in. Rendered into the stage-labeled
/// error messages, which are a diagnostic contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Stage {
    #[display(fmt = "Start task assignment")]
    StartTaskAssignment,
    #[display(fmt = "Fetch plan")]
    FetchPlan,
    #[display(fmt = "Fetch checkpoint")]
    FetchCheckpoint,
    #[display(fmt = "ReportResult")]
    ReportResult,
    #[display(fmt = "Upload result")]
    UploadResult,
}

/// Error raised during a checkin or report session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A stage got a non-OK HTTP status.
    #[error("{stage} failed: {status}")]
    Status { stage: Stage, status: u16 },

    /// The server refused the device.
    #[error("{stage} rejected by server: {reason:?}")]
    Rejected { stage: Stage, reason: String },

    /// A response payload did not parse as the expected message.
    #[error("failed to parse {what}")]
    InvalidPayload {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    /// The assignment names a population other than the one we checked in
    /// with.
    #[error("population mismatch: checked in with {requested:?}, assigned {assigned:?}")]
    PopulationMismatch {
        requested: String,
        assigned: String,
    },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Inline resources are not supported; only URIs can be fetched.
    #[error("unsupported resource kind: inline resource")]
    InlineResourceUnsupported,

    /// `report_result` was called before a successful checkin.
    #[error("no task assignment; checkin must succeed first")]
    NoAssignment,

    #[error("failed to read result file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Everything a successful checkin produced.
#[derive(Debug, Clone)]
pub struct CheckinResult {
    /// The initial model checkpoint, decompressed.
    pub checkpoint: Vec<u8>,
    /// The parsed training plan.
    pub plan: ClientPlan,
    /// The raw assignment, for logging and context.
    pub task_assignment: TaskAssignment,
}

/// Outcome of a checkin attempt.
#[derive(Debug)]
pub enum CheckinOutcome {
    Assigned(CheckinResult),
    /// The server answered 401 and the caller opted to treat that as
    /// non-fatal. The caller is expected to resolve authentication and check
    /// in again.
    Unauthenticated,
}

/// Outcome of a report attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The report went through; an upload happened if the server asked for
    /// one.
    Done,
    /// The server answered 401 and the caller opted to treat that as
    /// non-fatal.
    Unauthenticated,
}

/// What the training runtime produced, fed into the report phase.
#[derive(Debug, Clone)]
pub struct ComputationResult {
    /// File holding the updated checkpoint to upload.
    pub output_checkpoint_file: PathBuf,
    pub contribution: ContributionResult,
    /// Server-directed retry hint, if the plan carried one. Consumed by the
    /// job manager, not by the protocol.
    pub task_retry: Option<crate::scheduling::TaskRetry>,
}

#[derive(Debug, Clone)]
struct AssignmentIds {
    task_id: String,
    aggregation_id: String,
    assignment_id: String,
}

/// Drives one checkin / report session against a coordination server.
pub struct FederatedProtocol<T> {
    http_client: HttpClient<T>,
    request_creator: ProtocolRequestCreator,
    population_name: String,
    client_version: String,
    assigned: Option<AssignmentIds>,
}

impl<T> FederatedProtocol<T>
where
    T: HttpTransport,
{
    pub fn new(
        http_client: HttpClient<T>,
        server_address: String,
        population_name: String,
        client_version: String,
    ) -> Self {
        FederatedProtocol {
            http_client,
            request_creator: ProtocolRequestCreator::new(server_address, HashMap::new()),
            population_name,
            client_version,
            assigned: None,
        }
    }

    /// Checks in with the server and, if a task was assigned, fetches the
    /// plan and checkpoint resources concurrently.
    ///
    /// `owner_id` and `owner_cert_digest` identify the task owner on the
    /// wire. With `allow_unauthenticated`, a 401 yields
    /// [`CheckinOutcome::Unauthenticated`] instead of an error.
    pub async fn issue_checkin(
        &mut self,
        owner_id: &str,
        owner_cert_digest: &str,
        allow_unauthenticated: bool,
    ) -> Result<CheckinOutcome, ProtocolError> {
        let response = self.create_task_assignment(owner_id, owner_cert_digest).await?;
        if allow_unauthenticated && response.status_code() == HTTP_UNAUTHENTICATED_STATUS {
            info!(
                population = %self.population_name,
                "checkin returned 401, authentication required"
            );
            return Ok(CheckinOutcome::Unauthenticated);
        }
        validate_status(Stage::StartTaskAssignment, &response)?;

        let assignment = self.parse_task_assignment(response.payload())?;
        self.assigned = Some(AssignmentIds {
            task_id: assignment.task_id.clone(),
            aggregation_id: assignment.aggregation_id.clone(),
            assignment_id: assignment.assignment_id.clone(),
        });
        info!(
            population = %assignment.population_name,
            task = %assignment.task_name,
            assignment_id = %assignment.assignment_id,
            "task assigned"
        );

        let plan_resource = assignment
            .plan
            .as_ref()
            .ok_or(ProtocolError::MissingField("TaskAssignment.plan"))?;
        let checkpoint_resource = assignment
            .init_checkpoint
            .as_ref()
            .ok_or(ProtocolError::MissingField("TaskAssignment.init_checkpoint"))?;

        let (plan_bytes, checkpoint) = futures::future::try_join(
            self.fetch_resource(Stage::FetchPlan, plan_resource),
            self.fetch_resource(Stage::FetchCheckpoint, checkpoint_resource),
        )
        .await?;

        let plan =
            ClientPlan::decode(plan_bytes.as_slice()).map_err(|source| {
                ProtocolError::InvalidPayload {
                    what: "ClientPlan",
                    source,
                }
            })?;

        Ok(CheckinOutcome::Assigned(CheckinResult {
            checkpoint,
            plan,
            task_assignment: assignment,
        }))
    }

    /// Reports the computation outcome and, when the server's response
    /// carries an upload instruction with a non-empty location, uploads the
    /// output checkpoint. The upload decision follows the server's
    /// instruction, whatever the local outcome was.
    pub async fn report_result(
        &self,
        computation_result: &ComputationResult,
        allow_unauthenticated: bool,
    ) -> Result<ReportOutcome, ProtocolError> {
        let assigned = self.assigned.as_ref().ok_or(ProtocolError::NoAssignment)?;

        let result = match computation_result.contribution {
            ContributionResult::Success => report_result_request::Result::Completed,
            _ => report_result_request::Result::Failed,
        };
        let body = ReportResultRequest {
            result: result as i32,
        }
        .encode_to_vec();
        let suffix = format!(
            "/v1/population/{}/task/{}/aggregation/{}/task-assignment/{}:report-result",
            self.population_name, assigned.task_id, assigned.aggregation_id, assigned.assignment_id,
        );
        let request = self.request_creator.create_proto_request(
            &suffix,
            HttpMethod::Put,
            HashMap::new(),
            body,
            true,
        )?;
        let response = self.http_client.perform_with_retry(request).await?;
        if allow_unauthenticated && response.status_code() == HTTP_UNAUTHENTICATED_STATUS {
            info!(
                population = %self.population_name,
                "report returned 401, authentication required"
            );
            return Ok(ReportOutcome::Unauthenticated);
        }
        validate_status(Stage::ReportResult, &response)?;

        let report_response = ReportResultResponse::decode(response.payload()).map_err(
            |source| ProtocolError::InvalidPayload {
                what: "ReportResultResponse",
                source,
            },
        )?;
        match report_response.result {
            Some(report_result_response::Result::RejectionInfo(rejection)) => {
                Err(ProtocolError::Rejected {
                    stage: Stage::ReportResult,
                    reason: rejection.reason,
                })
            }
            Some(report_result_response::Result::UploadInstruction(instruction))
                if !instruction.upload_location.is_empty() =>
            {
                self.upload_result(&instruction, &computation_result.output_checkpoint_file)
                    .await?;
                Ok(ReportOutcome::Done)
            }
            _ => {
                debug!(
                    population = %self.population_name,
                    "no upload requested by the server"
                );
                Ok(ReportOutcome::Done)
            }
        }
    }

    async fn create_task_assignment(
        &self,
        owner_id: &str,
        owner_cert_digest: &str,
    ) -> Result<HttpResponse, ProtocolError> {
        let body = CreateTaskAssignmentRequest {
            client_version: Some(ClientVersion {
                version_code: self.client_version.clone(),
            }),
            resource_capabilities: Some(ResourceCapabilities {
                supported_compression_formats: vec![ResourceCompressionFormat::Gzip as i32],
            }),
        }
        .encode_to_vec();
        let mut headers = HashMap::new();
        headers.insert(IDEMPOTENCY_KEY_HDR.to_string(), Uuid::new_v4().to_string());
        headers.insert(
            OWNER_ID_DIGEST_HDR.to_string(),
            format!("{}-{}", owner_id, owner_cert_digest),
        );
        let suffix = format!(
            "/v1/population/{}:create-task-assignment",
            self.population_name
        );
        let request = self.request_creator.create_proto_request(
            &suffix,
            HttpMethod::Post,
            headers,
            body,
            true,
        )?;
        Ok(self.http_client.perform_with_retry(request).await?)
    }

    fn parse_task_assignment(&self, payload: &[u8]) -> Result<TaskAssignment, ProtocolError> {
        let response = CreateTaskAssignmentResponse::decode(payload).map_err(|source| {
            ProtocolError::InvalidPayload {
                what: "CreateTaskAssignmentResponse",
                source,
            }
        })?;
        let assignment = match response.result {
            Some(create_task_assignment_response::Result::TaskAssignment(assignment)) => {
                assignment
            }
            Some(create_task_assignment_response::Result::RejectionInfo(rejection)) => {
                return Err(ProtocolError::Rejected {
                    stage: Stage::StartTaskAssignment,
                    reason: rejection.reason,
                });
            }
            None => {
                return Err(ProtocolError::MissingField(
                    "CreateTaskAssignmentResponse.result",
                ));
            }
        };
        if assignment.population_name != self.population_name {
            return Err(ProtocolError::PopulationMismatch {
                requested: self.population_name.clone(),
                assigned: assignment.population_name,
            });
        }
        if assignment.task_id.is_empty() {
            return Err(ProtocolError::MissingField("TaskAssignment.task_id"));
        }
        if assignment.aggregation_id.is_empty() {
            return Err(ProtocolError::MissingField("TaskAssignment.aggregation_id"));
        }
        if assignment.assignment_id.is_empty() {
            return Err(ProtocolError::MissingField("TaskAssignment.assignment_id"));
        }
        Ok(assignment)
    }

    /// Fetches a resource named by the task assignment, decompressing gzip
    /// payloads. The plan is fetched in memory; the checkpoint is streamed
    /// to a temporary file first, since checkpoints can be large.
    async fn fetch_resource(
        &self,
        stage: Stage,
        resource: &Resource,
    ) -> Result<Vec<u8>, ProtocolError> {
        let uri = match &resource.kind {
            Some(crate::proto::resource::Kind::Uri(uri)) => uri.clone(),
            Some(crate::proto::resource::Kind::InlineResource(_)) => {
                return Err(ProtocolError::InlineResourceUnsupported);
            }
            None => return Err(ProtocolError::MissingField("Resource.kind")),
        };
        let resource_compressed =
            resource.compression_format == ResourceCompressionFormat::Gzip as i32;
        let mut headers = HashMap::new();
        if resource_compressed {
            headers.insert(ACCEPT_ENCODING_HDR.to_string(), GZIP_ENCODING.to_string());
        }
        let request = HttpRequest::new(uri, HttpMethod::Get, headers, Vec::new())?;

        let response = if stage == Stage::FetchCheckpoint {
            self.http_client.perform_into_file_with_retry(request).await?
        } else {
            self.http_client.perform_with_retry(request).await?
        };
        validate_status(stage, &response)?;

        let compressed = resource_compressed || response.is_compressed();
        let bytes = if let Some(path) = response.payload_file().cloned() {
            let bytes = tokio::fs::read(&path).await?;
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove download file");
            }
            bytes
        } else {
            response.into_payload()
        };
        if compressed {
            Ok(uncompress_with_gzip(&bytes)?)
        } else {
            Ok(bytes)
        }
    }

    async fn upload_result(
        &self,
        instruction: &UploadInstruction,
        output_checkpoint_file: &PathBuf,
    ) -> Result<(), ProtocolError> {
        let mut body = tokio::fs::read(output_checkpoint_file).await?;
        let mut headers = instruction.extra_request_headers.clone();
        if instruction.compression_format == ResourceCompressionFormat::Gzip as i32 {
            body = compress_with_gzip(&body)?;
            headers.insert(CONTENT_ENCODING_HDR.to_string(), GZIP_ENCODING.to_string());
        }
        headers.insert(
            CONTENT_TYPE_HDR.to_string(),
            OCTET_STREAM_CONTENT_TYPE.to_string(),
        );
        let request = HttpRequest::new(
            instruction.upload_location.clone(),
            HttpMethod::Put,
            headers,
            body,
        )?;
        let response = self.http_client.perform_with_retry(request).await?;
        validate_status(Stage::UploadResult, &response)?;
        debug!(
            population = %self.population_name,
            "result uploaded"
        );
        Ok(())
    }

    #[cfg(test)]
    fn with_assignment(mut self, task_id: &str, aggregation_id: &str, assignment_id: &str) -> Self {
        self.assigned = Some(AssignmentIds {
            task_id: task_id.to_string(),
            aggregation_id: aggregation_id.to_string(),
            assignment_id: assignment_id.to_string(),
        });
        self
    }
}

fn validate_status(stage: Stage, response: &HttpResponse) -> Result<(), ProtocolError> {
    if is_ok_status(response.status_code()) {
        Ok(())
    } else {
        Err(ProtocolError::Status {
            stage,
            status: response.status_code(),
        })
    }
}

#![cfg_attr(docsrs, feature(doc_cfg))]
//! Client-side building blocks for privacy-preserving federated
//! computation.
//!
//! The crate covers the two halves a device needs to take part in
//! federated training rounds:
//!
//! - the **checkin / report protocol** ([`protocol::FederatedProtocol`]):
//!   check in with a coordination server to get a task assignment, fetch
//!   the training plan and initial checkpoint concurrently, and after the
//!   (external) training run, report the outcome and upload the result
//!   checkpoint when the server asks for it;
//! - the **scheduling state machine** ([`scheduling::JobManager`]): decide
//!   when each population's next training job runs, reconciling caller
//!   requests with a persistent task store and the platform's job
//!   scheduler, honoring server retry hints, transient-failure backoff and
//!   task TTLs.
//!
//! Training itself, the persistent store and the platform scheduler are
//! external collaborators: the store and scheduler are supplied as
//! [`scheduling::TaskStore`] and [`scheduling::JobScheduler`]
//! implementations, and the protocol hands training inputs out and takes
//! its outputs back as plain values.
//!
//! All network traffic goes through the [`http::HttpTransport`] seam. The
//! `reqwest-client` feature provides the production transport; tests run
//! against mocks.

pub mod http;
pub mod proto;
pub mod protocol;
pub mod scheduling;
pub mod settings;

pub use protocol::{
    CheckinOutcome,
    CheckinResult,
    ComputationResult,
    FederatedProtocol,
    ProtocolError,
    ReportOutcome,
};
pub use scheduling::{ContributionResult, JobManager, TaskRetry, TrainingOptions};
pub use settings::Flags;

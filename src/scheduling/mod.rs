//! Job scheduling: task records, scheduling policies and the job manager
//! that reconciles them with the platform scheduler.

pub mod job_id;
pub mod job_manager;
pub mod policy;
mod task;

pub use job_id::derive_job_id;
pub use job_manager::{Clock, InternalError, JobManager, JobScheduler, SystemClock, TaskStore};
pub use task::{
    ContributionResult,
    SchedulingMode,
    SchedulingReason,
    TaskRetry,
    TrainingConstraints,
    TrainingInterval,
    TrainingOptions,
    TrainingTask,
};

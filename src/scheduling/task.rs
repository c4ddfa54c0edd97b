//! Task records and the value types attached to them.
//!
//! Timestamps are milliseconds since the Unix epoch, matching the wire and
//! store representation used throughout the scheduling layer.

/// Whether a task runs once or repeatedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    OneTime,
    Recurring,
}

/// Caller-requested run cadence. Compared structurally when deciding whether
/// a repeat `on_trainer_start` changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingInterval {
    pub mode: SchedulingMode,
    /// Minimum gap between runs. Only meaningful for recurring tasks; it is
    /// clamped into the configured interval bounds before use.
    pub min_interval_millis: i64,
}

/// Device conditions a run waits for. Enforcement is the platform
/// scheduler's job; these are only carried and compared here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingConstraints {
    pub requires_device_idle: bool,
    pub requires_battery_not_low: bool,
    pub requires_unmetered_network: bool,
}

impl Default for TrainingConstraints {
    fn default() -> Self {
        TrainingConstraints {
            requires_device_idle: true,
            requires_battery_not_low: true,
            requires_unmetered_network: true,
        }
    }
}

/// Why a task's current `earliest_next_run_time_millis` was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingReason {
    NewTask,
    Failure,
    FederatedComputationRetry,
}

/// Whether the device's contribution made it into the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionResult {
    Unspecified,
    Success,
    Fail,
}

/// Server-directed retry hint returned with a training round. The next run
/// is placed uniformly inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRetry {
    pub delay_min_millis: i64,
    pub delay_max_millis: i64,
}

/// What a caller asks for when starting training for a population.
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub population_name: String,
    pub server_address: String,
    pub owner_package_name: String,
    pub owner_class_name: String,
    pub owner_id_cert_digest: String,
    /// Opaque bytes forwarded to the server with every checkin.
    pub context_data: Vec<u8>,
    pub training_interval: Option<TrainingInterval>,
}

/// One persistent record per population, keyed by `job_id` in the platform
/// scheduler and by `population_name` in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingTask {
    pub job_id: i32,
    pub population_name: String,
    pub app_package_name: String,
    pub owner_package_name: String,
    pub owner_class_name: String,
    pub owner_id_cert_digest: String,
    pub server_address: String,
    pub context_data: Vec<u8>,
    pub constraints: TrainingConstraints,
    pub interval: Option<TrainingInterval>,
    pub creation_time_millis: i64,
    pub last_scheduled_time_millis: i64,
    pub last_run_start_time_millis: Option<i64>,
    pub last_run_end_time_millis: Option<i64>,
    pub earliest_next_run_time_millis: i64,
    pub scheduling_reason: SchedulingReason,
    /// How many times this task was rescheduled after a run, for telemetry.
    pub reschedule_count: u32,
}

//! Tunable knobs for the transport and the job manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the protocol client and the job manager.
///
/// The defaults match the values the production service ships with; an
/// embedder may override individual fields before constructing the
/// [`JobManager`](crate::scheduling::JobManager) or
/// [`HttpClient`](crate::http::HttpClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flags {
    /// Delay before the first run of a task scheduled without an interval.
    pub default_scheduling_period_secs: i64,
    /// Lower clamp for a caller-requested recurring interval.
    pub min_scheduling_interval_secs: i64,
    /// Upper clamp for a caller-requested recurring interval. Kept below the
    /// task TTL so a task always gets a chance to run before it expires.
    pub max_scheduling_interval_secs: i64,
    /// A task that has not run within this long of its last scheduling is
    /// considered dead and is evicted when its job fires.
    pub training_time_for_live_secs: i64,
    /// How long a training run is given before the platform times it out.
    /// Feeds the currently-running heuristic.
    pub result_callback_timeout_secs: i64,
    /// Fixed backoff applied after a failed run without a server retry hint.
    pub transient_error_retry_delay_secs: i64,
    /// Jitter applied to the transient-error backoff, as a fraction of it.
    pub transient_error_retry_delay_jitter_percent: f32,
    /// Maximum attempts for a single logical HTTP request.
    pub http_request_retry_limit: u32,
    /// Base delay between HTTP retry attempts; doubled per attempt.
    pub http_retry_base_delay_millis: u64,
    /// Jitter applied to the HTTP retry delay, as a fraction of it.
    pub http_retry_delay_jitter_percent: f32,
    /// TCP connect timeout for every request.
    pub network_connect_timeout_millis: u64,
    /// Read timeout for every request.
    pub network_read_timeout_millis: u64,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            default_scheduling_period_secs: 60 * 5,
            min_scheduling_interval_secs: 60,
            max_scheduling_interval_secs: 6 * 24 * 60 * 60,
            training_time_for_live_secs: 7 * 24 * 60 * 60,
            // 9 minutes 45 seconds, leaving ~15 seconds to clean up.
            result_callback_timeout_secs: 60 * 9 + 45,
            transient_error_retry_delay_secs: 15 * 60,
            transient_error_retry_delay_jitter_percent: 0.2,
            http_request_retry_limit: 3,
            http_retry_base_delay_millis: 2_000,
            http_retry_delay_jitter_percent: 0.1,
            network_connect_timeout_millis: 5_000,
            network_read_timeout_millis: 30_000,
        }
    }
}

impl Flags {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network_connect_timeout_millis)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.network_read_timeout_millis)
    }
}

//! Scheduling policies, as pure functions of their inputs.
//!
//! The job manager never does timestamp arithmetic inline; every decision
//! about when a task may run next lives here so it can be tested with a
//! fixed clock and a seeded RNG.

use rand::Rng;

use crate::settings::Flags;

use super::task::{SchedulingMode, TaskRetry, TrainingInterval, TrainingTask};

/// The caller-requested interval, clamped into the configured bounds.
/// One-time tasks and tasks without an interval get the default scheduling
/// period.
pub fn sanitized_interval_millis(interval: Option<&TrainingInterval>, flags: &Flags) -> i64 {
    match interval {
        Some(interval) if interval.mode == SchedulingMode::Recurring => {
            interval.min_interval_millis.clamp(
                flags.min_scheduling_interval_secs * 1_000,
                flags.max_scheduling_interval_secs * 1_000,
            )
        }
        _ => flags.default_scheduling_period_secs * 1_000,
    }
}

/// Earliest run time for a task scheduled for the first time.
pub fn earliest_for_initial_schedule(
    now_millis: i64,
    interval: Option<&TrainingInterval>,
    flags: &Flags,
) -> i64 {
    now_millis + sanitized_interval_millis(interval, flags)
}

/// Earliest run time for a task that already exists and whose interval did
/// not change.
///
/// A recurring task that has finished a run is held back until one sanitized
/// interval after that run ended; otherwise the stored time stands.
pub fn earliest_for_existing_task(
    task: &TrainingTask,
    interval: Option<&TrainingInterval>,
    flags: &Flags,
) -> i64 {
    let recurring = matches!(interval, Some(i) if i.mode == SchedulingMode::Recurring);
    if recurring {
        if let Some(last_run_end) = task.last_run_end_time_millis {
            return task
                .earliest_next_run_time_millis
                .max(last_run_end + sanitized_interval_millis(interval, flags));
        }
    }
    task.earliest_next_run_time_millis
}

/// Earliest run time after a run completed.
///
/// A server retry hint places the next run uniformly inside its window;
/// without one, the transient-error backoff applies, jittered. A recurring
/// task that contributed never runs again sooner than its own interval.
pub fn earliest_for_reschedule<R: Rng + ?Sized>(
    now_millis: i64,
    interval: Option<&TrainingInterval>,
    contributed: bool,
    task_retry: Option<&TaskRetry>,
    flags: &Flags,
    rng: &mut R,
) -> i64 {
    let mut delay = match task_retry {
        Some(retry) => {
            let min = retry.delay_min_millis.max(0);
            let max = retry.delay_max_millis.max(min);
            if min == max {
                min
            } else {
                rng.gen_range(min..=max)
            }
        }
        None => {
            let base = flags.transient_error_retry_delay_secs as f64 * 1_000.0;
            let jitter = base * f64::from(flags.transient_error_retry_delay_jitter_percent);
            rng.gen_range((base - jitter)..=(base + jitter)) as i64
        }
    };
    let recurring = matches!(interval, Some(i) if i.mode == SchedulingMode::Recurring);
    if recurring && contributed {
        delay = delay.max(sanitized_interval_millis(interval, flags));
    }
    now_millis + delay
}

/// Whether a run started and has not yet ended within the window the
/// platform gives a run before timing it out (callback timeout plus a
/// cleanup buffer).
pub fn is_currently_running(task: &TrainingTask, now_millis: i64, flags: &Flags) -> bool {
    let started = match task.last_run_start_time_millis {
        Some(started) => started,
        None => return false,
    };
    if let Some(ended) = task.last_run_end_time_millis {
        if ended >= started {
            return false;
        }
    }
    now_millis - started < (flags.result_callback_timeout_secs + 30) * 1_000
}

//! Reconciles desired training configuration with the task store and the
//! platform scheduler.

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::settings::Flags;

use super::{
    job_id::derive_job_id,
    policy::{
        earliest_for_existing_task,
        earliest_for_initial_schedule,
        earliest_for_reschedule,
        is_currently_running,
    },
    task::{
        ContributionResult,
        SchedulingMode,
        SchedulingReason,
        TaskRetry,
        TrainingConstraints,
        TrainingInterval,
        TrainingOptions,
        TrainingTask,
    },
};

/// Persistent store of training tasks. Implemented by the embedder; all
/// methods return the stored value by clone, and writes report success.
#[cfg_attr(test, mockall::automock)]
pub trait TaskStore: Send + Sync {
    fn task_by_population(&self, population_name: &str) -> Option<TrainingTask>;

    fn task_by_job_id(&self, job_id: i32) -> Option<TrainingTask>;

    /// Inserts or replaces the task keyed by its job id.
    fn put_task(&self, task: TrainingTask) -> bool;

    fn remove_by_population(&self, population_name: &str) -> Option<TrainingTask>;

    fn remove_by_job_id(&self, job_id: i32) -> Option<TrainingTask>;
}

/// The platform job scheduler. Implemented by the embedder.
#[cfg_attr(test, mockall::automock)]
pub trait JobScheduler: Send + Sync {
    /// Schedules (or replaces) the platform job for the task. Returns
    /// `false` if the platform refused.
    fn schedule(&self, task: &TrainingTask) -> bool;

    fn cancel(&self, job_id: i32);

    fn is_scheduled(&self, job_id: i32) -> bool;
}

/// Time source, swapped for a fixed clock in tests.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Coarse failure surfaced to callers of the trainer API. Detailed causes
/// go to the logs only.
#[derive(Debug, Error)]
#[error("internal error")]
pub struct InternalError;

/// The scheduling state machine.
///
/// Every public operation runs under one coarse lock: a store read, the
/// decision, the scheduler call and the store write form one critical
/// section. Call frequency is low (human-driven start/stop plus periodic
/// job firings), so simplicity wins over throughput here.
pub struct JobManager<S, J, C = SystemClock> {
    store: S,
    scheduler: J,
    clock: C,
    flags: Flags,
    lock: Mutex<()>,
}

impl<S, J> JobManager<S, J, SystemClock>
where
    S: TaskStore,
    J: JobScheduler,
{
    pub fn new(store: S, scheduler: J, flags: Flags) -> Self {
        Self::with_clock(store, scheduler, SystemClock, flags)
    }
}

impl<S, J, C> JobManager<S, J, C>
where
    S: TaskStore,
    J: JobScheduler,
    C: Clock,
{
    pub fn with_clock(store: S, scheduler: J, clock: C, flags: Flags) -> Self {
        JobManager {
            store,
            scheduler,
            clock,
            flags,
            lock: Mutex::new(()),
        }
    }

    /// Starts (or refreshes) training for the population named in `options`.
    ///
    /// A new population gets a freshly derived job id and an initial
    /// schedule. An existing one keeps its job id and run time unless its
    /// interval changed, or it is idle and its scheduling state drifted
    /// (platform job missing, constraints changed, or a recurring run
    /// pushed the next run time out).
    pub fn on_trainer_start(
        &self,
        calling_package: &str,
        options: &TrainingOptions,
    ) -> Result<(), InternalError> {
        let _guard = self.lock.lock();
        let now = self.clock.now_millis();
        match self.store.task_by_population(&options.population_name) {
            None => {
                let job_id = derive_job_id(&options.population_name, calling_package);
                let task = self.new_task(job_id, calling_package, options, now);
                info!(
                    population = %options.population_name,
                    job_id,
                    "scheduling new training task"
                );
                self.schedule_then_store(task)
            }
            Some(existing) => self.refresh_task(existing, calling_package, options, now),
        }
    }

    /// Stops training for a population. Stopping something that is not
    /// tracked is not an error.
    pub fn on_trainer_stop(&self, population_name: &str) -> Result<(), InternalError> {
        let _guard = self.lock.lock();
        if let Some(task) = self.store.remove_by_population(population_name) {
            self.scheduler.cancel(task.job_id);
            info!(population = %population_name, job_id = task.job_id, "training task stopped");
        } else {
            debug!(population = %population_name, "stop for an untracked population");
        }
        Ok(())
    }

    /// Called when the platform job fires. Returns the task to run, or
    /// `None` when the job is unknown or its TTL elapsed (the task is
    /// evicted in that case and the caller must not train).
    pub fn on_training_started(
        &self,
        job_id: i32,
    ) -> Result<Option<TrainingTask>, InternalError> {
        let _guard = self.lock.lock();
        let now = self.clock.now_millis();
        let mut task = match self.store.task_by_job_id(job_id) {
            Some(task) => task,
            None => return Ok(None),
        };
        let ttl_millis = self.flags.training_time_for_live_secs * 1_000;
        if now - task.last_scheduled_time_millis > ttl_millis {
            info!(
                job_id,
                population = %task.population_name,
                "task expired without running, evicting"
            );
            self.store.remove_by_job_id(job_id);
            return Ok(None);
        }
        task.last_run_start_time_millis = Some(now);
        if !self.store.put_task(task.clone()) {
            warn!(job_id, "failed to persist run start");
            return Err(InternalError);
        }
        Ok(Some(task))
    }

    /// Called when a run finished. A one-time task that contributed is
    /// dropped for good; everything else is rescheduled. A reschedule
    /// refusal is logged, never raised.
    pub fn on_training_completed(
        &self,
        job_id: i32,
        population_name: &str,
        interval: Option<&TrainingInterval>,
        task_retry: Option<&TaskRetry>,
        contribution: ContributionResult,
    ) {
        let _guard = self.lock.lock();
        let now = self.clock.now_millis();
        let mut task = match self.store.task_by_job_id(job_id) {
            Some(task) if task.population_name == population_name => task,
            _ => {
                debug!(job_id, population = %population_name, "completion for an untracked task");
                return;
            }
        };

        let recurring = matches!(interval, Some(i) if i.mode == SchedulingMode::Recurring);
        if !recurring && contribution == ContributionResult::Success {
            self.store.remove_by_job_id(job_id);
            self.scheduler.cancel(job_id);
            info!(
                job_id,
                population = %population_name,
                "one-time task contributed, dropping"
            );
            return;
        }

        task.last_run_end_time_millis = Some(now);
        task.interval = interval.copied();
        task.earliest_next_run_time_millis = earliest_for_reschedule(
            now,
            interval,
            contribution == ContributionResult::Success,
            task_retry,
            &self.flags,
            &mut rand::thread_rng(),
        );
        task.scheduling_reason = if task_retry.is_some() {
            SchedulingReason::FederatedComputationRetry
        } else {
            SchedulingReason::Failure
        };
        task.reschedule_count += 1;
        task.last_scheduled_time_millis = now;
        if !self.store.put_task(task.clone()) {
            warn!(job_id, "failed to persist rescheduled task");
        }
        if !self.scheduler.schedule(&task) {
            warn!(job_id, "platform refused to reschedule task");
        }
    }

    fn new_task(
        &self,
        job_id: i32,
        calling_package: &str,
        options: &TrainingOptions,
        now: i64,
    ) -> TrainingTask {
        TrainingTask {
            job_id,
            population_name: options.population_name.clone(),
            app_package_name: calling_package.to_string(),
            owner_package_name: options.owner_package_name.clone(),
            owner_class_name: options.owner_class_name.clone(),
            owner_id_cert_digest: options.owner_id_cert_digest.clone(),
            server_address: options.server_address.clone(),
            context_data: options.context_data.clone(),
            constraints: TrainingConstraints::default(),
            interval: options.training_interval,
            creation_time_millis: now,
            last_scheduled_time_millis: now,
            last_run_start_time_millis: None,
            last_run_end_time_millis: None,
            earliest_next_run_time_millis: earliest_for_initial_schedule(
                now,
                options.training_interval.as_ref(),
                &self.flags,
            ),
            scheduling_reason: SchedulingReason::NewTask,
            reschedule_count: 0,
        }
    }

    fn refresh_task(
        &self,
        existing: TrainingTask,
        calling_package: &str,
        options: &TrainingOptions,
        now: i64,
    ) -> Result<(), InternalError> {
        if existing.interval != options.training_interval {
            // Interval changed: start over with fresh bookkeeping, keeping
            // the job id.
            let task = TrainingTask {
                creation_time_millis: existing.creation_time_millis,
                ..self.new_task(existing.job_id, calling_package, options, now)
            };
            info!(
                population = %options.population_name,
                job_id = existing.job_id,
                "training interval changed, rescheduling"
            );
            return self.schedule_then_store(task);
        }

        if is_currently_running(&existing, now, &self.flags) {
            debug!(
                population = %options.population_name,
                "task is currently running, leaving schedule untouched"
            );
            return Ok(());
        }

        let constraints = TrainingConstraints::default();
        let earliest = earliest_for_existing_task(
            &existing,
            options.training_interval.as_ref(),
            &self.flags,
        );
        let needs_reschedule = !self.scheduler.is_scheduled(existing.job_id)
            || existing.constraints != constraints
            || existing.earliest_next_run_time_millis != earliest;
        if !needs_reschedule {
            return Ok(());
        }

        let task = TrainingTask {
            constraints,
            earliest_next_run_time_millis: earliest,
            last_scheduled_time_millis: now,
            ..existing
        };
        self.schedule_then_store(task)
    }

    /// Scheduler refusal aborts without touching the store. A store failure
    /// after a successful schedule is an inconsistency worth a log line,
    /// but the schedule stands.
    fn schedule_then_store(&self, task: TrainingTask) -> Result<(), InternalError> {
        if !self.scheduler.schedule(&task) {
            warn!(
                job_id = task.job_id,
                population = %task.population_name,
                "platform refused to schedule task"
            );
            return Err(InternalError);
        }
        if !self.store.put_task(task.clone()) {
            warn!(
                job_id = task.job_id,
                population = %task.population_name,
                "task scheduled but store write failed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicBool, AtomicI64, Ordering},
    };

    use super::*;

    const NOW: i64 = 1_700_000_000_000;
    const POPULATION: &str = "test/population";
    const PACKAGE: &str = "com.example.app";

    #[derive(Default)]
    struct InMemoryStore {
        tasks: Mutex<HashMap<i32, TrainingTask>>,
        refuse_writes: AtomicBool,
    }

    impl TaskStore for InMemoryStore {
        fn task_by_population(&self, population_name: &str) -> Option<TrainingTask> {
            self.tasks
                .lock()
                .values()
                .find(|t| t.population_name == population_name)
                .cloned()
        }

        fn task_by_job_id(&self, job_id: i32) -> Option<TrainingTask> {
            self.tasks.lock().get(&job_id).cloned()
        }

        fn put_task(&self, task: TrainingTask) -> bool {
            if self.refuse_writes.load(Ordering::Relaxed) {
                return false;
            }
            self.tasks.lock().insert(task.job_id, task);
            true
        }

        fn remove_by_population(&self, population_name: &str) -> Option<TrainingTask> {
            let mut tasks = self.tasks.lock();
            let job_id = tasks
                .values()
                .find(|t| t.population_name == population_name)
                .map(|t| t.job_id)?;
            tasks.remove(&job_id)
        }

        fn remove_by_job_id(&self, job_id: i32) -> Option<TrainingTask> {
            self.tasks.lock().remove(&job_id)
        }
    }

    #[derive(Default)]
    struct FakeScheduler {
        scheduled: Mutex<HashMap<i32, TrainingTask>>,
        cancelled: Mutex<Vec<i32>>,
        refuse: AtomicBool,
    }

    impl JobScheduler for FakeScheduler {
        fn schedule(&self, task: &TrainingTask) -> bool {
            if self.refuse.load(Ordering::Relaxed) {
                return false;
            }
            self.scheduled.lock().insert(task.job_id, task.clone());
            true
        }

        fn cancel(&self, job_id: i32) {
            self.scheduled.lock().remove(&job_id);
            self.cancelled.lock().push(job_id);
        }

        fn is_scheduled(&self, job_id: i32) -> bool {
            self.scheduled.lock().contains_key(&job_id)
        }
    }

    struct FakeClock(AtomicI64);

    impl Clock for FakeClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    impl FakeClock {
        fn advance_millis(&self, by: i64) {
            self.0.fetch_add(by, Ordering::Relaxed);
        }
    }

    fn manager() -> JobManager<InMemoryStore, FakeScheduler, FakeClock> {
        JobManager::with_clock(
            InMemoryStore::default(),
            FakeScheduler::default(),
            FakeClock(AtomicI64::new(NOW)),
            Flags::default(),
        )
    }

    fn options() -> TrainingOptions {
        TrainingOptions {
            population_name: POPULATION.to_string(),
            server_address: "https://fl.example.com".to_string(),
            owner_package_name: PACKAGE.to_string(),
            owner_class_name: "com.example.app.Owner".to_string(),
            owner_id_cert_digest: "digest".to_string(),
            context_data: Vec::new(),
            training_interval: None,
        }
    }

    fn recurring(min_interval_millis: i64) -> TrainingInterval {
        TrainingInterval {
            mode: SchedulingMode::Recurring,
            min_interval_millis,
        }
    }

    #[test]
    fn test_start_creates_and_schedules_task() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();

        let task = manager.store.task_by_population(POPULATION).unwrap();
        assert_eq!(task.job_id, derive_job_id(POPULATION, PACKAGE));
        assert_eq!(task.scheduling_reason, SchedulingReason::NewTask);
        assert_eq!(
            task.earliest_next_run_time_millis,
            NOW + Flags::default().default_scheduling_period_secs * 1_000
        );
        assert!(manager.scheduler.is_scheduled(task.job_id));
    }

    #[test]
    fn test_repeat_start_is_idempotent() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        let first = manager.store.task_by_population(POPULATION).unwrap();

        manager.clock.advance_millis(10_000);
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        let second = manager.store.task_by_population(POPULATION).unwrap();

        assert_eq!(manager.store.tasks.lock().len(), 1);
        assert_eq!(first.job_id, second.job_id);
        assert_eq!(
            first.earliest_next_run_time_millis,
            second.earliest_next_run_time_millis
        );
        assert_eq!(first.last_scheduled_time_millis, second.last_scheduled_time_millis);
    }

    #[test]
    fn test_interval_change_reschedules_as_new_task() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();

        manager.clock.advance_millis(10_000);
        let mut changed = options();
        changed.training_interval = Some(recurring(3_600_000));
        manager.on_trainer_start(PACKAGE, &changed).unwrap();

        let task = manager.store.task_by_population(POPULATION).unwrap();
        assert_eq!(task.scheduling_reason, SchedulingReason::NewTask);
        assert_eq!(task.interval, Some(recurring(3_600_000)));
        assert_eq!(task.earliest_next_run_time_millis, NOW + 10_000 + 3_600_000);
        assert!(task.last_run_start_time_millis.is_none());
    }

    #[test]
    fn test_missing_platform_job_is_rescheduled() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        let job_id = derive_job_id(POPULATION, PACKAGE);
        manager.scheduler.scheduled.lock().remove(&job_id);

        manager.clock.advance_millis(10_000);
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        assert!(manager.scheduler.is_scheduled(job_id));
        let task = manager.store.task_by_job_id(job_id).unwrap();
        assert_eq!(task.last_scheduled_time_millis, NOW + 10_000);
    }

    #[test]
    fn test_running_task_is_left_alone() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        let job_id = derive_job_id(POPULATION, PACKAGE);
        manager.on_training_started(job_id).unwrap().unwrap();
        // The platform job is consumed by the run.
        manager.scheduler.scheduled.lock().remove(&job_id);

        manager.clock.advance_millis(1_000);
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        assert!(!manager.scheduler.is_scheduled(job_id));
    }

    #[test]
    fn test_schedule_failure_aborts_without_storing() {
        let manager = manager();
        manager.scheduler.refuse.store(true, Ordering::Relaxed);

        assert!(manager.on_trainer_start(PACKAGE, &options()).is_err());
        assert!(manager.store.task_by_population(POPULATION).is_none());
    }

    #[test]
    fn test_store_failure_after_scheduling_is_not_an_error() {
        let manager = manager();
        manager.store.refuse_writes.store(true, Ordering::Relaxed);

        assert!(manager.on_trainer_start(PACKAGE, &options()).is_ok());
        assert!(manager
            .scheduler
            .is_scheduled(derive_job_id(POPULATION, PACKAGE)));
    }

    #[test]
    fn test_stop_cancels_and_is_idempotent() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        let job_id = derive_job_id(POPULATION, PACKAGE);

        manager.on_trainer_stop(POPULATION).unwrap();
        assert!(manager.store.task_by_job_id(job_id).is_none());
        assert_eq!(*manager.scheduler.cancelled.lock(), vec![job_id]);

        // A second stop, and a stop for an unknown population, succeed.
        manager.on_trainer_stop(POPULATION).unwrap();
        manager.on_trainer_stop("unknown/population").unwrap();
        assert_eq!(*manager.scheduler.cancelled.lock(), vec![job_id]);
    }

    #[test]
    fn test_training_started_stamps_run_start() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        let job_id = derive_job_id(POPULATION, PACKAGE);

        manager.clock.advance_millis(5_000);
        let task = manager.on_training_started(job_id).unwrap().unwrap();
        assert_eq!(task.last_run_start_time_millis, Some(NOW + 5_000));
        assert_eq!(
            manager
                .store
                .task_by_job_id(job_id)
                .unwrap()
                .last_run_start_time_millis,
            Some(NOW + 5_000)
        );
    }

    #[test]
    fn test_training_started_unknown_job() {
        let manager = manager();
        assert!(manager.on_training_started(123).unwrap().is_none());
    }

    #[test]
    fn test_expired_task_is_evicted_on_start() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        let job_id = derive_job_id(POPULATION, PACKAGE);

        manager
            .clock
            .advance_millis(Flags::default().training_time_for_live_secs * 1_000 + 1);
        assert!(manager.on_training_started(job_id).unwrap().is_none());
        assert!(manager.store.task_by_job_id(job_id).is_none());
    }

    #[test]
    fn test_one_time_success_drops_task() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        let job_id = derive_job_id(POPULATION, PACKAGE);

        manager.on_training_completed(
            job_id,
            POPULATION,
            None,
            None,
            ContributionResult::Success,
        );
        assert!(manager.store.task_by_job_id(job_id).is_none());
        assert_eq!(*manager.scheduler.cancelled.lock(), vec![job_id]);
    }

    #[test]
    fn test_recurring_success_reschedules_after_run_end() {
        let manager = manager();
        let mut recurring_options = options();
        recurring_options.training_interval = Some(recurring(3_600_000));
        manager.on_trainer_start(PACKAGE, &recurring_options).unwrap();
        let job_id = derive_job_id(POPULATION, PACKAGE);

        manager.clock.advance_millis(60_000);
        manager.on_training_completed(
            job_id,
            POPULATION,
            Some(&recurring(3_600_000)),
            None,
            ContributionResult::Success,
        );

        let task = manager.store.task_by_job_id(job_id).unwrap();
        assert_eq!(task.last_run_end_time_millis, Some(NOW + 60_000));
        assert!(task.earliest_next_run_time_millis > NOW + 60_000);
        assert_eq!(task.reschedule_count, 1);
        assert_eq!(task.scheduling_reason, SchedulingReason::Failure);
        assert!(manager.scheduler.is_scheduled(job_id));
    }

    #[test]
    fn test_server_retry_hint_drives_reschedule() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        let job_id = derive_job_id(POPULATION, PACKAGE);

        let retry = TaskRetry {
            delay_min_millis: 60_000,
            delay_max_millis: 120_000,
        };
        manager.on_training_completed(
            job_id,
            POPULATION,
            None,
            Some(&retry),
            ContributionResult::Fail,
        );

        let task = manager.store.task_by_job_id(job_id).unwrap();
        assert_eq!(
            task.scheduling_reason,
            SchedulingReason::FederatedComputationRetry
        );
        assert!(task.earliest_next_run_time_millis >= NOW + 60_000);
        assert!(task.earliest_next_run_time_millis <= NOW + 120_000);
    }

    #[test]
    fn test_completion_for_untracked_task_is_ignored() {
        let manager = manager();
        manager.on_training_completed(123, POPULATION, None, None, ContributionResult::Fail);
        assert!(manager.store.tasks.lock().is_empty());
    }

    #[test]
    fn test_completion_with_mismatched_population_is_ignored() {
        let manager = manager();
        manager.on_trainer_start(PACKAGE, &options()).unwrap();
        let job_id = derive_job_id(POPULATION, PACKAGE);

        manager.on_training_completed(
            job_id,
            "other/population",
            None,
            None,
            ContributionResult::Success,
        );
        assert!(manager.store.task_by_job_id(job_id).is_some());
    }
}

use super::context::JobContext;
use super::handle::{JobRunStatus, SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use crate::server::metrics;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Longest the loop sleeps without re-checking schedules.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// How long shutdown waits for each running job.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Running jobs with their task handles, managed by the scheduler loop only.
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,
}

fn next_interval_run(interval: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default()
}

impl JobScheduler {
    pub fn new(
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            command_receiver,
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler. The first interval run is one
    /// interval after registration.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        if let Some(interval) = job.schedule().interval() {
            state
                .next_runs
                .insert(job_id.clone(), next_interval_run(interval));
        }
        state.jobs.insert(job_id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob {
                job_id,
                params,
                response,
            } => {
                let result = self.trigger_job(&job_id, params).await;
                let _ = response.send(result);
            }
        }
    }

    async fn trigger_job(&mut self, job_id: &str, params: Option<JsonValue>) -> Result<(), JobError> {
        // A finished job may still be waiting for cleanup.
        self.cleanup_completed_jobs().await;

        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }
        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        drop(state);

        self.spawn_job(job_id, "manual", params).await;
        Ok(())
    }

    async fn time_until_next_scheduled_job(&self) -> Duration {
        let state = self.shared_state.read().await;
        let now = Utc::now();
        let mut min_duration = MAX_IDLE;

        for (job_id, next_run) in &state.next_runs {
            if state.running_jobs.contains(job_id) {
                continue;
            }
            if *next_run <= now {
                return Duration::from_secs(0);
            }
            let duration = (*next_run - now).to_std().unwrap_or(Duration::from_secs(1));
            min_duration = min_duration.min(duration);
        }

        min_duration
    }

    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let jobs_to_run: Vec<String> = {
            let state = self.shared_state.read().await;
            state
                .next_runs
                .iter()
                .filter(|(job_id, next_run)| {
                    **next_run <= now && !state.running_jobs.contains(*job_id)
                })
                .map(|(job_id, _)| job_id.clone())
                .collect()
        };

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule", None).await;
        }
    }

    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let jobs_to_trigger: Vec<String> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .iter()
                .filter(|(job_id, job)| {
                    if state.running_jobs.contains(*job_id) {
                        debug!("Skipping hook trigger for already running job: {}", job_id);
                        return false;
                    }
                    job.schedule().listens_to(event)
                })
                .map(|(job_id, _)| job_id.clone())
                .collect()
        };

        for job_id in jobs_to_trigger {
            let trigger = format!("hook:{}", event);
            self.spawn_job(&job_id, &trigger, None).await;
        }
    }

    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str, params: Option<JsonValue>) {
        let (job, run_id) = {
            let mut state = self.shared_state.write().await;
            let job = match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return;
                }
            };
            state.running_jobs.insert(job_id.to_string());
            let run_id = state.record_start(job_id, triggered_by);
            // Push the next interval run out now so the loop does not spin
            // while the job is still running.
            if let Some(interval) = job.schedule().interval() {
                state
                    .next_runs
                    .insert(job_id.to_string(), next_interval_run(interval));
            }
            (job, run_id)
        };

        info!(
            "Starting job: {} run {} (triggered_by: {})",
            job_id, run_id, triggered_by
        );
        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token);

        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result =
                tokio::task::spawn_blocking(move || job.execute_with_params(&ctx, params)).await;
            let elapsed = start_time.elapsed();

            let (status, error_msg, status_label) = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (JobRunStatus::Completed, None, "success")
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (
                        JobRunStatus::Failed,
                        Some("Cancelled".to_string()),
                        "cancelled",
                    )
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()), "failed")
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    (
                        JobRunStatus::Failed,
                        Some(format!("Task panic: {}", e)),
                        "panic",
                    )
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            let mut state = shared_state.write().await;
            state.record_finish(&job_id_owned, status, error_msg);
            state.running_jobs.remove(&job_id_owned);
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    /// Reaps handles of finished jobs. The next interval run counts from
    /// the end of the previous one.
    async fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(&job_id) {
                let _ = handle.await;
            }
            self.job_cancel_tokens.remove(&job_id);

            let mut state = self.shared_state.write().await;
            let interval = state
                .jobs
                .get(&job_id)
                .and_then(|job| job.schedule().interval());
            if let Some(interval) = interval {
                state.next_runs.insert(job_id, next_interval_run(interval));
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        let mut wait_jobs = Vec::new();
        {
            let state = self.shared_state.read().await;
            for (job_id, handle) in self.running_handles.drain() {
                let behavior = state
                    .jobs
                    .get(&job_id)
                    .map(|j| j.shutdown_behavior())
                    .unwrap_or_default();
                if behavior == ShutdownBehavior::Cancellable {
                    if let Some(token) = self.job_cancel_tokens.get(&job_id) {
                        debug!("Cancelling job: {}", job_id);
                        token.cancel();
                    }
                } else {
                    info!("Waiting for job {} to complete...", job_id);
                }
                wait_jobs.push(handle);
            }
        }

        for handle in wait_jobs {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));

    let scheduler = JobScheduler::new(
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
    );
    let handle = SchedulerHandle::new(command_tx, shared_state);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::job::JobSchedule;
    use crate::leaderboard::LeaderboardConfig;
    use crate::listening_store::SqliteListeningStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestJob {
        id: &'static str,
        schedule: JobSchedule,
        execution_count: Arc<AtomicUsize>,
        should_fail: Arc<AtomicBool>,
    }

    impl TestJob {
        fn on_startup(id: &'static str, execution_count: Arc<AtomicUsize>, fail: bool) -> Self {
            Self {
                id,
                schedule: JobSchedule::Hook(HookEvent::OnStartup),
                execution_count,
                should_fail: Arc::new(AtomicBool::new(fail)),
            }
        }
    }

    impl BackgroundJob for TestJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "A test job for unit tests"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule.clone()
        }

        fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            self.execution_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                Err(JobError::ExecutionFailed("Test failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Loops until cancelled.
    struct BlockingJob;

    impl BackgroundJob for BlockingJob {
        fn id(&self) -> &'static str {
            "blocking_job"
        }

        fn name(&self) -> &'static str {
            "Blocking Job"
        }

        fn description(&self) -> &'static str {
            "Runs until cancelled"
        }

        fn schedule(&self) -> JobSchedule {
            JobSchedule::Hook(HookEvent::OnStartup)
        }

        fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(JobError::Cancelled)
        }
    }

    fn create_test_scheduler() -> (JobScheduler, SchedulerHandle, CancellationToken) {
        let store = Arc::new(SqliteListeningStore::in_memory().unwrap());
        let shutdown_token = CancellationToken::new();
        let job_context = JobContext::new(
            shutdown_token.child_token(),
            store,
            LeaderboardConfig::default(),
        );
        let (scheduler, handle) = create_scheduler(shutdown_token.clone(), job_context);
        (scheduler, handle, shutdown_token)
    }

    #[tokio::test]
    async fn test_register_and_list_jobs() {
        let (mut scheduler, handle, _token) = create_test_scheduler();
        assert!(handle.list_jobs().await.is_empty());
        assert!(!handle.job_exists("job_a").await);

        for id in ["job_b", "job_a"] {
            scheduler
                .register_job(Arc::new(TestJob::on_startup(
                    id,
                    Arc::new(AtomicUsize::new(0)),
                    false,
                )))
                .await;
        }

        let jobs = handle.list_jobs().await;
        assert_eq!(scheduler.job_count().await, 2);
        assert_eq!(jobs[0].id, "job_a");
        assert_eq!(jobs[1].id, "job_b");
        assert!(!jobs[0].is_running);
        assert!(jobs[0].last_run.is_none());
        assert!(handle.job_exists("job_a").await);
        assert!(handle.get_job("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_interval_job_gets_next_run() {
        let (mut scheduler, handle, _token) = create_test_scheduler();
        scheduler
            .register_job(Arc::new(TestJob {
                id: "interval_job",
                schedule: JobSchedule::Interval(Duration::from_secs(3600)),
                execution_count: Arc::new(AtomicUsize::new(0)),
                should_fail: Arc::new(AtomicBool::new(false)),
            }))
            .await;

        let job = handle.get_job("interval_job").await.unwrap();
        assert_eq!(job.schedule.schedule_type, "interval");
        assert_eq!(job.schedule.value_secs, Some(3600));
        assert!(job.next_run_at.is_some());
    }

    #[tokio::test]
    async fn test_job_execution_on_startup_hook() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();
        let exec_count = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_job(Arc::new(TestJob::on_startup(
                "startup_job",
                exec_count.clone(),
                false,
            )))
            .await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(exec_count.load(Ordering::SeqCst), 1);
        let history = handle.get_job_history("startup_job", 10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "completed");
        assert_eq!(history[0].triggered_by, "hook:OnStartup");

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_failed_job_records_error() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();
        scheduler
            .register_job(Arc::new(TestJob::on_startup(
                "failing_job",
                Arc::new(AtomicUsize::new(0)),
                true,
            )))
            .await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let job = handle.get_job("failing_job").await.unwrap();
        let last_run = job.last_run.unwrap();
        assert_eq!(last_run.status, "failed");
        assert!(last_run.error_message.unwrap().contains("Test failure"));

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();
        let exec_count = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_job(Arc::new(TestJob {
                id: "manual_job",
                schedule: JobSchedule::Interval(Duration::from_secs(3600)),
                execution_count: exec_count.clone(),
                should_fail: Arc::new(AtomicBool::new(false)),
            }))
            .await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        assert!(matches!(
            handle.trigger_job("nonexistent", None).await,
            Err(JobError::NotFound)
        ));
        handle.trigger_job("manual_job", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(exec_count.load(Ordering::SeqCst), 1);

        handle.trigger_job("manual_job", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(exec_count.load(Ordering::SeqCst), 2);

        let history = handle.get_job_history("manual_job", 10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].triggered_by, "manual");

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_running_job_rejects_trigger_and_is_cancelled_on_shutdown() {
        let (mut scheduler, handle, shutdown_token) = create_test_scheduler();
        scheduler.register_job(Arc::new(BlockingJob)).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(handle.is_job_running("blocking_job").await);
        assert!(matches!(
            handle.trigger_job("blocking_job", None).await,
            Err(JobError::AlreadyRunning)
        ));

        shutdown_token.cancel();
        tokio::time::timeout(Duration::from_secs(2), sched_handle)
            .await
            .expect("scheduler should stop")
            .unwrap();

        let history = handle.get_job_history("blocking_job", 1).await;
        assert_eq!(history[0].status, "failed");
        assert_eq!(history[0].error_message.as_deref(), Some("Cancelled"));
        assert!(!handle.is_job_running("blocking_job").await);
    }
}

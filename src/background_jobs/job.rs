use super::context::JobContext;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

/// Schedule for when a job should run.
#[derive(Debug, Clone)]
pub enum JobSchedule {
    /// Run at fixed intervals
    Interval(Duration),
    /// Run only in response to hooks
    Hook(HookEvent),
    /// Combination of interval and hook-triggered
    Combined {
        interval: Option<Duration>,
        hooks: Vec<HookEvent>,
    },
}

impl JobSchedule {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            JobSchedule::Interval(interval) => Some(*interval),
            JobSchedule::Combined { interval, .. } => *interval,
            JobSchedule::Hook(_) => None,
        }
    }

    pub fn listens_to(&self, event: HookEvent) -> bool {
        match self {
            JobSchedule::Hook(hook) => *hook == event,
            JobSchedule::Combined { hooks, .. } => hooks.contains(&event),
            JobSchedule::Interval(_) => false,
        }
    }
}

/// Events that can trigger hook-based jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    OnStartup,
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookEvent::OnStartup => write!(f, "OnStartup"),
        }
    }
}

/// How a job should be handled during server shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete before shutdown
    WaitForCompletion,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found")]
    NotFound,

    #[error("Job is already running")]
    AlreadyRunning,

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Job was cancelled")]
    Cancelled,
}

/// Trait for background jobs.
///
/// Jobs are executed synchronously in a blocking context and should check
/// for cancellation between units of work.
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Human-readable name for this job.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn schedule(&self) -> JobSchedule;

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// Execute the job.
    ///
    /// Called from `spawn_blocking`. Long-running implementations should
    /// check `ctx.is_cancelled()` and return `JobError::Cancelled`.
    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;

    /// Execute a manually triggered run with optional JSON parameters.
    /// The default ignores the parameters.
    fn execute_with_params(
        &self,
        ctx: &JobContext,
        _params: Option<JsonValue>,
    ) -> Result<(), JobError> {
        self.execute(ctx)
    }
}

//! Background job scheduling and execution system.
//!
//! Periodic and hook-triggered batch work, such as score recalculation and
//! leaderboard rebuilds, runs here instead of on the request path.

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobRunStatus, JobScheduleInfo, SchedulerHandle};
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};

use super::job::{BackgroundJob, JobError, JobSchedule};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Runs kept per job for the history endpoint.
pub const JOB_HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

/// Information about a registered job for API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Vec<String>>,
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        match schedule {
            JobSchedule::Interval(duration) => JobScheduleInfo {
                schedule_type: "interval".to_string(),
                value_secs: Some(duration.as_secs()),
                hooks: None,
            },
            JobSchedule::Hook(event) => JobScheduleInfo {
                schedule_type: "hook".to_string(),
                hooks: Some(vec![event.to_string()]),
                value_secs: None,
            },
            JobSchedule::Combined { interval, hooks } => JobScheduleInfo {
                schedule_type: "combined".to_string(),
                value_secs: interval.map(|d| d.as_secs()),
                hooks: Some(hooks.iter().map(|h| h.to_string()).collect()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunInfo {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl From<&JobRun> for JobRunInfo {
    fn from(run: &JobRun) -> Self {
        JobRunInfo {
            run_id: run.run_id.clone(),
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            status: run.status.as_str().to_string(),
            error_message: run.error_message.clone(),
            triggered_by: run.triggered_by.clone(),
        }
    }
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        params: Option<JsonValue>,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub struct SharedJobState {
    /// Set at registration, never changes.
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    pub running_jobs: HashSet<String>,
    /// Next interval run of each interval-scheduled job.
    pub next_runs: HashMap<String, DateTime<Utc>>,
    /// Most recent runs per job, newest last.
    pub history: HashMap<String, VecDeque<JobRun>>,
}

impl SharedJobState {
    /// Appends a running entry to the job's history and returns its run id.
    pub fn record_start(&mut self, job_id: &str, triggered_by: &str) -> String {
        let run_id = uuid::Uuid::new_v4().to_string();
        let runs = self.history.entry(job_id.to_string()).or_default();
        if runs.len() == JOB_HISTORY_CAPACITY {
            runs.pop_front();
        }
        runs.push_back(JobRun {
            run_id: run_id.clone(),
            started_at: Utc::now(),
            finished_at: None,
            status: JobRunStatus::Running,
            error_message: None,
            triggered_by: triggered_by.to_string(),
        });
        run_id
    }

    pub fn record_finish(&mut self, job_id: &str, status: JobRunStatus, error: Option<String>) {
        if let Some(run) = self
            .history
            .get_mut(job_id)
            .and_then(|runs| runs.back_mut())
        {
            run.finished_at = Some(Utc::now());
            run.status = status;
            run.error_message = error;
        }
    }

    fn job_info(&self, job_id: &str, job: &Arc<dyn BackgroundJob>) -> JobInfo {
        JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: job.schedule().into(),
            is_running: self.running_jobs.contains(job_id),
            last_run: self
                .history
                .get(job_id)
                .and_then(|runs| runs.back())
                .map(JobRunInfo::from),
            next_run_at: self.next_runs.get(job_id).map(|at| at.to_rfc3339()),
        }
    }
}

/// Handle to interact with the job scheduler from HTTP handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shared_state: Arc<RwLock<SharedJobState>>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
        }
    }

    /// All registered jobs, ordered by id.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.shared_state.read().await;
        let mut jobs: Vec<JobInfo> = state
            .jobs
            .iter()
            .map(|(job_id, job)| state.job_info(job_id, job))
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobInfo> {
        let state = self.shared_state.read().await;
        state
            .jobs
            .get(job_id)
            .map(|job| state.job_info(job_id, job))
    }

    /// Trigger a job manually.
    pub async fn trigger_job(&self, job_id: &str, params: Option<JsonValue>) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                params,
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }

    /// Most recent runs of a job, newest first.
    pub async fn get_job_history(&self, job_id: &str, limit: usize) -> Vec<JobRunInfo> {
        let state = self.shared_state.read().await;
        state
            .history
            .get(job_id)
            .map(|runs| runs.iter().rev().take(limit).map(JobRunInfo::from).collect())
            .unwrap_or_default()
    }

    pub async fn is_job_running(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.running_jobs.contains(job_id)
    }

    pub async fn job_exists(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.jobs.contains_key(job_id)
    }
}

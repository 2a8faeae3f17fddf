use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Job, JobStatus, Worker, WorkerStatus};

/// Names of the lifecycle hooks callbacks can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    JobCreated,
    JobUpdated,
    JobPending,
    JobScheduled,
    JobActive,
    JobCompleted,
    JobFailed,
    JobCanceled,
    JobScheduledRetry,
    WorkerCreated,
    WorkerUpdated,
    WorkerStarted,
    WorkerIdle,
    WorkerBusy,
    WorkerStopping,
    WorkerStopped,
    WorkerKilled,
}

impl EventKind {
    /// Hook fired when a job enters `status`
    pub fn for_job_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => Self::JobPending,
            JobStatus::Scheduled => Self::JobScheduled,
            JobStatus::Active => Self::JobActive,
            JobStatus::Completed => Self::JobCompleted,
            JobStatus::Failed => Self::JobFailed,
            JobStatus::Canceled => Self::JobCanceled,
        }
    }

    /// Hook fired when a worker enters `status`
    pub fn for_worker_status(status: WorkerStatus) -> Self {
        match status {
            WorkerStatus::Idle => Self::WorkerIdle,
            WorkerStatus::Busy => Self::WorkerBusy,
            WorkerStatus::Stopping => Self::WorkerStopping,
            WorkerStatus::Stopped => Self::WorkerStopped,
            WorkerStatus::Killed => Self::WorkerKilled,
        }
    }

    /// Get the hook name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobCreated => "jobCreated",
            Self::JobUpdated => "jobUpdated",
            Self::JobPending => "jobPending",
            Self::JobScheduled => "jobScheduled",
            Self::JobActive => "jobActive",
            Self::JobCompleted => "jobCompleted",
            Self::JobFailed => "jobFailed",
            Self::JobCanceled => "jobCanceled",
            Self::JobScheduledRetry => "jobScheduledRetry",
            Self::WorkerCreated => "workerCreated",
            Self::WorkerUpdated => "workerUpdated",
            Self::WorkerStarted => "workerStarted",
            Self::WorkerIdle => "workerIdle",
            Self::WorkerBusy => "workerBusy",
            Self::WorkerStopping => "workerStopping",
            Self::WorkerStopped => "workerStopped",
            Self::WorkerKilled => "workerKilled",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle event delivered to callbacks and stream subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueueEvent {
    /// A job-only event; `kind` is one of the `Job*` kinds except `JobScheduledRetry`
    Job { kind: EventKind, job: Job },

    /// A failed job was rescheduled as `job`
    ScheduledRetry {
        job: Job,
        retry_at: DateTime<Utc>,
        original: Job,
    },

    /// A worker-only event
    Worker { kind: EventKind, worker: Worker },
}

impl QueueEvent {
    pub fn job(kind: EventKind, job: Job) -> Self {
        Self::Job { kind, job }
    }

    pub fn worker(kind: EventKind, worker: Worker) -> Self {
        Self::Worker { kind, worker }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Job { kind, .. } | Self::Worker { kind, .. } => *kind,
            Self::ScheduledRetry { .. } => EventKind::JobScheduledRetry,
        }
    }

    /// The job the event is about, if any
    pub fn as_job(&self) -> Option<&Job> {
        match self {
            Self::Job { job, .. } | Self::ScheduledRetry { job, .. } => Some(job),
            Self::Worker { .. } => None,
        }
    }

    /// The worker the event is about, if any
    pub fn as_worker(&self) -> Option<&Worker> {
        match self {
            Self::Worker { worker, .. } => Some(worker),
            _ => None,
        }
    }
}

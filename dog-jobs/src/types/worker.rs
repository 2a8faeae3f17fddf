use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{Job, JobId, WorkerId};

/// Worker status lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Stopping,
    Stopped,
    /// Forced down after the stop timeout elapsed
    Killed,
}

impl WorkerStatus {
    /// Statuses in which the subscribe loop keeps pulling jobs
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }

    /// Statuses from which a worker may be (re)started
    pub fn is_startable(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Killed => "killed",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "killed" => Ok(Self::Killed),
            other => Err(format!("unknown worker status `{}`", other)),
        }
    }
}

/// Projection of the job a worker is running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentJob {
    pub id: JobId,
    pub name: String,
    pub payload: Value,
}

impl From<&Job> for CurrentJob {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            payload: job.payload.clone(),
        }
    }
}

/// Worker record as persisted by the storage adapter
///
/// `current_job` is only set while Busy or Stopping. Together with
/// `Job::worker_id` it is a best-effort ownership link, not a lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub cluster_name: Option<String>,
    pub current_job: Option<CurrentJob>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Worker {
    pub fn from_new(id: WorkerId, attrs: NewWorker) -> Self {
        Self {
            id,
            status: attrs.status,
            cluster_name: attrs.cluster_name,
            current_job: None,
            started_at: None,
            stopped_at: None,
        }
    }

    pub fn apply(&mut self, patch: WorkerPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(current_job) = patch.current_job {
            self.current_job = current_job;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = started_at;
        }
        if let Some(stopped_at) = patch.stopped_at {
            self.stopped_at = stopped_at;
        }
    }

    /// Check whether this worker claims to be running the given job
    pub fn is_running(&self, job_id: JobId) -> bool {
        self.current_job.as_ref().is_some_and(|current| current.id == job_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewWorker {
    pub status: WorkerStatus,
    pub cluster_name: Option<String>,
}

impl NewWorker {
    /// Workers are created Idle
    pub fn new(cluster_name: Option<String>) -> Self {
        Self {
            status: WorkerStatus::Idle,
            cluster_name,
        }
    }
}

/// Partial update of a worker record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerPatch {
    pub status: Option<WorkerStatus>,
    pub current_job: Option<Option<CurrentJob>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub stopped_at: Option<Option<DateTime<Utc>>>,
}

impl WorkerPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: WorkerStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn current_job(mut self, current_job: Option<CurrentJob>) -> Self {
        self.current_job = Some(current_job);
        self
    }

    pub fn started_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn stopped_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.stopped_at = Some(at);
        self
    }
}

/// Query for listing workers, ordered by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerFilter {
    pub status: Option<WorkerStatus>,
    pub cluster_name: Option<String>,
}

impl WorkerFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: WorkerStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }

    pub fn matches(&self, worker: &Worker) -> bool {
        self.status.map_or(true, |status| worker.status == status)
            && self
                .cluster_name
                .as_ref()
                .map_or(true, |name| worker.cluster_name.as_ref() == Some(name))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{JobId, WorkerId};

/// Job status lifecycle
///
/// Pending/Scheduled -> Active -> Completed | Failed. Failed is terminal for
/// the job id; a retry is a new job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued and ready to run
    Pending,

    /// Queued for a future due time
    Scheduled,

    /// Currently running on a worker
    Active,

    Completed,

    Failed,

    Canceled,
}

impl JobStatus {
    /// Check if the job is in a terminal state (completed, failed, or canceled)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Check if a popped job with this status may be delivered to a handler
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }

    /// Get the status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "scheduled" => Ok(Self::Scheduled),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown job status `{}`", other)),
        }
    }
}

/// Job record as persisted by the storage adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Worker that last ran the job
    pub worker_id: Option<WorkerId>,

    /// Job created to retry this one after a failure
    pub retry_job_id: Option<JobId>,

    pub status: JobStatus,

    /// Handler name used for dispatch
    pub name: String,

    /// Opaque payload handed to the handler
    pub payload: Value,

    pub created_at: DateTime<Utc>,

    /// Due time, present iff the job was created as Scheduled
    pub run_at: Option<DateTime<Utc>>,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,

    /// Number of failed runs carried across retries
    pub failed_attempts: u32,

    pub error_message: Option<String>,
    pub error_stack: Option<String>,
}

impl Job {
    /// Build a job record from creation attributes
    pub fn from_new(id: JobId, attrs: NewJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            worker_id: None,
            retry_job_id: None,
            status: attrs.status,
            name: attrs.name,
            payload: attrs.payload,
            created_at,
            run_at: attrs.run_at,
            started_at: None,
            finished_at: None,
            failed_at: None,
            failed_attempts: attrs.failed_attempts,
            error_message: None,
            error_stack: None,
        }
    }

    /// Apply a partial update; id, name, payload, created_at and run_at are immutable
    pub fn apply(&mut self, patch: JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(worker_id) = patch.worker_id {
            self.worker_id = worker_id;
        }
        if let Some(retry_job_id) = patch.retry_job_id {
            self.retry_job_id = retry_job_id;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = started_at;
        }
        if let Some(finished_at) = patch.finished_at {
            self.finished_at = finished_at;
        }
        if let Some(failed_at) = patch.failed_at {
            self.failed_at = failed_at;
        }
        if let Some(failed_attempts) = patch.failed_attempts {
            self.failed_attempts = failed_attempts;
        }
        if let Some(error_message) = patch.error_message {
            self.error_message = error_message;
        }
        if let Some(error_stack) = patch.error_stack {
            self.error_stack = error_stack;
        }
    }
}

/// Attributes for a job about to be created
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub name: String,
    pub payload: Value,
    pub status: JobStatus,
    pub run_at: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
}

impl NewJob {
    /// Status is derived from `run_at`: Scheduled when present, Pending otherwise.
    /// A sub-millisecond `run_at` is rounded up.
    pub fn new(name: impl Into<String>, payload: Value, run_at: Option<DateTime<Utc>>) -> Self {
        let status = if run_at.is_some() {
            JobStatus::Scheduled
        } else {
            JobStatus::Pending
        };

        Self {
            name: name.into(),
            payload,
            status,
            run_at: run_at.map(super::ceil_millis),
            failed_attempts: 0,
        }
    }

    pub fn with_failed_attempts(mut self, failed_attempts: u32) -> Self {
        self.failed_attempts = failed_attempts;
        self
    }
}

/// Partial update of a job record
///
/// Outer `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub worker_id: Option<Option<WorkerId>>,
    pub retry_job_id: Option<Option<JobId>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub finished_at: Option<Option<DateTime<Utc>>>,
    pub failed_at: Option<Option<DateTime<Utc>>>,
    pub failed_attempts: Option<u32>,
    pub error_message: Option<Option<String>>,
    pub error_stack: Option<Option<String>>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn worker_id(mut self, worker_id: Option<WorkerId>) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn retry_job_id(mut self, retry_job_id: Option<JobId>) -> Self {
        self.retry_job_id = Some(retry_job_id);
        self
    }

    pub fn started_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn finished_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.finished_at = Some(at);
        self
    }

    pub fn failed_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.failed_at = Some(at);
        self
    }

    pub fn failed_attempts(mut self, failed_attempts: u32) -> Self {
        self.failed_attempts = Some(failed_attempts);
        self
    }

    pub fn error(mut self, message: Option<String>, stack: Option<String>) -> Self {
        self.error_message = Some(message);
        self.error_stack = Some(stack);
        self
    }
}

/// Query for listing jobs, ordered by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |status| job.status == status)
    }

    /// Apply status, offset and limit to jobs already sorted by id
    pub fn apply<I>(&self, jobs: I) -> Vec<Job>
    where
        I: IntoIterator<Item = Job>,
    {
        jobs.into_iter()
            .filter(|job| self.matches(job))
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_job_status_follows_run_at() {
        let pending = NewJob::new("mail", json!({}), None);
        let scheduled = NewJob::new("mail", json!({}), Some(Utc::now()));

        assert_eq!(pending.status, JobStatus::Pending);
        assert_eq!(scheduled.status, JobStatus::Scheduled);
    }

    #[test]
    fn patch_clears_and_sets_fields() {
        let attrs = NewJob::new("mail", json!({"to": "a@b.c"}), None);
        let mut job = Job::from_new(JobId(1), attrs, crate::types::now());
        job.apply(JobPatch::new().worker_id(Some(WorkerId(3))).error(Some("boom".into()), None));
        assert_eq!(job.worker_id, Some(WorkerId(3)));
        assert_eq!(job.error_message.as_deref(), Some("boom"));

        job.apply(JobPatch::new().worker_id(None).status(JobStatus::Active));
        assert_eq!(job.worker_id, None);
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn filter_applies_offset_and_limit_after_status() {
        let jobs: Vec<Job> = (1..=6)
            .map(|i| {
                let mut job = Job::from_new(JobId(i), NewJob::new("n", json!(i), None), crate::types::now());
                if i % 2 == 0 {
                    job.status = JobStatus::Completed;
                }
                job
            })
            .collect();

        let page = JobFilter::new().status(JobStatus::Completed).offset(1).limit(1).apply(jobs);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, JobId(4));
    }
}

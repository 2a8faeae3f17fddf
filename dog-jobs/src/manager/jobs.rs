use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use crate::{
    context::EngineContext, job::BackgroundJob, types::now, Job, JobFilter, JobId, JobPatch,
    JobStatus, NewJob, QueueError, QueueResult,
};

/// Enqueue, look up and steer jobs
#[derive(Debug, Clone)]
pub struct JobManager {
    ctx: EngineContext,
}

impl JobManager {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Create a job and queue it
    ///
    /// With `run_at` the job is Scheduled and not popped before that time;
    /// otherwise it is Pending and popped in enqueue order.
    #[instrument(skip(self, payload))]
    pub async fn perform(
        &self,
        name: &str,
        payload: Value,
        run_at: Option<DateTime<Utc>>,
    ) -> QueueResult<Job> {
        self.enqueue_new(NewJob::new(name, payload, run_at))
            .await
            .map_err(|e| QueueError::Enqueue {
                name: name.to_string(),
                source: Box::new(e),
            })
    }

    pub async fn perform_at(&self, at: DateTime<Utc>, name: &str, payload: Value) -> QueueResult<Job> {
        self.perform(name, payload, Some(at)).await
    }

    pub async fn perform_in(&self, delay: Duration, name: &str, payload: Value) -> QueueResult<Job> {
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now().checked_add_signed(delay))
            .ok_or_else(|| QueueError::configuration(format!("delay {delay:?} is out of range")))?;
        self.perform(name, payload, Some(at)).await
    }

    /// Enqueue a typed job under its registered name
    pub async fn enqueue<J: BackgroundJob>(
        &self,
        job: &J,
        run_at: Option<DateTime<Utc>>,
    ) -> QueueResult<Job> {
        let payload = serde_json::to_value(job)?;
        self.perform(J::NAME, payload, run_at).await
    }

    async fn enqueue_new(&self, attrs: NewJob) -> QueueResult<Job> {
        let job = self.ctx.create_job(attrs).await?;
        self.ctx.adapter.push_job_to_queue(job.id, job.run_at).await?;
        info!(job_id = %job.id, status = %job.status, "Job enqueued");
        Ok(job)
    }

    /// Move a waiting job to the front of the pending queue
    ///
    /// A Scheduled job becomes Pending. An already-due scheduled job is
    /// still popped first. Not atomic with a concurrent pop: a worker may
    /// take the job between removal and re-insertion.
    #[instrument(skip(self))]
    pub async fn boost(&self, id: JobId) -> QueueResult<Job> {
        let job = self.require(id).await?;
        if !job.status.is_runnable() {
            return Err(QueueError::InvalidJobState {
                job_id: id,
                status: job.status,
                action: "boosted",
            });
        }

        self.ctx.adapter.remove_job_from_queue(&job).await?;
        let job = if job.status == JobStatus::Scheduled {
            self.ctx
                .update_job(id, JobPatch::new().status(JobStatus::Pending))
                .await?
                .ok_or(QueueError::JobNotFound(id))?
        } else {
            job
        };
        self.ctx.adapter.prepend_job_to_queue(id).await?;
        debug!(job_id = %id, "Job boosted");
        Ok(job)
    }

    /// Cancel a job that has not started yet
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: JobId) -> QueueResult<Job> {
        let job = self.require(id).await?;
        if !job.status.is_runnable() {
            return Err(QueueError::InvalidJobState {
                job_id: id,
                status: job.status,
                action: "canceled",
            });
        }

        self.ctx.adapter.remove_job_from_queue(&job).await?;
        let job = self
            .ctx
            .update_job(id, JobPatch::new().status(JobStatus::Canceled))
            .await?
            .ok_or(QueueError::JobNotFound(id))?;
        info!(job_id = %id, "Job canceled");
        Ok(job)
    }

    /// Delete a job record; running jobs cannot be removed
    #[instrument(skip(self))]
    pub async fn remove(&self, id: JobId) -> QueueResult<()> {
        let job = self.require(id).await?;
        if job.status == JobStatus::Active {
            return Err(QueueError::InvalidJobState {
                job_id: id,
                status: job.status,
                action: "removed",
            });
        }

        self.ctx.adapter.remove_job_from_queue(&job).await?;
        self.ctx.adapter.remove_job(id).await?;
        Ok(())
    }

    pub async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        Ok(self.ctx.adapter.get_job(id).await?)
    }

    pub async fn list(&self, filter: JobFilter) -> QueueResult<Vec<Job>> {
        Ok(self.ctx.adapter.get_jobs(filter).await?)
    }

    /// Poll until every job is Completed, Failed or Canceled
    pub async fn wait_until_all_finished(&self) -> QueueResult<()> {
        self.wait_until_all_finished_with(self.ctx.config.wait_poll_interval)
            .await
    }

    pub async fn wait_until_all_finished_with(&self, poll_interval: Duration) -> QueueResult<()> {
        loop {
            let jobs = self.ctx.adapter.get_jobs(JobFilter::new()).await?;
            if jobs.iter().all(|job| job.status.is_terminal()) {
                return Ok(());
            }
            sleep(poll_interval).await;
        }
    }

    async fn require(&self, id: JobId) -> QueueResult<Job> {
        self.ctx
            .adapter
            .get_job(id)
            .await?
            .ok_or(QueueError::JobNotFound(id))
    }
}

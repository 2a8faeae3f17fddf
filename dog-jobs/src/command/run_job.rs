use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use super::{run_allowing_failure, Command, RetryJob, Step, StepFlow};
use crate::{
    context::EngineContext, types::now, CurrentJob, Job, JobError, JobPatch, JobStatus,
    QueueError, QueueResult, WorkerFilter, WorkerId, WorkerPatch, WorkerStatus,
};

/// Run one popped job on a worker
///
/// Main steps: `check_ownership`, `mark_active`, `perform`.
/// Always: `release_worker`, `record_outcome`.
pub struct RunJob {
    ctx: EngineContext,
    job: Job,
    worker_id: WorkerId,
    claimed: bool,
    outcome: Option<Result<(), JobError>>,
    retry_job: Option<Job>,
}

impl RunJob {
    pub fn new(ctx: EngineContext, job: Job, worker_id: WorkerId) -> Self {
        Self {
            ctx,
            job,
            worker_id,
            claimed: false,
            outcome: None,
            retry_job: None,
        }
    }

    /// The job as last written by this command
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Handler result, if the job was performed
    pub fn outcome(&self) -> Option<&Result<(), JobError>> {
        self.outcome.as_ref()
    }

    /// Job scheduled to retry a failed run
    pub fn retry_job(&self) -> Option<&Job> {
        self.retry_job.as_ref()
    }

    fn check_ownership(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let workers = self.ctx.adapter.get_workers(WorkerFilter::new()).await?;
            let owner = workers
                .iter()
                .find(|worker| worker.id != self.worker_id && worker.is_running(self.job.id));

            if let Some(owner) = owner {
                debug!(
                    job_id = %self.job.id,
                    owner = %owner.id,
                    "Job already running on another worker, skipping"
                );
                return Ok(StepFlow::Finish);
            }
            Ok(StepFlow::Continue)
        })
    }

    fn mark_active(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let patch = JobPatch::new()
                .status(JobStatus::Active)
                .worker_id(Some(self.worker_id))
                .started_at(Some(now()));
            self.job = self
                .ctx
                .update_job(self.job.id, patch)
                .await?
                .ok_or(QueueError::JobNotFound(self.job.id))?;
            self.claimed = true;

            if let Err(error) = self.mark_worker_busy().await {
                self.outcome = Some(Err(JobError::new(format!(
                    "Job was not performed: {error}"
                ))));
                return Err(error);
            }
            Ok(StepFlow::Continue)
        })
    }

    async fn mark_worker_busy(&self) -> QueueResult<()> {
        let worker = self
            .ctx
            .adapter
            .get_worker(self.worker_id)
            .await?
            .ok_or(QueueError::WorkerNotFound(self.worker_id))?;

        // A stop request that arrived meanwhile must not be overwritten
        let mut patch = WorkerPatch::new().current_job(Some(CurrentJob::from(&self.job)));
        if worker.status == WorkerStatus::Idle {
            patch = patch.status(WorkerStatus::Busy);
        }

        self.ctx
            .update_worker(self.worker_id, patch)
            .await?
            .ok_or(QueueError::WorkerNotFound(self.worker_id))?;
        Ok(())
    }

    fn perform(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let outcome = match self.ctx.registry.get(&self.job.name) {
                Some(handler) => {
                    let payload = self.job.payload.clone();
                    AssertUnwindSafe(handler.perform(payload))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(JobError::new(panic_message(panic.as_ref()))))
                }
                None => Err(JobError::new(format!(
                    "No handler registered for job '{}'",
                    self.job.name
                ))),
            };

            match &outcome {
                Ok(()) => debug!(job_id = %self.job.id, "Job performed"),
                Err(error) => warn!(job_id = %self.job.id, error = %error, "Job handler failed"),
            }
            self.outcome = Some(outcome);
            Ok(StepFlow::Continue)
        })
    }

    fn release_worker(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            if !self.claimed {
                return Ok(StepFlow::Continue);
            }

            let Some(worker) = self.ctx.adapter.get_worker(self.worker_id).await? else {
                return Ok(StepFlow::Continue);
            };
            if !worker.is_running(self.job.id) {
                return Ok(StepFlow::Continue);
            }

            let mut patch = WorkerPatch::new().current_job(None);
            if worker.status == WorkerStatus::Busy {
                patch = patch.status(WorkerStatus::Idle);
            }
            self.ctx.update_worker(self.worker_id, patch).await?;
            Ok(StepFlow::Continue)
        })
    }

    fn record_outcome(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let Some(outcome) = self.outcome.take() else {
                return Ok(StepFlow::Continue);
            };

            // A forced stop requeues the job; the late result no longer applies
            let current = self.ctx.adapter.get_job(self.job.id).await?;
            let still_ours = current.as_ref().is_some_and(|job| {
                job.status == JobStatus::Active && job.worker_id == Some(self.worker_id)
            });
            if !still_ours {
                info!(job_id = %self.job.id, "Job was reclaimed while running, discarding result");
                self.outcome = Some(outcome);
                return Ok(StepFlow::Continue);
            }

            let patch = match &outcome {
                Ok(()) => JobPatch::new()
                    .status(JobStatus::Completed)
                    .finished_at(Some(now())),
                Err(error) => JobPatch::new()
                    .status(JobStatus::Failed)
                    .failed_at(Some(now()))
                    .failed_attempts(self.job.failed_attempts + 1)
                    .error(
                        Some(error.message().to_string()),
                        error.stack().map(str::to_string),
                    ),
            };
            self.job = self
                .ctx
                .update_job(self.job.id, patch)
                .await?
                .ok_or(QueueError::JobNotFound(self.job.id))?;

            let failed = outcome.is_err();
            self.outcome = Some(outcome);
            if failed {
                self.schedule_retry().await?;
            }
            Ok(StepFlow::Continue)
        })
    }

    async fn schedule_retry(&mut self) -> QueueResult<()> {
        let retry = run_allowing_failure(RetryJob::new(self.ctx.clone(), self.job.clone())).await;

        if let Some(failure) = retry.failure {
            if failure.error.is_retry_exhausted() {
                info!(
                    job_id = %self.job.id,
                    failed_attempts = self.job.failed_attempts,
                    "Retries exhausted, job stays failed"
                );
                return Ok(());
            }
            return Err(failure.into());
        }

        if let Some(retry_job) = retry.command.into_retry_job() {
            self.job = self
                .ctx
                .update_job(self.job.id, JobPatch::new().retry_job_id(Some(retry_job.id)))
                .await?
                .ok_or(QueueError::JobNotFound(self.job.id))?;
            self.retry_job = Some(retry_job);
        }
        Ok(())
    }
}

impl Command for RunJob {
    const NAME: &'static str = "RunJob";

    fn steps() -> Vec<Step<Self>> {
        vec![
            Step::new("check_ownership", Self::check_ownership),
            Step::new("mark_active", Self::mark_active),
            Step::new("perform", Self::perform),
        ]
    }

    fn always() -> Vec<Step<Self>> {
        vec![
            Step::new("release_worker", Self::release_worker),
            Step::new("record_outcome", Self::record_outcome),
        ]
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Job handler panicked: {detail}")
}

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::info;

use super::{Command, Step, StepFlow};
use crate::{
    backoff, context::EngineContext, types::now, Job, NewJob, QueueError, QueueEvent, QueueResult,
};

/// Schedule a new job that retries a failed one
///
/// The failed job keeps its id and stays Failed; the retry is a fresh
/// Scheduled job carrying the same name, payload and failed attempt count.
pub struct RetryJob {
    ctx: EngineContext,
    job: Job,
    retry_at: Option<DateTime<Utc>>,
    retry_job: Option<Job>,
}

impl RetryJob {
    pub fn new(ctx: EngineContext, job: Job) -> Self {
        Self {
            ctx,
            job,
            retry_at: None,
            retry_job: None,
        }
    }

    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        self.retry_at
    }

    pub fn retry_job(&self) -> Option<&Job> {
        self.retry_job.as_ref()
    }

    pub fn into_retry_job(self) -> Option<Job> {
        self.retry_job
    }

    fn check_attempts(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let max_retries = self.ctx.config.max_retries;
            if self.job.failed_attempts > max_retries {
                return Err(QueueError::RetryExhausted {
                    job_id: self.job.id,
                    failed_attempts: self.job.failed_attempts,
                    max_retries,
                });
            }
            Ok(StepFlow::Continue)
        })
    }

    fn compute_retry_at(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            self.retry_at = Some(backoff::retry_at(&self.ctx.config, &self.job, now())?);
            Ok(StepFlow::Continue)
        })
    }

    fn schedule_retry(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let attrs = NewJob::new(self.job.name.clone(), self.job.payload.clone(), self.retry_at)
                .with_failed_attempts(self.job.failed_attempts);
            let retry_job = self.ctx.create_job(attrs).await?;
            self.ctx
                .adapter
                .push_job_to_queue(retry_job.id, retry_job.run_at)
                .await?;

            let retry_at = retry_job.run_at.unwrap_or_else(now);
            info!(
                job_id = %self.job.id,
                retry_job_id = %retry_job.id,
                %retry_at,
                "Scheduled retry"
            );

            self.ctx
                .emit(QueueEvent::ScheduledRetry {
                    job: retry_job.clone(),
                    retry_at,
                    original: self.job.clone(),
                })
                .await;

            self.retry_at = Some(retry_at);
            self.retry_job = Some(retry_job);
            Ok(StepFlow::Continue)
        })
    }
}

impl Command for RetryJob {
    const NAME: &'static str = "RetryJob";

    fn validate(&self) -> QueueResult<()> {
        self.ctx.config.validate()
    }

    fn steps() -> Vec<Step<Self>> {
        vec![
            Step::new("check_attempts", Self::check_attempts),
            Step::new("compute_retry_at", Self::compute_retry_at),
            Step::new("schedule_retry", Self::schedule_retry),
        ]
    }
}

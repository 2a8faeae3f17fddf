use futures::future::BoxFuture;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{Command, Step, StepFlow};
use crate::{
    context::EngineContext, types::now, JobId, JobPatch, JobStatus, QueueError, QueueResult,
    Worker, WorkerId, WorkerPatch, WorkerStatus,
};

/// Ask a worker to stop and wait for it, killing it on timeout
///
/// A running job is never interrupted. If the worker has not reached
/// Stopped within the configured stop timeout, its current job is reset to
/// Pending and put at the front of the pending queue, the worker is marked
/// Killed, and the command fails with [`QueueError::StopTimeout`].
pub struct StopWorker {
    ctx: EngineContext,
    worker_id: WorkerId,
    requeued: Option<JobId>,
}

impl StopWorker {
    pub fn new(ctx: EngineContext, worker_id: WorkerId) -> Self {
        Self {
            ctx,
            worker_id,
            requeued: None,
        }
    }

    /// Job put back on the queue when the worker was killed
    pub fn requeued(&self) -> Option<JobId> {
        self.requeued
    }

    fn check_status(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let Some(worker) = self.ctx.adapter.get_worker(self.worker_id).await? else {
                debug!(worker_id = %self.worker_id, "Worker already gone");
                return Ok(StepFlow::Finish);
            };

            if !worker.status.is_active() {
                return Err(QueueError::WorkerNotStoppable {
                    worker_id: worker.id,
                    status: worker.status,
                });
            }
            Ok(StepFlow::Continue)
        })
    }

    fn mark_stopping(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let patch = WorkerPatch::new().status(WorkerStatus::Stopping);
            if self.ctx.update_worker(self.worker_id, patch).await?.is_none() {
                return Ok(StepFlow::Finish);
            }
            Ok(StepFlow::Continue)
        })
    }

    fn await_stopped(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let timeout = self.ctx.config.stop_timeout;
            let poll = self.ctx.config.stop_poll_interval;
            let started = Instant::now();

            loop {
                let worker = match self.ctx.adapter.get_worker(self.worker_id).await? {
                    None => return Ok(StepFlow::Continue),
                    Some(worker)
                        if matches!(worker.status, WorkerStatus::Stopped | WorkerStatus::Killed) =>
                    {
                        return Ok(StepFlow::Continue)
                    }
                    Some(worker) => worker,
                };

                if started.elapsed() >= timeout {
                    self.kill(worker).await?;
                    return Err(QueueError::StopTimeout {
                        worker_id: self.worker_id,
                        timeout,
                    });
                }

                sleep(poll).await;
            }
        })
    }

    async fn kill(&mut self, worker: Worker) -> QueueResult<()> {
        if let Some(current) = &worker.current_job {
            let patch = JobPatch::new()
                .status(JobStatus::Pending)
                .worker_id(None)
                .started_at(None);
            if self.ctx.update_job(current.id, patch).await?.is_some() {
                self.ctx.adapter.prepend_job_to_queue(current.id).await?;
                self.requeued = Some(current.id);
                info!(worker_id = %worker.id, job_id = %current.id, "Requeued job of killed worker");
            }
        }

        let patch = WorkerPatch::new()
            .status(WorkerStatus::Killed)
            .current_job(None)
            .stopped_at(Some(now()));
        self.ctx.update_worker(worker.id, patch).await?;
        warn!(worker_id = %worker.id, "Worker did not stop in time and was killed");
        Ok(())
    }
}

impl Command for StopWorker {
    const NAME: &'static str = "StopWorker";

    fn steps() -> Vec<Step<Self>> {
        vec![
            Step::new("check_status", Self::check_status),
            Step::new("mark_stopping", Self::mark_stopping),
            Step::new("await_stopped", Self::await_stopped),
        ]
    }
}

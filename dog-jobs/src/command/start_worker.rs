use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use super::{run_allowing_failure, Command, RunJob, Step, StepFlow};
use crate::{
    backend::subscribe_to_jobs, context::EngineContext, types::now, EventKind, QueueError,
    QueueEvent, QueueResult, WorkerId, WorkerPatch, WorkerStatus,
};

/// Run a worker's job loop until it is asked to stop
///
/// Returns once the worker leaves Idle/Busy or the adapter disconnects.
pub struct StartWorker {
    ctx: EngineContext,
    worker_id: WorkerId,
    restarting: bool,
    processed: u64,
}

impl StartWorker {
    pub fn new(ctx: EngineContext, worker_id: WorkerId) -> Self {
        Self {
            ctx,
            worker_id,
            restarting: false,
            processed: 0,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Jobs handed to this worker by the feed
    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn check_status(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let worker = self
                .ctx
                .adapter
                .get_worker(self.worker_id)
                .await?
                .ok_or(QueueError::WorkerNotFound(self.worker_id))?;

            // Stop was requested before the loop began
            if worker.status == WorkerStatus::Stopping {
                let patch = WorkerPatch::new()
                    .status(WorkerStatus::Stopped)
                    .stopped_at(Some(now()));
                self.ctx.update_worker(self.worker_id, patch).await?;
                debug!(worker_id = %self.worker_id, "Worker stopped before starting");
                return Ok(StepFlow::Finish);
            }

            if !worker.status.is_startable() {
                return Err(QueueError::WorkerNotStartable {
                    worker_id: worker.id,
                    status: worker.status,
                });
            }
            self.restarting = worker.status == WorkerStatus::Stopped;
            Ok(StepFlow::Continue)
        })
    }

    fn mark_started(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            // Only a restart resets the status; a fresh worker may already be Stopping
            let mut patch = WorkerPatch::new().started_at(Some(now())).stopped_at(None);
            if self.restarting {
                patch = patch.status(WorkerStatus::Idle);
            }
            let worker = self
                .ctx
                .update_worker(self.worker_id, patch)
                .await?
                .ok_or(QueueError::WorkerNotFound(self.worker_id))?;

            info!(worker_id = %worker.id, cluster = ?worker.cluster_name, "Worker started");
            self.ctx
                .emit(QueueEvent::worker(EventKind::WorkerStarted, worker))
                .await;
            Ok(StepFlow::Continue)
        })
    }

    fn process_jobs(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            let ctx = self.ctx.clone();
            let worker_id = self.worker_id;
            let options = ctx.config.subscribe_options();
            let processed = &mut self.processed;

            subscribe_to_jobs(
                ctx.adapter.as_ref(),
                &options,
                || keep_going(ctx.clone(), worker_id),
                |job| {
                    *processed += 1;
                    let ctx = ctx.clone();
                    async move {
                        let job_id = job.id;
                        let executed = run_allowing_failure(RunJob::new(ctx, job, worker_id)).await;
                        if let Some(failure) = executed.failure {
                            warn!(
                                %worker_id,
                                %job_id,
                                step = failure.step,
                                error = %failure.error,
                                "Job run failed"
                            );
                        }
                    }
                },
            )
            .await;

            Ok(StepFlow::Continue)
        })
    }

    fn mark_stopped(&mut self) -> BoxFuture<'_, QueueResult<StepFlow>> {
        Box::pin(async move {
            if !self.ctx.adapter.is_connected() {
                debug!(worker_id = %self.worker_id, "Adapter disconnected, leaving worker as is");
                return Ok(StepFlow::Continue);
            }

            // Killed workers keep their status
            let worker = self.ctx.adapter.get_worker(self.worker_id).await?;
            if worker.is_some_and(|worker| worker.status == WorkerStatus::Stopping) {
                let patch = WorkerPatch::new()
                    .status(WorkerStatus::Stopped)
                    .stopped_at(Some(now()));
                self.ctx.update_worker(self.worker_id, patch).await?;
                info!(
                    worker_id = %self.worker_id,
                    processed = self.processed,
                    "Worker stopped"
                );
            }
            Ok(StepFlow::Continue)
        })
    }
}

async fn keep_going(ctx: EngineContext, worker_id: WorkerId) -> bool {
    match ctx.adapter.get_worker(worker_id).await {
        Ok(Some(worker)) => worker.status.is_active(),
        Ok(None) => false,
        Err(e) => {
            // The pop that follows backs off on its own
            warn!(%worker_id, error = %e, "Failed to read worker status");
            ctx.adapter.is_connected()
        }
    }
}

impl Command for StartWorker {
    const NAME: &'static str = "StartWorker";

    fn steps() -> Vec<Step<Self>> {
        vec![
            Step::new("check_status", Self::check_status),
            Step::new("mark_started", Self::mark_started),
            Step::new("process_jobs", Self::process_jobs),
            Step::new("mark_stopped", Self::mark_stopped),
        ]
    }
}

use std::fmt;
use std::sync::Arc;

use crate::{
    backend::StorageAdapter, config::EngineConfig, job::JobRegistry, observability::EventBus,
    EventKind, Job, JobId, JobPatch, NewJob, NewWorker, QueueEvent, QueueResult, Worker, WorkerId,
    WorkerPatch,
};

/// Shared handles every command and manager works against
///
/// Record writes go through here so each one emits its lifecycle events.
#[derive(Clone)]
pub struct EngineContext {
    pub adapter: Arc<dyn StorageAdapter>,
    pub registry: Arc<JobRegistry>,
    pub events: Arc<EventBus>,
    pub config: Arc<EngineConfig>,
}

impl EngineContext {
    pub fn new(
        adapter: Arc<dyn StorageAdapter>,
        registry: Arc<JobRegistry>,
        events: Arc<EventBus>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            adapter,
            registry,
            events,
            config,
        }
    }

    pub async fn emit(&self, event: QueueEvent) {
        self.events.emit(event).await;
    }

    /// Create a job and emit `jobCreated` plus its status event
    pub async fn create_job(&self, attrs: NewJob) -> QueueResult<Job> {
        let job = self.adapter.create_job(attrs).await?;
        self.emit(QueueEvent::job(EventKind::JobCreated, job.clone())).await;
        self.emit(QueueEvent::job(EventKind::for_job_status(job.status), job.clone()))
            .await;
        Ok(job)
    }

    /// Patch a job and emit `jobUpdated`, plus the status event when the
    /// patch sets one. Returns `None` if the job does not exist.
    pub async fn update_job(&self, id: JobId, patch: JobPatch) -> QueueResult<Option<Job>> {
        let status_changed = patch.status.is_some();
        let Some(job) = self.adapter.update_job(id, patch).await? else {
            return Ok(None);
        };

        self.emit(QueueEvent::job(EventKind::JobUpdated, job.clone())).await;
        if status_changed {
            self.emit(QueueEvent::job(EventKind::for_job_status(job.status), job.clone()))
                .await;
        }
        Ok(Some(job))
    }

    pub async fn create_worker(&self, attrs: NewWorker) -> QueueResult<Worker> {
        let worker = self.adapter.create_worker(attrs).await?;
        self.emit(QueueEvent::worker(EventKind::WorkerCreated, worker.clone()))
            .await;
        self.emit(QueueEvent::worker(
            EventKind::for_worker_status(worker.status),
            worker.clone(),
        ))
        .await;
        Ok(worker)
    }

    /// Patch a worker and emit `workerUpdated`, plus the status event when
    /// the patch sets one. Returns `None` if the worker does not exist.
    pub async fn update_worker(&self, id: WorkerId, patch: WorkerPatch) -> QueueResult<Option<Worker>> {
        let status_changed = patch.status.is_some();
        let Some(worker) = self.adapter.update_worker(id, patch).await? else {
            return Ok(None);
        };

        self.emit(QueueEvent::worker(EventKind::WorkerUpdated, worker.clone()))
            .await;
        if status_changed {
            self.emit(QueueEvent::worker(
                EventKind::for_worker_status(worker.status),
                worker.clone(),
            ))
            .await;
        }
        Ok(Some(worker))
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("registry", &self.registry)
            .field("events", &self.events)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::JobStatus;
    use serde_json::json;
    use tokio_stream::StreamExt;

    fn context() -> EngineContext {
        EngineContext::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(JobRegistry::new()),
            Arc::new(EventBus::new()),
            Arc::new(EngineConfig::default()),
        )
    }

    #[tokio::test]
    async fn writes_emit_lifecycle_events() {
        let ctx = context();
        let mut events = ctx.events.subscribe();

        let job = ctx.create_job(NewJob::new("mail", json!(1), None)).await.unwrap();
        ctx.update_job(job.id, JobPatch::new().status(JobStatus::Canceled))
            .await
            .unwrap();
        ctx.update_job(job.id, JobPatch::new().failed_attempts(1))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        for _ in 0..5 {
            kinds.push(events.next().await.unwrap().unwrap().kind());
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::JobCreated,
                EventKind::JobPending,
                EventKind::JobUpdated,
                EventKind::JobCanceled,
                EventKind::JobUpdated,
            ]
        );
    }

    #[tokio::test]
    async fn missing_records_update_to_none() {
        let ctx = context();
        assert!(ctx
            .update_job(JobId(99), JobPatch::new().status(JobStatus::Active))
            .await
            .unwrap()
            .is_none());
        assert!(ctx
            .update_worker(WorkerId(99), WorkerPatch::new())
            .await
            .unwrap()
            .is_none());
    }
}

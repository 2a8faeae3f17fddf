use std::sync::Arc;

use tracing::info;

use crate::{
    backend::StorageAdapter,
    config::EngineConfig,
    context::EngineContext,
    job::JobRegistry,
    manager::{JobManager, WorkerManager},
    observability::{EventBus, LiveMetrics},
    QueueResult,
};

/// Job engine wiring a storage adapter to the job and worker managers
pub struct JobEngine {
    ctx: EngineContext,
    jobs: JobManager,
    workers: WorkerManager,
}

impl JobEngine {
    pub fn builder(adapter: Arc<dyn StorageAdapter>) -> JobEngineBuilder {
        JobEngineBuilder {
            adapter,
            config: EngineConfig::default(),
            registry: JobRegistry::new(),
            events: None,
        }
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn workers(&self) -> &WorkerManager {
        &self.workers
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.ctx.events
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        self.ctx.events.metrics()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.ctx.adapter
    }

    /// Stop every worker, then close the adapter connection
    ///
    /// The connection is closed even if a worker had to be killed; the
    /// first stop failure is returned afterwards.
    pub async fn shutdown(&self) -> QueueResult<()> {
        let stopped = self.workers.stop_all().await;
        self.ctx.adapter.close_connection().await?;
        info!("Job engine shut down");
        stopped
    }
}

pub struct JobEngineBuilder {
    adapter: Arc<dyn StorageAdapter>,
    config: EngineConfig,
    registry: JobRegistry,
    events: Option<EventBus>,
}

impl JobEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: JobRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and assemble the engine
    pub fn build(self) -> QueueResult<JobEngine> {
        self.config.validate()?;

        let ctx = EngineContext::new(
            self.adapter,
            Arc::new(self.registry),
            Arc::new(self.events.unwrap_or_default()),
            Arc::new(self.config),
        );

        Ok(JobEngine {
            jobs: JobManager::new(ctx.clone()),
            workers: WorkerManager::new(ctx.clone()),
            ctx,
        })
    }
}

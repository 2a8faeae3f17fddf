use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::{
    command::{self, StartWorker, StopWorker},
    context::EngineContext,
    NewWorker, QueueError, QueueResult, Worker, WorkerFilter, WorkerId, WorkerStatus,
};

/// Starts and stops the pool of workers owned by this process
#[derive(Clone)]
pub struct WorkerManager {
    ctx: EngineContext,
    inner: Arc<Inner>,
}

struct Inner {
    started: AtomicBool,
    workers: Mutex<BTreeMap<WorkerId, JoinHandle<()>>>,
}

impl WorkerManager {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            inner: Arc::new(Inner {
                started: AtomicBool::new(false),
                workers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Create `concurrency` workers and run each one's job loop on its own task
    #[instrument(skip(self))]
    pub async fn start(
        &self,
        concurrency: usize,
        cluster_name: Option<String>,
    ) -> QueueResult<Vec<WorkerId>> {
        if self.ctx.registry.is_empty() {
            return Err(QueueError::configuration("no job handlers registered"));
        }
        if concurrency == 0 {
            return Err(QueueError::configuration("concurrency must be at least 1"));
        }
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(QueueError::AlreadyStarted);
        }

        let mut workers = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            match self.ctx.create_worker(NewWorker::new(cluster_name.clone())).await {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    self.inner.started.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }

        let ids: Vec<WorkerId> = workers.iter().map(|worker| worker.id).collect();
        let mut tracked = self.inner.workers.lock();
        for id in &ids {
            let ctx = self.ctx.clone();
            let id = *id;
            let handle = tokio::spawn(async move {
                if let Err(e) = command::run(StartWorker::new(ctx, id)).await {
                    error!(worker_id = %id, error = %e, "Worker exited with error");
                }
            });
            tracked.insert(id, handle);
        }

        info!(concurrency, "Worker pool started");
        Ok(ids)
    }

    /// Stop one tracked worker, waiting for its current job to finish
    ///
    /// On [`QueueError::StopTimeout`] the worker has already been killed and
    /// its job requeued. Either way the worker is no longer tracked.
    #[instrument(skip(self))]
    pub async fn stop(&self, id: WorkerId) -> QueueResult<()> {
        if !self.inner.workers.lock().contains_key(&id) {
            return Err(QueueError::WorkerNotFound(id));
        }

        let result = command::run(StopWorker::new(self.ctx.clone(), id)).await;

        let handle = {
            let mut workers = self.inner.workers.lock();
            let handle = workers.remove(&id);
            if workers.is_empty() {
                self.inner.started.store(false, Ordering::SeqCst);
            }
            handle
        };

        // A killed worker's task may still be inside a handler; leave it detached
        if result.is_ok() {
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    warn!(worker_id = %id, error = %e, "Worker task did not finish cleanly");
                }
            }
        }
        result.map(|_| ())
    }

    /// Stop every tracked worker concurrently; returns the first failure
    pub async fn stop_all(&self) -> QueueResult<()> {
        let ids = self.worker_ids();
        join_all(ids.into_iter().map(|id| self.stop(id)))
            .await
            .into_iter()
            .collect()
    }

    /// Poll until every tracked worker is in `status`, or the adapter disconnects
    pub async fn wait_until_all_in_status(&self, status: WorkerStatus) -> QueueResult<()> {
        self.wait_until_all_in_status_with(status, self.ctx.config.wait_poll_interval)
            .await
    }

    pub async fn wait_until_all_in_status_with(
        &self,
        status: WorkerStatus,
        poll_interval: Duration,
    ) -> QueueResult<()> {
        while self.ctx.adapter.is_connected() {
            let mut all_in_status = true;
            for id in self.worker_ids() {
                let worker = self.ctx.adapter.get_worker(id).await?;
                if worker.map_or(true, |worker| worker.status != status) {
                    all_in_status = false;
                    break;
                }
            }
            if all_in_status {
                return Ok(());
            }
            sleep(poll_interval).await;
        }
        Ok(())
    }

    pub async fn get(&self, id: WorkerId) -> QueueResult<Option<Worker>> {
        Ok(self.ctx.adapter.get_worker(id).await?)
    }

    pub async fn list(&self, filter: WorkerFilter) -> QueueResult<Vec<Worker>> {
        Ok(self.ctx.adapter.get_workers(filter).await?)
    }

    /// Ids of the workers this manager is tracking
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.inner.workers.lock().keys().copied().collect()
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerManager")
            .field("started", &self.is_started())
            .field("workers", &self.worker_ids())
            .finish()
    }
}

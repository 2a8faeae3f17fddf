use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::sorted_set::SortedSet;
use crate::{
    backend::StorageAdapter,
    codec::{json::JsonCodec, RecordCodec},
    types::now,
    AdapterError, AdapterResult, Job, JobFilter, JobId, JobPatch, NewJob, NewWorker, Worker,
    WorkerFilter, WorkerId, WorkerPatch,
};

/// Store contents: counters, the two queues and the flat record maps
#[derive(Debug, Default)]
struct State {
    job_seq: u64,
    worker_seq: u64,
    /// Insertion sequence used as the pending score
    queue_seq: i64,
    pending: SortedSet,
    scheduled: SortedSet,
    jobs: BTreeMap<u64, String>,
    workers: BTreeMap<u64, String>,
}

/// In-memory backend for testing and development
///
/// Mirrors the Redis layout: encoded record tuples keyed by id, a pending set
/// scored by insertion sequence and a scheduled set scored by due epoch-ms.
/// All state is owned by the instance, so every backend starts empty.
pub struct MemoryBackend {
    state: Mutex<State>,
    codec: Arc<dyn RecordCodec>,
    connected: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_codec(Arc::new(JsonCodec))
    }

    pub fn with_codec(codec: Arc<dyn RecordCodec>) -> Self {
        debug!(codec = codec.codec_id(), "Created memory backend");
        Self {
            state: Mutex::new(State::default()),
            codec,
            connected: AtomicBool::new(true),
        }
    }

    /// Number of jobs waiting in the pending set
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of jobs waiting in the scheduled set
    pub fn scheduled_len(&self) -> usize {
        self.state.lock().scheduled.len()
    }

    fn ensure_connected(&self, operation: &'static str) -> AdapterResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AdapterError::disconnected(operation))
        }
    }

    fn decode_job(&self, operation: &'static str, raw: &str) -> AdapterResult<Job> {
        self.codec
            .decode_job(raw)
            .map_err(|e| AdapterError::new(operation, e))
    }

    fn encode_job(&self, operation: &'static str, job: &Job) -> AdapterResult<String> {
        self.codec
            .encode_job(job)
            .map_err(|e| AdapterError::new(operation, e))
    }

    fn decode_worker(&self, operation: &'static str, raw: &str) -> AdapterResult<Worker> {
        self.codec
            .decode_worker(raw)
            .map_err(|e| AdapterError::new(operation, e))
    }

    fn encode_worker(&self, operation: &'static str, worker: &Worker) -> AdapterResult<String> {
        self.codec
            .encode_worker(worker)
            .map_err(|e| AdapterError::new(operation, e))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryBackend {
    async fn next_job_id(&self) -> AdapterResult<JobId> {
        self.ensure_connected("next_job_id")?;
        let mut state = self.state.lock();
        state.job_seq += 1;
        Ok(JobId(state.job_seq))
    }

    async fn next_worker_id(&self) -> AdapterResult<WorkerId> {
        self.ensure_connected("next_worker_id")?;
        let mut state = self.state.lock();
        state.worker_seq += 1;
        Ok(WorkerId(state.worker_seq))
    }

    async fn get_jobs(&self, filter: JobFilter) -> AdapterResult<Vec<Job>> {
        self.ensure_connected("get_jobs")?;
        let raws: Vec<String> = self.state.lock().jobs.values().cloned().collect();
        let jobs = raws
            .iter()
            .map(|raw| self.decode_job("get_jobs", raw))
            .collect::<AdapterResult<Vec<_>>>()?;
        Ok(filter.apply(jobs))
    }

    async fn get_job(&self, id: JobId) -> AdapterResult<Option<Job>> {
        self.ensure_connected("get_job")?;
        let raw = self.state.lock().jobs.get(&id.0).cloned();
        raw.map(|raw| self.decode_job("get_job", &raw)).transpose()
    }

    async fn create_job(&self, attrs: NewJob) -> AdapterResult<Job> {
        let id = self.next_job_id().await?;
        let job = Job::from_new(id, attrs, now());
        let raw = self.encode_job("create_job", &job)?;
        self.state.lock().jobs.insert(id.0, raw);
        Ok(job)
    }

    async fn update_job(&self, id: JobId, patch: JobPatch) -> AdapterResult<Option<Job>> {
        self.ensure_connected("update_job")?;
        let mut state = self.state.lock();
        let Some(raw) = state.jobs.get(&id.0) else {
            return Ok(None);
        };
        let mut job = self.decode_job("update_job", raw)?;
        job.apply(patch);
        let raw = self.encode_job("update_job", &job)?;
        state.jobs.insert(id.0, raw);
        Ok(Some(job))
    }

    async fn remove_job(&self, id: JobId) -> AdapterResult<()> {
        self.ensure_connected("remove_job")?;
        self.state.lock().jobs.remove(&id.0);
        Ok(())
    }

    async fn push_job_to_queue(&self, id: JobId, run_at: Option<DateTime<Utc>>) -> AdapterResult<()> {
        self.ensure_connected("push_job_to_queue")?;
        let mut state = self.state.lock();
        match run_at {
            Some(run_at) => state.scheduled.insert(id.0, run_at.timestamp_millis()),
            None => {
                state.queue_seq += 1;
                let score = state.queue_seq;
                state.pending.insert(id.0, score);
            }
        }
        Ok(())
    }

    async fn prepend_job_to_queue(&self, id: JobId) -> AdapterResult<()> {
        self.ensure_connected("prepend_job_to_queue")?;
        let mut state = self.state.lock();
        let score = state.pending.min_score().unwrap_or(0) - 1;
        state.pending.insert(id.0, score);
        Ok(())
    }

    async fn remove_job_from_queue(&self, job: &Job) -> AdapterResult<()> {
        self.ensure_connected("remove_job_from_queue")?;
        let mut state = self.state.lock();
        state.pending.remove(job.id.0);
        state.scheduled.remove(job.id.0);
        Ok(())
    }

    async fn pop_job_from_queue(&self) -> AdapterResult<Option<Job>> {
        self.ensure_connected("pop_job_from_queue")?;
        let now_ms = Utc::now().timestamp_millis();
        let mut state = self.state.lock();

        loop {
            let id = if let Some(id) = state.scheduled.first_at_or_below(now_ms) {
                state.scheduled.remove(id);
                id
            } else if let Some(id) = state.pending.pop_min() {
                id
            } else {
                return Ok(None);
            };

            // Queue entries can outlive a removed record
            if let Some(raw) = state.jobs.get(&id) {
                return self.decode_job("pop_job_from_queue", raw).map(Some);
            }
        }
    }

    async fn get_workers(&self, filter: WorkerFilter) -> AdapterResult<Vec<Worker>> {
        self.ensure_connected("get_workers")?;
        let raws: Vec<String> = self.state.lock().workers.values().cloned().collect();
        let mut workers = Vec::with_capacity(raws.len());
        for raw in &raws {
            let worker = self.decode_worker("get_workers", raw)?;
            if filter.matches(&worker) {
                workers.push(worker);
            }
        }
        Ok(workers)
    }

    async fn get_worker(&self, id: WorkerId) -> AdapterResult<Option<Worker>> {
        self.ensure_connected("get_worker")?;
        let raw = self.state.lock().workers.get(&id.0).cloned();
        raw.map(|raw| self.decode_worker("get_worker", &raw)).transpose()
    }

    async fn create_worker(&self, attrs: NewWorker) -> AdapterResult<Worker> {
        let id = self.next_worker_id().await?;
        let worker = Worker::from_new(id, attrs);
        let raw = self.encode_worker("create_worker", &worker)?;
        self.state.lock().workers.insert(id.0, raw);
        Ok(worker)
    }

    async fn update_worker(&self, id: WorkerId, patch: WorkerPatch) -> AdapterResult<Option<Worker>> {
        self.ensure_connected("update_worker")?;
        let mut state = self.state.lock();
        let Some(raw) = state.workers.get(&id.0) else {
            return Ok(None);
        };
        let mut worker = self.decode_worker("update_worker", raw)?;
        worker.apply(patch);
        let raw = self.encode_worker("update_worker", &worker)?;
        state.workers.insert(id.0, raw);
        Ok(Some(worker))
    }

    async fn remove_worker(&self, id: WorkerId) -> AdapterResult<()> {
        self.ensure_connected("remove_worker")?;
        self.state.lock().workers.remove(&id.0);
        Ok(())
    }

    async fn clear_all(&self) -> AdapterResult<()> {
        self.ensure_connected("clear_all")?;
        *self.state.lock() = State::default();
        Ok(())
    }

    async fn open_connection(&self) -> AdapterResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close_connection(&self) -> AdapterResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> AdapterResult<()> {
        self.ensure_connected("ping")
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use tracing::{debug, info};

use crate::{
    backend::StorageAdapter,
    codec::{json::JsonCodec, RecordCodec},
    types::now,
    AdapterError, AdapterResult, Job, JobFilter, JobId, JobPatch, NewJob, NewWorker, Worker,
    WorkerFilter, WorkerId, WorkerPatch,
};

/// Connection settings for the Redis backend
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// Namespace for every key the backend touches
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "dog-jobs".to_string(),
        }
    }
}

impl RedisConfig {
    /// Read `DOG_JOBS__REDIS_URL` and `DOG_JOBS__REDIS_PREFIX`, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("DOG_JOBS__REDIS_URL").unwrap_or(defaults.url),
            key_prefix: std::env::var("DOG_JOBS__REDIS_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }
}

struct Keys {
    job_ids: String,
    worker_ids: String,
    queue_seq: String,
    pending: String,
    scheduled: String,
    job_index: String,
    worker_index: String,
    prefix: String,
}

impl Keys {
    fn new(prefix: &str) -> Self {
        Self {
            job_ids: format!("{}:ids:job", prefix),
            worker_ids: format!("{}:ids:worker", prefix),
            queue_seq: format!("{}:ids:queue", prefix),
            pending: format!("{}:queue:pending", prefix),
            scheduled: format!("{}:queue:scheduled", prefix),
            job_index: format!("{}:jobs", prefix),
            worker_index: format!("{}:workers", prefix),
            prefix: prefix.to_string(),
        }
    }

    fn job(&self, id: u64) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn worker(&self, id: u64) -> String {
        format!("{}:worker:{}", self.prefix, id)
    }
}

/// Reference backend on a Redis-compatible sorted-set store
///
/// Layout under the key prefix:
/// - `ids:{job,worker,queue}` integer counters
/// - `queue:pending` ZSET, member job id, score insertion sequence (lowered on prepend)
/// - `queue:scheduled` ZSET, member job id, score due epoch-ms
/// - `job:{id}` / `worker:{id}` fixed-order tuple records
/// - `jobs` / `workers` ZSET indexes scored by id, used for listing
pub struct RedisBackend {
    config: RedisConfig,
    keys: Keys,
    codec: Arc<dyn RecordCodec>,
    manager: RwLock<Option<ConnectionManager>>,
    connected: AtomicBool,
}

impl RedisBackend {
    /// Create a backend; call `open_connection` before use
    pub fn new(config: RedisConfig) -> Self {
        Self::with_codec(config, Arc::new(JsonCodec))
    }

    pub fn with_codec(config: RedisConfig, codec: Arc<dyn RecordCodec>) -> Self {
        let keys = Keys::new(&config.key_prefix);
        Self {
            config,
            keys,
            codec,
            manager: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Create and connect in one step
    pub async fn connect(config: RedisConfig) -> AdapterResult<Self> {
        let backend = Self::new(config);
        backend.open_connection().await?;
        Ok(backend)
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn conn(&self, operation: &'static str) -> AdapterResult<ConnectionManager> {
        self.manager
            .read()
            .clone()
            .ok_or_else(|| AdapterError::disconnected(operation))
    }

    async fn load_job(&self, conn: &mut ConnectionManager, operation: &'static str, id: u64) -> AdapterResult<Option<Job>> {
        let raw: Option<String> = conn.get(self.keys.job(id)).await.map_err(wrap(operation))?;
        raw.map(|raw| self.codec.decode_job(&raw).map_err(|e| AdapterError::new(operation, e)))
            .transpose()
    }

    async fn store_job(&self, conn: &mut ConnectionManager, operation: &'static str, job: &Job) -> AdapterResult<()> {
        let raw = self
            .codec
            .encode_job(job)
            .map_err(|e| AdapterError::new(operation, e))?;
        let _: () = conn.set(self.keys.job(job.id.0), raw).await.map_err(wrap(operation))?;
        Ok(())
    }

    async fn load_worker(&self, conn: &mut ConnectionManager, operation: &'static str, id: u64) -> AdapterResult<Option<Worker>> {
        let raw: Option<String> = conn.get(self.keys.worker(id)).await.map_err(wrap(operation))?;
        raw.map(|raw| self.codec.decode_worker(&raw).map_err(|e| AdapterError::new(operation, e)))
            .transpose()
    }

    async fn store_worker(&self, conn: &mut ConnectionManager, operation: &'static str, worker: &Worker) -> AdapterResult<()> {
        let raw = self
            .codec
            .encode_worker(worker)
            .map_err(|e| AdapterError::new(operation, e))?;
        let _: () = conn.set(self.keys.worker(worker.id.0), raw).await.map_err(wrap(operation))?;
        Ok(())
    }

    /// Fetch every record listed in an index, in index order
    async fn load_indexed(
        &self,
        conn: &mut ConnectionManager,
        operation: &'static str,
        index: &str,
        record_key: impl Fn(u64) -> String,
    ) -> AdapterResult<Vec<String>> {
        let ids: Vec<u64> = conn.zrange(index, 0, -1).await.map_err(wrap(operation))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.into_iter().map(record_key).collect();
        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(conn)
            .await
            .map_err(wrap(operation))?;
        Ok(raws.into_iter().flatten().collect())
    }
}

fn wrap(operation: &'static str) -> impl Fn(RedisError) -> AdapterError {
    move |e| AdapterError::new(operation, e)
}

#[async_trait]
impl StorageAdapter for RedisBackend {
    async fn next_job_id(&self) -> AdapterResult<JobId> {
        let mut conn = self.conn("next_job_id")?;
        let id: u64 = conn.incr(&self.keys.job_ids, 1).await.map_err(wrap("next_job_id"))?;
        Ok(JobId(id))
    }

    async fn next_worker_id(&self) -> AdapterResult<WorkerId> {
        let mut conn = self.conn("next_worker_id")?;
        let id: u64 = conn.incr(&self.keys.worker_ids, 1).await.map_err(wrap("next_worker_id"))?;
        Ok(WorkerId(id))
    }

    async fn get_jobs(&self, filter: JobFilter) -> AdapterResult<Vec<Job>> {
        let mut conn = self.conn("get_jobs")?;
        let raws = self
            .load_indexed(&mut conn, "get_jobs", &self.keys.job_index, |id| self.keys.job(id))
            .await?;
        let jobs = raws
            .iter()
            .map(|raw| self.codec.decode_job(raw).map_err(|e| AdapterError::new("get_jobs", e)))
            .collect::<AdapterResult<Vec<_>>>()?;
        Ok(filter.apply(jobs))
    }

    async fn get_job(&self, id: JobId) -> AdapterResult<Option<Job>> {
        let mut conn = self.conn("get_job")?;
        self.load_job(&mut conn, "get_job", id.0).await
    }

    async fn create_job(&self, attrs: NewJob) -> AdapterResult<Job> {
        let id = self.next_job_id().await?;
        let job = Job::from_new(id, attrs, now());
        let raw = self
            .codec
            .encode_job(&job)
            .map_err(|e| AdapterError::new("create_job", e))?;

        let mut conn = self.conn("create_job")?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.keys.job(id.0), raw)
            .ignore()
            .zadd(&self.keys.job_index, id.0, id.0)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(wrap("create_job"))?;
        Ok(job)
    }

    async fn update_job(&self, id: JobId, patch: JobPatch) -> AdapterResult<Option<Job>> {
        let mut conn = self.conn("update_job")?;
        let Some(mut job) = self.load_job(&mut conn, "update_job", id.0).await? else {
            return Ok(None);
        };
        job.apply(patch);
        self.store_job(&mut conn, "update_job", &job).await?;
        Ok(Some(job))
    }

    async fn remove_job(&self, id: JobId) -> AdapterResult<()> {
        let mut conn = self.conn("remove_job")?;
        let _: () = redis::pipe()
            .atomic()
            .del(self.keys.job(id.0))
            .ignore()
            .zrem(&self.keys.job_index, id.0)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(wrap("remove_job"))?;
        Ok(())
    }

    async fn push_job_to_queue(&self, id: JobId, run_at: Option<DateTime<Utc>>) -> AdapterResult<()> {
        let mut conn = self.conn("push_job_to_queue")?;
        match run_at {
            Some(run_at) => {
                let _: () = conn
                    .zadd(&self.keys.scheduled, id.0, run_at.timestamp_millis())
                    .await
                    .map_err(wrap("push_job_to_queue"))?;
            }
            None => {
                let seq: i64 = conn
                    .incr(&self.keys.queue_seq, 1)
                    .await
                    .map_err(wrap("push_job_to_queue"))?;
                let _: () = conn
                    .zadd(&self.keys.pending, id.0, seq)
                    .await
                    .map_err(wrap("push_job_to_queue"))?;
            }
        }
        Ok(())
    }

    async fn prepend_job_to_queue(&self, id: JobId) -> AdapterResult<()> {
        let mut conn = self.conn("prepend_job_to_queue")?;
        let first: Vec<(u64, f64)> = conn
            .zrange_withscores(&self.keys.pending, 0, 0)
            .await
            .map_err(wrap("prepend_job_to_queue"))?;
        let min = first.first().map(|(_, score)| *score).unwrap_or(0.0);
        let _: () = conn
            .zadd(&self.keys.pending, id.0, min - 1.0)
            .await
            .map_err(wrap("prepend_job_to_queue"))?;
        Ok(())
    }

    async fn remove_job_from_queue(&self, job: &Job) -> AdapterResult<()> {
        let mut conn = self.conn("remove_job_from_queue")?;
        let _: () = redis::pipe()
            .zrem(&self.keys.pending, job.id.0)
            .ignore()
            .zrem(&self.keys.scheduled, job.id.0)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(wrap("remove_job_from_queue"))?;
        Ok(())
    }

    async fn pop_job_from_queue(&self) -> AdapterResult<Option<Job>> {
        let mut conn = self.conn("pop_job_from_queue")?;

        loop {
            let now_ms = Utc::now().timestamp_millis();
            let due: Vec<u64> = conn
                .zrangebyscore_limit(&self.keys.scheduled, "-inf", now_ms, 0, 1)
                .await
                .map_err(wrap("pop_job_from_queue"))?;

            let id = if let Some(id) = due.first().copied() {
                // Only the consumer whose ZREM lands owns the job
                let removed: i64 = conn
                    .zrem(&self.keys.scheduled, id)
                    .await
                    .map_err(wrap("pop_job_from_queue"))?;
                if removed == 0 {
                    debug!(job_id = id, "Scheduled job taken by another consumer");
                    continue;
                }
                id
            } else {
                let popped: Vec<String> = redis::cmd("ZPOPMIN")
                    .arg(&self.keys.pending)
                    .arg(1)
                    .query_async(&mut conn)
                    .await
                    .map_err(wrap("pop_job_from_queue"))?;
                match popped.first() {
                    Some(member) => member
                        .parse::<u64>()
                        .map_err(|e| AdapterError::new("pop_job_from_queue", e))?,
                    None => return Ok(None),
                }
            };

            if let Some(job) = self.load_job(&mut conn, "pop_job_from_queue", id).await? {
                return Ok(Some(job));
            }
        }
    }

    async fn get_workers(&self, filter: WorkerFilter) -> AdapterResult<Vec<Worker>> {
        let mut conn = self.conn("get_workers")?;
        let raws = self
            .load_indexed(&mut conn, "get_workers", &self.keys.worker_index, |id| self.keys.worker(id))
            .await?;
        let mut workers = Vec::with_capacity(raws.len());
        for raw in &raws {
            let worker = self
                .codec
                .decode_worker(raw)
                .map_err(|e| AdapterError::new("get_workers", e))?;
            if filter.matches(&worker) {
                workers.push(worker);
            }
        }
        Ok(workers)
    }

    async fn get_worker(&self, id: WorkerId) -> AdapterResult<Option<Worker>> {
        let mut conn = self.conn("get_worker")?;
        self.load_worker(&mut conn, "get_worker", id.0).await
    }

    async fn create_worker(&self, attrs: NewWorker) -> AdapterResult<Worker> {
        let id = self.next_worker_id().await?;
        let worker = Worker::from_new(id, attrs);
        let raw = self
            .codec
            .encode_worker(&worker)
            .map_err(|e| AdapterError::new("create_worker", e))?;

        let mut conn = self.conn("create_worker")?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.keys.worker(id.0), raw)
            .ignore()
            .zadd(&self.keys.worker_index, id.0, id.0)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(wrap("create_worker"))?;
        Ok(worker)
    }

    async fn update_worker(&self, id: WorkerId, patch: WorkerPatch) -> AdapterResult<Option<Worker>> {
        let mut conn = self.conn("update_worker")?;
        let Some(mut worker) = self.load_worker(&mut conn, "update_worker", id.0).await? else {
            return Ok(None);
        };
        worker.apply(patch);
        self.store_worker(&mut conn, "update_worker", &worker).await?;
        Ok(Some(worker))
    }

    async fn remove_worker(&self, id: WorkerId) -> AdapterResult<()> {
        let mut conn = self.conn("remove_worker")?;
        let _: () = redis::pipe()
            .atomic()
            .del(self.keys.worker(id.0))
            .ignore()
            .zrem(&self.keys.worker_index, id.0)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(wrap("remove_worker"))?;
        Ok(())
    }

    async fn clear_all(&self) -> AdapterResult<()> {
        let mut conn = self.conn("clear_all")?;
        let job_ids: Vec<u64> = conn
            .zrange(&self.keys.job_index, 0, -1)
            .await
            .map_err(wrap("clear_all"))?;
        let worker_ids: Vec<u64> = conn
            .zrange(&self.keys.worker_index, 0, -1)
            .await
            .map_err(wrap("clear_all"))?;

        let mut keys: Vec<String> = job_ids.into_iter().map(|id| self.keys.job(id)).collect();
        keys.extend(worker_ids.into_iter().map(|id| self.keys.worker(id)));
        keys.extend([
            self.keys.job_ids.clone(),
            self.keys.worker_ids.clone(),
            self.keys.queue_seq.clone(),
            self.keys.pending.clone(),
            self.keys.scheduled.clone(),
            self.keys.job_index.clone(),
            self.keys.worker_index.clone(),
        ]);

        let _: () = conn.del(keys).await.map_err(wrap("clear_all"))?;
        Ok(())
    }

    async fn open_connection(&self) -> AdapterResult<()> {
        let client = redis::Client::open(self.config.url.as_str()).map_err(wrap("open_connection"))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(wrap("open_connection"))?;
        *self.manager.write() = Some(manager);
        self.connected.store(true, Ordering::SeqCst);
        info!(
            url = %self.config.url,
            prefix = %self.config.key_prefix,
            codec = self.codec.codec_id(),
            "Connected to Redis"
        );
        Ok(())
    }

    async fn close_connection(&self) -> AdapterResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.manager.write().take();
        info!("Closed Redis connection");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> AdapterResult<()> {
        let mut conn = self.conn("ping")?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(wrap("ping"))?;
        Ok(())
    }
}

#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod subscribe;

pub use subscribe::{subscribe_to_jobs, SubscribeOptions};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    AdapterResult, Job, JobFilter, JobId, JobPatch, NewJob, NewWorker, Worker, WorkerFilter,
    WorkerId, WorkerPatch,
};

/// Persistence and queue primitives a backing store must provide
///
/// Every method is safe to call concurrently from many worker loops. Record
/// updates are read-modify-write and not isolated: two concurrent updates of
/// the same id may lose one of them.
#[async_trait]
pub trait StorageAdapter: Send + Sync + 'static {
    /// Monotonically increasing job id
    async fn next_job_id(&self) -> AdapterResult<JobId>;

    /// Monotonically increasing worker id
    async fn next_worker_id(&self) -> AdapterResult<WorkerId>;

    /// List jobs ordered by id
    async fn get_jobs(&self, filter: JobFilter) -> AdapterResult<Vec<Job>>;

    async fn get_job(&self, id: JobId) -> AdapterResult<Option<Job>>;

    /// Persist a new job under a fresh id; does not enqueue it
    async fn create_job(&self, attrs: NewJob) -> AdapterResult<Job>;

    /// Returns the updated record, or `None` when the job does not exist
    async fn update_job(&self, id: JobId, patch: JobPatch) -> AdapterResult<Option<Job>>;

    async fn remove_job(&self, id: JobId) -> AdapterResult<()>;

    /// With `run_at` the job goes to the scheduled set keyed by due time,
    /// otherwise to the pending set keyed by insertion sequence
    async fn push_job_to_queue(&self, id: JobId, run_at: Option<DateTime<Utc>>) -> AdapterResult<()>;

    /// Re-score the job below the current pending minimum
    ///
    /// The job becomes the next pending job popped. An already due scheduled
    /// job still goes first.
    async fn prepend_job_to_queue(&self, id: JobId) -> AdapterResult<()>;

    async fn remove_job_from_queue(&self, job: &Job) -> AdapterResult<()>;

    /// Earliest due scheduled job, else the pending minimum, else nothing
    async fn pop_job_from_queue(&self) -> AdapterResult<Option<Job>>;

    /// List workers ordered by id
    async fn get_workers(&self, filter: WorkerFilter) -> AdapterResult<Vec<Worker>>;

    async fn get_worker(&self, id: WorkerId) -> AdapterResult<Option<Worker>>;

    async fn create_worker(&self, attrs: NewWorker) -> AdapterResult<Worker>;

    async fn update_worker(&self, id: WorkerId, patch: WorkerPatch) -> AdapterResult<Option<Worker>>;

    async fn remove_worker(&self, id: WorkerId) -> AdapterResult<()>;

    /// Drop every record, queue and counter
    async fn clear_all(&self) -> AdapterResult<()>;

    async fn open_connection(&self) -> AdapterResult<()>;

    async fn close_connection(&self) -> AdapterResult<()>;

    fn is_connected(&self) -> bool;

    async fn ping(&self) -> AdapterResult<()>;
}

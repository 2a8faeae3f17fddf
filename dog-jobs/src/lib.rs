//! # dog-jobs: Background job engine for DogRS
//!
//! Application code enqueues named jobs with a JSON payload, optionally
//! delayed to a future time. A pool of workers pops them from a pluggable
//! storage adapter and runs the handler registered for the job name,
//! tracking job and worker status, retries and forced-stop requeue.
//!
//! - **Sorted-set storage**: a pending queue in enqueue order plus a
//!   scheduled queue ordered by due time, in memory or on Redis
//! - **Retries with backoff**: fixed, exponential, per-attempt or custom
//!   delays; each retry is a new Scheduled job
//! - **Graceful stop**: workers finish their current job; on timeout the
//!   worker is killed and the job goes back to the front of the queue
//! - **Lifecycle events**: callbacks and a broadcast stream for every job
//!   and worker transition, with live counters
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dog_jobs::prelude::*;
//! use serde_json::json;
//!
//! # async fn demo() -> QueueResult<()> {
//! let mut registry = JobRegistry::new();
//! registry.register_fn("send_mail", |payload| async move {
//!     println!("mailing {payload}");
//!     Ok(())
//! })?;
//!
//! let engine = JobEngine::builder(Arc::new(MemoryBackend::new()))
//!     .registry(registry)
//!     .build()?;
//!
//! engine.jobs().perform("send_mail", json!({"to": "ops@dogrs.dev"}), None).await?;
//! engine.workers().start(2, None).await?;
//! engine.jobs().wait_until_all_finished().await?;
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backoff;
pub mod codec;
pub mod command;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod job;
pub mod manager;
pub mod observability;
pub mod types;

pub use types::{
    CurrentJob, EventKind, Job, JobFilter, JobId, JobPatch, JobStatus, NewJob, NewWorker,
    QueueEvent, Worker, WorkerFilter, WorkerId, WorkerPatch, WorkerStatus,
};
pub use error::{AdapterError, AdapterResult, CommandFailure, JobError, QueueError, QueueResult};
pub use backend::{subscribe_to_jobs, StorageAdapter, SubscribeOptions};
pub use codec::{json::JsonCodec, RecordCodec};
pub use config::{EngineConfig, RetryDelay, RetryType};
pub use context::EngineContext;
pub use engine::{JobEngine, JobEngineBuilder};
pub use job::{BackgroundJob, JobHandler, JobRegistry};
pub use manager::{JobManager, WorkerManager};
pub use observability::{EventBus, LiveMetrics};

#[cfg(feature = "memory")]
pub use backend::memory::MemoryBackend;

#[cfg(feature = "redis")]
pub use backend::redis::{RedisBackend, RedisConfig};

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

pub mod prelude {
    pub use crate::{
        BackgroundJob, EngineConfig, EventBus, EventKind, Job, JobEngine, JobError, JobId,
        JobRegistry, JobStatus, QueueError, QueueEvent, QueueResult, RetryDelay, RetryType,
        StorageAdapter, Worker, WorkerId, WorkerStatus,
    };

    #[cfg(feature = "memory")]
    pub use crate::MemoryBackend;

    #[cfg(feature = "redis")]
    pub use crate::{RedisBackend, RedisConfig};

    pub use async_trait::async_trait;
}

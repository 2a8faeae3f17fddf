use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    codec::RecordCodec, CurrentJob, Job, JobId, JobStatus, QueueError, QueueResult, Worker,
    WorkerId, WorkerStatus,
};

/// `[id, workerId, retryJobId, status, name, payload, createdAt, runAt,
///   startedAt, finishedAt, failedAt, failedAttempts, errorMessage, errorStack]`
type JobTuple = (
    u64,
    Option<u64>,
    Option<u64>,
    JobStatus,
    String,
    Value,
    i64,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    u32,
    Option<String>,
    Option<String>,
);

/// `[id, status, clusterName, currentJob [id, name, payload] | null, startedAt, stoppedAt]`
type WorkerTuple = (
    u64,
    WorkerStatus,
    Option<String>,
    Option<(u64, String, Value)>,
    Option<i64>,
    Option<i64>,
);

/// JSON array codec with a fixed field order
///
/// Positional arrays keep the stored format stable regardless of how the Rust
/// structs evolve. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl RecordCodec for JsonCodec {
    fn encode_job(&self, job: &Job) -> QueueResult<String> {
        let tuple = (
            job.id.0,
            job.worker_id.map(|id| id.0),
            job.retry_job_id.map(|id| id.0),
            job.status,
            &job.name,
            &job.payload,
            job.created_at.timestamp_millis(),
            millis(job.run_at),
            millis(job.started_at),
            millis(job.finished_at),
            millis(job.failed_at),
            job.failed_attempts,
            &job.error_message,
            &job.error_stack,
        );
        Ok(serde_json::to_string(&tuple)?)
    }

    fn decode_job(&self, raw: &str) -> QueueResult<Job> {
        let (
            id,
            worker_id,
            retry_job_id,
            status,
            name,
            payload,
            created_at,
            run_at,
            started_at,
            finished_at,
            failed_at,
            failed_attempts,
            error_message,
            error_stack,
        ): JobTuple = serde_json::from_str(raw)?;

        Ok(Job {
            id: JobId(id),
            worker_id: worker_id.map(WorkerId),
            retry_job_id: retry_job_id.map(JobId),
            status,
            name,
            payload,
            created_at: from_millis(created_at)?,
            run_at: opt_from_millis(run_at)?,
            started_at: opt_from_millis(started_at)?,
            finished_at: opt_from_millis(finished_at)?,
            failed_at: opt_from_millis(failed_at)?,
            failed_attempts,
            error_message,
            error_stack,
        })
    }

    fn encode_worker(&self, worker: &Worker) -> QueueResult<String> {
        let current_job = worker
            .current_job
            .as_ref()
            .map(|current| (current.id.0, &current.name, &current.payload));
        let tuple = (
            worker.id.0,
            worker.status,
            &worker.cluster_name,
            current_job,
            millis(worker.started_at),
            millis(worker.stopped_at),
        );
        Ok(serde_json::to_string(&tuple)?)
    }

    fn decode_worker(&self, raw: &str) -> QueueResult<Worker> {
        let (id, status, cluster_name, current_job, started_at, stopped_at): WorkerTuple =
            serde_json::from_str(raw)?;

        Ok(Worker {
            id: WorkerId(id),
            status,
            cluster_name,
            current_job: current_job.map(|(id, name, payload)| CurrentJob {
                id: JobId(id),
                name,
                payload,
            }),
            started_at: opt_from_millis(started_at)?,
            stopped_at: opt_from_millis(stopped_at)?,
        })
    }

    fn codec_id(&self) -> &'static str {
        "json-tuple"
    }
}

fn millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(|at| at.timestamp_millis())
}

fn from_millis(ms: i64) -> QueueResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::Serialization(format!("timestamp out of range: {}", ms)))
}

fn opt_from_millis(ms: Option<i64>) -> QueueResult<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

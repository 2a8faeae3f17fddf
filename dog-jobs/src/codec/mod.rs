pub mod json;

use crate::{Job, QueueResult, Worker};

/// Wire format for job and worker records in a flat record store
///
/// Implementations must be lossless for every field at millisecond precision.
pub trait RecordCodec: Send + Sync {
    fn encode_job(&self, job: &Job) -> QueueResult<String>;

    fn decode_job(&self, raw: &str) -> QueueResult<Job>;

    fn encode_worker(&self, worker: &Worker) -> QueueResult<String>;

    fn decode_worker(&self, raw: &str) -> QueueResult<Worker>;

    /// Get codec identifier
    fn codec_id(&self) -> &'static str;
}

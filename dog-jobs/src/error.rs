use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::types::{JobId, JobStatus, WorkerId, WorkerStatus};

/// Result type for engine operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for storage adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Engine errors
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Invalid configuration, never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// A command step failed and the caller did not allow failure
    #[error(transparent)]
    Command(Box<CommandFailure>),

    #[error("Max attempts reached for job {job_id}: {failed_attempts} failed attempts, max retries {max_retries}")]
    RetryExhausted {
        job_id: JobId,
        failed_attempts: u32,
        max_retries: u32,
    },

    /// Raised after the worker has already been killed and its job requeued
    #[error("Worker {worker_id} did not stop within {timeout:?} and was killed")]
    StopTimeout { worker_id: WorkerId, timeout: Duration },

    #[error("Failed to enqueue job `{name}`: {source}")]
    Enqueue {
        name: String,
        #[source]
        source: Box<QueueError>,
    },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Worker {worker_id} cannot be started, currently {status}")]
    WorkerNotStartable { worker_id: WorkerId, status: WorkerStatus },

    #[error("Worker {worker_id} cannot be stopped, currently {status}")]
    WorkerNotStoppable { worker_id: WorkerId, status: WorkerStatus },

    #[error("Job {job_id} cannot be {action} while {status}")]
    InvalidJobState {
        job_id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Worker pool already started")]
    AlreadyStarted,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl QueueError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Strip command and enqueue wrappers down to the error that caused them
    pub fn root_cause(&self) -> &QueueError {
        let mut current = self;
        loop {
            match current {
                Self::Command(failure) => current = &failure.error,
                Self::Enqueue { source, .. } => current = source.as_ref(),
                other => return other,
            }
        }
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self.root_cause(), Self::RetryExhausted { .. })
    }

    pub fn is_stop_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::StopTimeout { .. })
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<CommandFailure> for QueueError {
    fn from(failure: CommandFailure) -> Self {
        Self::Command(Box::new(failure))
    }
}

/// Storage or connectivity failure, carrying the underlying cause
#[derive(Error, Debug, Clone)]
#[error("Adapter operation `{operation}` failed: {source}")]
pub struct AdapterError {
    operation: &'static str,
    #[source]
    source: Arc<dyn StdError + Send + Sync>,
}

impl AdapterError {
    pub fn new(operation: &'static str, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            operation,
            source: Arc::from(source.into()),
        }
    }

    pub fn disconnected(operation: &'static str) -> Self {
        Self::new(operation, "not connected")
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

/// A failed command step, captured instead of unwinding
#[derive(Error, Debug, Clone)]
#[error("{command} failed at step `{step}`: {error}")]
pub struct CommandFailure {
    pub command: &'static str,
    pub step: &'static str,
    #[source]
    pub error: QueueError,
}

impl CommandFailure {
    pub fn error_message(&self) -> String {
        self.error.to_string()
    }

    pub fn error_stack(&self) -> String {
        render_chain(self)
    }
}

/// Error returned by a job handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    message: String,
    stack: Option<String>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture an error and its `source()` chain
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        Self {
            message: err.to_string(),
            stack: Some(render_chain(err)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for JobError {}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::from_error(&err)
    }
}

fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {}", cause));
        source = cause.source();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_wrappers() {
        let inner = QueueError::RetryExhausted {
            job_id: JobId::from(7),
            failed_attempts: 2,
            max_retries: 1,
        };
        let wrapped = QueueError::from(CommandFailure {
            command: "RetryJob",
            step: "check_attempts",
            error: inner,
        });
        let outer = QueueError::Enqueue {
            name: "mail".into(),
            source: Box::new(wrapped),
        };

        assert!(outer.is_retry_exhausted());
        assert!(outer.to_string().contains("Max attempts reached"));
    }

    #[test]
    fn job_error_renders_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let adapter = AdapterError::new("create_job", io);
        let err = JobError::from_error(&adapter);

        assert!(err.message().contains("create_job"));
        assert!(err.stack().unwrap().contains("caused by: disk full"));
    }
}

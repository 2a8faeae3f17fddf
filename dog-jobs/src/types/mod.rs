pub mod events;
pub mod ids;
pub mod job;
pub mod worker;

pub use events::{EventKind, QueueEvent};
pub use ids::{JobId, WorkerId};
pub use job::{Job, JobFilter, JobPatch, JobStatus, NewJob};
pub use worker::{CurrentJob, NewWorker, Worker, WorkerFilter, WorkerPatch, WorkerStatus};

use chrono::{DateTime, Utc};

/// Current time truncated to millisecond precision
///
/// Stored timestamps are encoded as epoch milliseconds, so every timestamp
/// the engine stamps is truncated up front to keep records round-trip exact.
pub fn now() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// Round up to the next whole millisecond
///
/// Due times are stored as epoch milliseconds and must never land before
/// the requested instant.
pub fn ceil_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let floor = truncate_millis(at);
    if floor < at {
        floor
            .checked_add_signed(chrono::Duration::milliseconds(1))
            .unwrap_or(floor)
    } else {
        floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_millis_never_moves_earlier() {
        let whole = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let partial = whole + chrono::Duration::microseconds(999);

        assert_eq!(ceil_millis(whole), whole);
        assert_eq!(
            ceil_millis(partial),
            whole + chrono::Duration::milliseconds(1)
        );
        assert!(ceil_millis(partial) >= partial);
        assert_eq!(truncate_millis(partial), whole);
    }
}

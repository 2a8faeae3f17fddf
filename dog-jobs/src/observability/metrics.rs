use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{EventKind, QueueEvent};

/// Live counters fed by every emitted lifecycle event
pub struct LiveMetrics {
    jobs_created: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_canceled: AtomicU64,
    workers_killed: AtomicU64,

    // Per-job-name metrics
    job_name_metrics: RwLock<HashMap<String, JobNameMetrics>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self {
            jobs_created: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_canceled: AtomicU64::new(0),
            workers_killed: AtomicU64::new(0),
            job_name_metrics: RwLock::new(HashMap::new()),
        }
    }

    /// Count an event
    pub fn record(&self, event: &QueueEvent) {
        let kind = event.kind();
        let counter = match kind {
            EventKind::JobCreated => &self.jobs_created,
            EventKind::JobCompleted => &self.jobs_completed,
            EventKind::JobFailed => &self.jobs_failed,
            EventKind::JobScheduledRetry => &self.jobs_retried,
            EventKind::JobCanceled => &self.jobs_canceled,
            EventKind::WorkerKilled => &self.workers_killed,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let Some(job) = event.as_job() else {
            return;
        };
        let mut metrics = self.job_name_metrics.write();
        let entry = metrics.entry(job.name.clone()).or_default();
        match kind {
            EventKind::JobCreated => entry.created += 1,
            EventKind::JobCompleted => entry.completed += 1,
            EventKind::JobFailed => entry.failed += 1,
            EventKind::JobScheduledRetry => entry.retried += 1,
            EventKind::JobCanceled => entry.canceled += 1,
            _ => {}
        }
    }

    pub fn jobs_created(&self) -> u64 {
        self.jobs_created.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_canceled(&self) -> u64 {
        self.jobs_canceled.load(Ordering::Relaxed)
    }

    pub fn workers_killed(&self) -> u64 {
        self.workers_killed.load(Ordering::Relaxed)
    }

    /// Get metrics for a specific job name
    pub fn job_name_metrics(&self, name: &str) -> Option<JobNameMetrics> {
        self.job_name_metrics.read().get(name).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            global: GlobalMetrics {
                jobs_created: self.jobs_created(),
                jobs_completed: self.jobs_completed(),
                jobs_failed: self.jobs_failed(),
                jobs_retried: self.jobs_retried(),
                jobs_canceled: self.jobs_canceled(),
                workers_killed: self.workers_killed(),
            },
            job_names: self.job_name_metrics.read().clone(),
        }
    }
}

impl Default for LiveMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for a specific job name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobNameMetrics {
    pub created: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub canceled: u64,
}

impl JobNameMetrics {
    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.completed + self.failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.completed as f64 / total_processed as f64) * 100.0
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub global: GlobalMetrics,
    pub job_names: HashMap<String, JobNameMetrics>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalMetrics {
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_canceled: u64,
    pub workers_killed: u64,
}

impl GlobalMetrics {
    /// Calculate overall success rate
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.jobs_completed + self.jobs_failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.jobs_completed as f64 / total_processed as f64) * 100.0
        }
    }

    /// Jobs created but not yet in a terminal state
    pub fn jobs_in_progress(&self) -> u64 {
        self.jobs_created
            .saturating_sub(self.jobs_completed + self.jobs_failed + self.jobs_canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now, Job, JobId, NewJob};
    use serde_json::json;

    fn job(name: &str) -> Job {
        Job::from_new(JobId(1), NewJob::new(name, json!(null), None), now())
    }

    #[test]
    fn test_live_metrics() {
        let metrics = LiveMetrics::new();

        metrics.record(&QueueEvent::job(EventKind::JobCreated, job("mail")));
        metrics.record(&QueueEvent::job(EventKind::JobCompleted, job("mail")));
        metrics.record(&QueueEvent::job(EventKind::JobUpdated, job("mail")));

        assert_eq!(metrics.jobs_created(), 1);
        assert_eq!(metrics.jobs_completed(), 1);

        let mail = metrics.job_name_metrics("mail").unwrap();
        assert_eq!(mail.created, 1);
        assert_eq!(mail.completed, 1);
        assert_eq!(mail.success_rate(), 100.0);
    }

    #[test]
    fn test_global_metrics() {
        let global = GlobalMetrics {
            jobs_created: 100,
            jobs_completed: 80,
            jobs_failed: 10,
            jobs_retried: 5,
            jobs_canceled: 5,
            workers_killed: 0,
        };

        assert_eq!(global.success_rate(), 88.88888888888889);
        assert_eq!(global.jobs_in_progress(), 5);
    }
}

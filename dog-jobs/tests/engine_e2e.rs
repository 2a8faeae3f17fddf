#![cfg(feature = "memory")]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::StreamExt;

use dog_jobs::{
    backend::memory::MemoryBackend, BackgroundJob, EngineConfig, EventKind, JobEngine, JobError,
    JobFilter, JobRegistry, JobStatus, QueueError, StorageAdapter, WorkerStatus,
};

type Journal = Arc<Mutex<Vec<String>>>;

fn recording_registry(journal: &Journal) -> JobRegistry {
    let mut registry = JobRegistry::new();
    let journal = journal.clone();
    registry
        .register_fn("record", move |payload: Value| {
            let journal = journal.clone();
            async move {
                let name = payload["name"].as_str().unwrap_or_default().to_string();
                journal.lock().push(name);
                Ok(())
            }
        })
        .unwrap();
    registry
}

fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_poll_jitter(Duration::from_millis(5))
        .with_stop_poll_interval(Duration::from_millis(10))
        .with_wait_poll_interval(Duration::from_millis(20))
}

fn engine(backend: &Arc<MemoryBackend>, registry: JobRegistry) -> JobEngine {
    JobEngine::builder(backend.clone())
        .config(fast_config())
        .registry(registry)
        .build()
        .unwrap()
}

/// E1. Plain jobs run in order, the scheduled one runs once due, all on the one worker
#[test_log::test(tokio::test)]
async fn test_single_worker_runs_jobs_in_order() {
    let journal = Journal::default();
    let backend = Arc::new(MemoryBackend::new());
    let engine = engine(&backend, recording_registry(&journal));
    let jobs = engine.jobs();

    // Arrange
    let a = jobs.perform("record", json!({"name": "A"}), None).await.unwrap();
    let b = jobs.perform("record", json!({"name": "B"}), None).await.unwrap();
    let c = jobs.perform("record", json!({"name": "C"}), None).await.unwrap();
    let d = jobs
        .perform_in(Duration::from_millis(250), "record", json!({"name": "D"}))
        .await
        .unwrap();
    assert_eq!(d.status, JobStatus::Scheduled);

    // Act
    let worker_ids = engine.workers().start(1, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    tokio::time::timeout(Duration::from_secs(5), jobs.wait_until_all_finished())
        .await
        .expect("jobs did not finish")
        .unwrap();

    // Assert
    assert_eq!(*journal.lock(), vec!["A", "B", "C", "D"]);

    let completed = jobs
        .list(JobFilter::new().status(JobStatus::Completed))
        .await
        .unwrap();
    assert_eq!(
        completed.iter().map(|job| job.id).collect::<Vec<_>>(),
        vec![a.id, b.id, c.id, d.id]
    );
    for job in &completed {
        assert_eq!(job.worker_id, Some(worker_ids[0]));
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());
    }
    let finished: Vec<_> = completed.iter().map(|job| job.finished_at).collect();
    assert!(finished.windows(2).all(|pair| pair[0] <= pair[1]));

    let d = jobs.get(d.id).await.unwrap().unwrap();
    assert!(d.started_at >= d.run_at);

    engine.shutdown().await.unwrap();
    assert!(!backend.is_connected());
}

/// E2. Starting a running pool again is refused and leaves it untouched
#[test_log::test(tokio::test)]
async fn test_start_twice_is_refused() {
    let journal = Journal::default();
    let backend = Arc::new(MemoryBackend::new());
    let engine = engine(&backend, recording_registry(&journal));

    let first = engine.workers().start(2, None).await.unwrap();
    let err = engine.workers().start(1, None).await.unwrap_err();

    assert!(matches!(err, QueueError::AlreadyStarted));
    assert_eq!(engine.workers().worker_ids(), first);
    assert_eq!(engine.workers().list(Default::default()).await.unwrap().len(), 2);

    engine.shutdown().await.unwrap();
}

/// E3. A pool needs handlers and at least one worker
#[tokio::test]
async fn test_start_rejects_bad_configuration() {
    let backend = Arc::new(MemoryBackend::new());

    let empty = engine(&backend, JobRegistry::new());
    let err = empty.workers().start(1, None).await.unwrap_err();
    assert!(matches!(err, QueueError::Configuration(_)));

    let journal = Journal::default();
    let zero = engine(&backend, recording_registry(&journal));
    let err = zero.workers().start(0, None).await.unwrap_err();
    assert!(matches!(err, QueueError::Configuration(_)));
    assert!(!zero.workers().is_started());
}

#[derive(Serialize, Deserialize)]
struct Resize {
    image: String,
    width: u32,
}

#[async_trait]
impl BackgroundJob for Resize {
    type Context = Journal;

    const NAME: &'static str = "resize";

    async fn perform(self, journal: Journal) -> Result<(), JobError> {
        if self.width == 0 {
            return Err(JobError::new("width must be positive"));
        }
        journal.lock().push(format!("{}@{}", self.image, self.width));
        Ok(())
    }
}

/// E4. Typed jobs run with their context; failures retry until exhausted
#[test_log::test(tokio::test)]
async fn test_typed_jobs_and_retries() {
    let journal = Journal::default();
    let mut registry = JobRegistry::new();
    registry.register::<Resize>(journal.clone()).unwrap();

    let backend = Arc::new(MemoryBackend::new());
    let engine = JobEngine::builder(backend.clone())
        .config(
            fast_config()
                .with_max_retries(1)
                .with_retry_delay(dog_jobs::RetryDelay::Fixed(Duration::from_millis(10))),
        )
        .registry(registry)
        .build()
        .unwrap();
    let mut events = engine.events().subscribe();

    let ok = engine
        .jobs()
        .enqueue(&Resize { image: "cat.png".into(), width: 64 }, None)
        .await
        .unwrap();
    let bad = engine
        .jobs()
        .enqueue(&Resize { image: "dog.png".into(), width: 0 }, None)
        .await
        .unwrap();

    engine.workers().start(1, None).await.unwrap();
    // Leave time for the retry to be scheduled and run
    tokio::time::sleep(Duration::from_millis(250)).await;
    tokio::time::timeout(Duration::from_secs(5), engine.jobs().wait_until_all_finished())
        .await
        .expect("jobs did not finish")
        .unwrap();

    assert_eq!(*journal.lock(), vec!["cat.png@64"]);
    assert_eq!(
        engine.jobs().get(ok.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );

    // bad -> retry (attempt 2) -> exhausted
    let failed = engine
        .jobs()
        .list(JobFilter::new().status(JobStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0].id, bad.id);
    assert_eq!(failed[0].retry_job_id, Some(failed[1].id));
    assert_eq!(failed[1].failed_attempts, 2);
    assert_eq!(failed[1].retry_job_id, None);

    let metrics = engine.metrics().snapshot();
    assert_eq!(metrics.global.jobs_completed, 1);
    assert_eq!(metrics.global.jobs_failed, 2);
    assert_eq!(metrics.global.jobs_retried, 1);
    assert_eq!(metrics.job_names["resize"].created, 3);

    engine.shutdown().await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(Some(Ok(event))) =
        tokio::time::timeout(Duration::from_millis(50), events.next()).await
    {
        kinds.push(event.kind());
    }
    assert!(kinds.contains(&EventKind::WorkerStarted));
    assert!(kinds.contains(&EventKind::JobScheduledRetry));
    assert!(kinds.contains(&EventKind::WorkerStopped));
}

/// E5. Boost, cancel and remove steer waiting jobs
#[tokio::test]
async fn test_boost_cancel_and_remove() {
    let journal = Journal::default();
    let backend = Arc::new(MemoryBackend::new());
    let engine = engine(&backend, recording_registry(&journal));
    let jobs = engine.jobs();

    let a = jobs.perform("record", json!({"name": "A"}), None).await.unwrap();
    let b = jobs.perform("record", json!({"name": "B"}), None).await.unwrap();
    let c = jobs.perform("record", json!({"name": "C"}), None).await.unwrap();
    let later = jobs
        .perform_in(Duration::from_secs(3600), "record", json!({"name": "later"}))
        .await
        .unwrap();

    // Boosting a scheduled job makes it pending and first in line
    let boosted = jobs.boost(later.id).await.unwrap();
    assert_eq!(boosted.status, JobStatus::Pending);
    jobs.boost(c.id).await.unwrap();

    // Canceled jobs leave the queue
    let canceled = jobs.cancel(b.id).await.unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);
    let err = jobs.cancel(b.id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidJobState { action: "canceled", .. }));

    let mut order = Vec::new();
    while let Some(job) = backend.pop_job_from_queue().await.unwrap() {
        order.push(job.id);
    }
    assert_eq!(order, vec![c.id, later.id, a.id]);

    jobs.remove(a.id).await.unwrap();
    assert!(jobs.get(a.id).await.unwrap().is_none());
    assert!(matches!(
        jobs.boost(a.id).await.unwrap_err(),
        QueueError::JobNotFound(_)
    ));
}

/// E6. Once the adapter is closed, enqueue fails with the job name attached
#[tokio::test]
async fn test_enqueue_after_shutdown_fails() {
    let journal = Journal::default();
    let backend = Arc::new(MemoryBackend::new());
    let engine = engine(&backend, recording_registry(&journal));

    engine.shutdown().await.unwrap();

    let err = engine
        .jobs()
        .perform("record", json!({"name": "late"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Enqueue { ref name, .. } if name == "record"));
    assert!(matches!(err.root_cause(), QueueError::Adapter(_)));
}

/// E7. Stopped workers can be awaited by status
#[tokio::test]
async fn test_wait_until_all_in_status() {
    let journal = Journal::default();
    let backend = Arc::new(MemoryBackend::new());
    let engine = engine(&backend, recording_registry(&journal));
    let workers = engine.workers();

    let ids = workers.start(3, Some("eu-1".into())).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        workers.wait_until_all_in_status(WorkerStatus::Idle),
    )
    .await
    .expect("workers never went idle")
    .unwrap();

    for id in &ids {
        let worker = workers.get(*id).await.unwrap().unwrap();
        assert_eq!(worker.cluster_name.as_deref(), Some("eu-1"));
    }

    workers.stop_all().await.unwrap();
    for id in &ids {
        assert_eq!(
            workers.get(*id).await.unwrap().unwrap().status,
            WorkerStatus::Stopped
        );
    }
}

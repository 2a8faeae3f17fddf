//! Storage adapter conformance checks shared by the backend test suites
#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use dog_jobs::{
    Job, JobFilter, JobId, JobPatch, JobStatus, NewJob, NewWorker, StorageAdapter, WorkerFilter,
    WorkerPatch, WorkerStatus,
};

pub async fn enqueue<A>(adapter: &A, name: &str, run_at: Option<DateTime<Utc>>) -> Job
where
    A: StorageAdapter + ?Sized,
{
    let job = adapter
        .create_job(NewJob::new(name, json!({ "name": name }), run_at))
        .await
        .unwrap();
    adapter.push_job_to_queue(job.id, job.run_at).await.unwrap();
    job
}

pub async fn pop_all<A>(adapter: &A) -> Vec<JobId>
where
    A: StorageAdapter + ?Sized,
{
    let mut ids = Vec::new();
    while let Some(job) = adapter.pop_job_from_queue().await.unwrap() {
        ids.push(job.id);
    }
    ids
}

fn in_ms(ms: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(ms)
}

/// Plain jobs pop in enqueue order
pub async fn pending_jobs_pop_in_fifo_order<A>(adapter: &A)
where
    A: StorageAdapter + ?Sized,
{
    let a = enqueue(adapter, "a", None).await;
    let b = enqueue(adapter, "b", None).await;
    let c = enqueue(adapter, "c", None).await;

    assert_eq!(pop_all(adapter).await, vec![a.id, b.id, c.id]);
}

/// Scheduled jobs stay hidden until due, then pop
pub async fn scheduled_job_waits_until_due<A>(adapter: &A)
where
    A: StorageAdapter + ?Sized,
{
    let later = enqueue(adapter, "later", Some(in_ms(150))).await;
    assert_eq!(later.status, JobStatus::Scheduled);

    assert!(adapter.pop_job_from_queue().await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let popped = adapter.pop_job_from_queue().await.unwrap().unwrap();
    assert_eq!(popped.id, later.id);
    assert!(adapter.pop_job_from_queue().await.unwrap().is_none());
}

/// A due time with a sub-millisecond part is never popped early
pub async fn sub_millisecond_due_time_is_not_popped_early<A>(adapter: &A)
where
    A: StorageAdapter + ?Sized,
{
    for _ in 0..50 {
        let floor = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        let at = floor + chrono::Duration::microseconds(999);
        let job = enqueue(adapter, "edge", Some(at)).await;
        assert!(job.run_at.unwrap() >= at);

        if let Some(popped) = adapter.pop_job_from_queue().await.unwrap() {
            assert_eq!(popped.id, job.id);
            assert!(Utc::now() >= at, "popped before its due time");
        }
    }

    tokio::time::sleep(Duration::from_millis(5)).await;
    pop_all(adapter).await;
}

/// A prepended job is the next pending job popped
pub async fn prepended_job_pops_first<A>(adapter: &A)
where
    A: StorageAdapter + ?Sized,
{
    let a = enqueue(adapter, "a", None).await;
    let b = enqueue(adapter, "b", None).await;
    let c = enqueue(adapter, "c", None).await;

    adapter.remove_job_from_queue(&c).await.unwrap();
    adapter.prepend_job_to_queue(c.id).await.unwrap();

    assert_eq!(pop_all(adapter).await, vec![c.id, a.id, b.id]);
}

/// A due scheduled job still beats a prepended pending job
pub async fn due_scheduled_job_beats_prepended_job<A>(adapter: &A)
where
    A: StorageAdapter + ?Sized,
{
    let pending = enqueue(adapter, "pending", None).await;
    let due = enqueue(adapter, "due", Some(in_ms(-10))).await;
    adapter.prepend_job_to_queue(pending.id).await.unwrap();

    assert_eq!(pop_all(adapter).await, vec![due.id, pending.id]);
}

/// Scheduled jobs sharing a due time are all delivered
pub async fn colliding_due_times_are_all_delivered<A>(adapter: &A)
where
    A: StorageAdapter + ?Sized,
{
    let at = in_ms(-5);
    let first = enqueue(adapter, "first", Some(at)).await;
    let second = enqueue(adapter, "second", Some(at)).await;

    let mut popped = pop_all(adapter).await;
    popped.sort();
    assert_eq!(popped, vec![first.id, second.id]);
}

/// Removing a job from the queue works for both queues
pub async fn removed_jobs_are_not_popped<A>(adapter: &A)
where
    A: StorageAdapter + ?Sized,
{
    let pending = enqueue(adapter, "pending", None).await;
    let scheduled = enqueue(adapter, "scheduled", Some(in_ms(-10))).await;
    let kept = enqueue(adapter, "kept", None).await;

    adapter.remove_job_from_queue(&pending).await.unwrap();
    adapter.remove_job_from_queue(&scheduled).await.unwrap();

    assert_eq!(pop_all(adapter).await, vec![kept.id]);
}

/// Records round-trip through the store and filters apply
pub async fn records_update_and_filter<A>(adapter: &A)
where
    A: StorageAdapter + ?Sized,
{
    let a = enqueue(adapter, "a", None).await;
    let b = enqueue(adapter, "b", None).await;
    enqueue(adapter, "c", Some(in_ms(60_000))).await;

    let updated = adapter
        .update_job(a.id, JobPatch::new().status(JobStatus::Completed).finished_at(Some(dog_jobs::types::now())))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, JobStatus::Completed);
    assert_eq!(adapter.get_job(a.id).await.unwrap().unwrap(), updated);

    let pending = adapter
        .get_jobs(JobFilter::new().status(JobStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.iter().map(|job| job.id).collect::<Vec<_>>(), vec![b.id]);

    let page = adapter.get_jobs(JobFilter::new().offset(1).limit(1)).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, b.id);

    adapter.remove_job(b.id).await.unwrap();
    assert!(adapter.get_job(b.id).await.unwrap().is_none());
    assert!(adapter
        .update_job(b.id, JobPatch::new().status(JobStatus::Active))
        .await
        .unwrap()
        .is_none());
}

/// Worker records are created Idle and filter by status and cluster
pub async fn workers_update_and_filter<A>(adapter: &A)
where
    A: StorageAdapter + ?Sized,
{
    let eu = adapter
        .create_worker(NewWorker::new(Some("eu-1".into())))
        .await
        .unwrap();
    let us = adapter
        .create_worker(NewWorker::new(Some("us-1".into())))
        .await
        .unwrap();
    assert_eq!(eu.status, WorkerStatus::Idle);
    assert!(us.id > eu.id);

    adapter
        .update_worker(us.id, WorkerPatch::new().status(WorkerStatus::Busy))
        .await
        .unwrap();

    let busy = adapter
        .get_workers(WorkerFilter::new().status(WorkerStatus::Busy))
        .await
        .unwrap();
    assert_eq!(busy.len(), 1);
    assert_eq!(busy[0].id, us.id);

    let eu_workers = adapter
        .get_workers(WorkerFilter::new().cluster_name("eu-1"))
        .await
        .unwrap();
    assert_eq!(eu_workers.len(), 1);
    assert_eq!(eu_workers[0].id, eu.id);

    adapter.remove_worker(eu.id).await.unwrap();
    assert!(adapter.get_worker(eu.id).await.unwrap().is_none());
}

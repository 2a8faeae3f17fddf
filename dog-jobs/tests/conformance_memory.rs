#![cfg(feature = "memory")]

mod common;

use proptest::prelude::*;
use serde_json::json;

use dog_jobs::{backend::memory::MemoryBackend, NewJob, StorageAdapter};

/// A1. Pending jobs pop in FIFO order
#[tokio::test]
async fn test_pending_jobs_pop_in_fifo_order() {
    common::pending_jobs_pop_in_fifo_order(&MemoryBackend::new()).await;
}

/// A2. Scheduled jobs are never popped before they are due
#[tokio::test]
async fn test_scheduled_job_waits_until_due() {
    common::scheduled_job_waits_until_due(&MemoryBackend::new()).await;
}

/// A2b. A sub-millisecond due time is rounded up, never down
#[tokio::test]
async fn test_sub_millisecond_due_time_is_not_popped_early() {
    common::sub_millisecond_due_time_is_not_popped_early(&MemoryBackend::new()).await;
}

/// A3. Prepend puts a job ahead of every other pending job
#[tokio::test]
async fn test_prepended_job_pops_first() {
    common::prepended_job_pops_first(&MemoryBackend::new()).await;
}

/// A4. A due scheduled job is popped before a prepended one
#[tokio::test]
async fn test_due_scheduled_job_beats_prepended_job() {
    common::due_scheduled_job_beats_prepended_job(&MemoryBackend::new()).await;
}

/// A5. Scheduled jobs with identical due times are both delivered
#[tokio::test]
async fn test_colliding_due_times_are_all_delivered() {
    common::colliding_due_times_are_all_delivered(&MemoryBackend::new()).await;
}

/// A6. Jobs removed from the queue are not popped
#[tokio::test]
async fn test_removed_jobs_are_not_popped() {
    common::removed_jobs_are_not_popped(&MemoryBackend::new()).await;
}

/// A7. Job records update, filter and paginate
#[tokio::test]
async fn test_records_update_and_filter() {
    common::records_update_and_filter(&MemoryBackend::new()).await;
}

/// A8. Worker records update and filter
#[tokio::test]
async fn test_workers_update_and_filter() {
    common::workers_update_and_filter(&MemoryBackend::new()).await;
}

/// A9. Backends never share state
#[tokio::test]
async fn test_backends_are_isolated() {
    let first = MemoryBackend::new();
    common::enqueue(&first, "a", None).await;

    let second = MemoryBackend::new();
    assert!(second.pop_job_from_queue().await.unwrap().is_none());
    assert_eq!(first.pending_len(), 1);
}

proptest! {
    /// A10. FIFO holds for any number of plain jobs, even with prepends in between
    #[test]
    fn prop_pending_order_is_fifo(count in 1usize..40, boosted in proptest::option::of(0usize..40)) {
        let (expected, popped) = tokio_test::block_on(async {
            let backend = MemoryBackend::new();
            let mut ids = Vec::new();
            for i in 0..count {
                let job = backend
                    .create_job(NewJob::new("job", json!(i), None))
                    .await
                    .unwrap();
                backend.push_job_to_queue(job.id, None).await.unwrap();
                ids.push(job.id);
            }

            if let Some(index) = boosted.filter(|index| *index < count) {
                let job = backend.get_job(ids[index]).await.unwrap().unwrap();
                backend.remove_job_from_queue(&job).await.unwrap();
                backend.prepend_job_to_queue(job.id).await.unwrap();
                let id = ids.remove(index);
                ids.insert(0, id);
            }

            (ids, common::pop_all(&backend).await)
        });

        prop_assert_eq!(expected, popped);
    }
}

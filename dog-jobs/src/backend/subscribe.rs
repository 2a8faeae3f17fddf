use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::{backend::StorageAdapter, Job};

/// Tuning for the job feed loop
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Upper bound of the random delay before each pop
    pub max_jitter: Duration,

    /// Pause after a failed pop while still connected
    pub error_backoff: Duration,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            max_jitter: Duration::from_millis(25),
            error_backoff: Duration::from_millis(500),
        }
    }
}

/// Pull jobs from the adapter until `keep_going` says stop
///
/// Each iteration sleeps a random 1ms..=`max_jitter` before popping. The delay
/// spreads out engine processes polling the same store; it lowers the chance
/// of two of them racing for one job but does not rule it out.
///
/// Only jobs still Pending or Scheduled are handed to `handler`; anything else
/// found in a queue is stale and dropped. Returns when `keep_going` yields
/// false or the adapter reports it is disconnected.
pub async fn subscribe_to_jobs<A, K, KF, H, HF>(
    adapter: &A,
    options: &SubscribeOptions,
    mut keep_going: K,
    mut handler: H,
) where
    A: StorageAdapter + ?Sized,
    K: FnMut() -> KF,
    KF: Future<Output = bool>,
    H: FnMut(Job) -> HF,
    HF: Future<Output = ()>,
{
    while keep_going().await {
        tokio::time::sleep(jitter(options.max_jitter)).await;

        match adapter.pop_job_from_queue().await {
            Ok(Some(job)) if job.status.is_runnable() => handler(job).await,
            Ok(Some(job)) => {
                debug!(job_id = %job.id, status = %job.status, "Dropping stale queue entry");
            }
            Ok(None) => {}
            Err(e) => {
                if !adapter.is_connected() {
                    debug!("Adapter disconnected, leaving job feed");
                    return;
                }
                warn!(error = %e, "Failed to pop job from queue");
                tokio::time::sleep(options.error_backoff).await;
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis().max(1) as u64;
    Duration::from_millis(rand::thread_rng().gen_range(1..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let delay = jitter(Duration::from_millis(5));
            assert!(delay >= Duration::from_millis(1) && delay <= Duration::from_millis(5));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::from_millis(1));
    }
}

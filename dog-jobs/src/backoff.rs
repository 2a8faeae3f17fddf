use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    config::{EngineConfig, RetryDelay, RetryType},
    Job, QueueError, QueueResult,
};

/// Delay before retrying `job`, from its `failed_attempts`
///
/// - `Custom`: whatever the function returns; `None` is a configuration error
/// - `PerAttempt`: entry `failed_attempts - 1`, clamped to the last entry
/// - `Fixed` + `RetryType::Fixed`: the delay itself
/// - `Fixed` + `RetryType::Exponential`: `delay * 2^(failed_attempts - 1)`
pub fn retry_delay(config: &EngineConfig, job: &Job) -> QueueResult<Duration> {
    let attempt = job.failed_attempts.saturating_sub(1);

    match (&config.retry_delay, config.retry_type) {
        (RetryDelay::Custom(delay_for), _) => delay_for(job).ok_or_else(|| {
            QueueError::configuration(format!("custom retry delay returned nothing for job {}", job.id))
        }),
        (RetryDelay::PerAttempt(delays), _) => {
            let index = (attempt as usize).min(delays.len().saturating_sub(1));
            delays
                .get(index)
                .copied()
                .ok_or_else(|| QueueError::configuration("per-attempt retry delays must not be empty"))
        }
        (RetryDelay::Fixed(delay), RetryType::Fixed) => Ok(*delay),
        (RetryDelay::Fixed(delay), RetryType::Exponential) => 2u32
            .checked_pow(attempt)
            .and_then(|factor| delay.checked_mul(factor))
            .ok_or_else(|| {
                QueueError::configuration(format!(
                    "exponential retry delay overflows after {} attempts",
                    job.failed_attempts
                ))
            }),
    }
}

/// Wall-clock time at which the retry of `job` becomes due
pub fn retry_at(config: &EngineConfig, job: &Job, from: DateTime<Utc>) -> QueueResult<DateTime<Utc>> {
    let delay = retry_delay(config, job)?;
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| from.checked_add_signed(delay))
        .ok_or_else(|| QueueError::configuration(format!("retry delay {delay:?} is out of range")))
}

// Retry utilities: exponential backoff and temperature decay

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::method::RetryPolicy;

/// Result of a retried operation
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max_delay_ms`. Attempt 0 has no delay.
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1).min(20));
    let millis = policy.base_delay_ms.saturating_mul(factor).min(policy.max_delay_ms);
    Duration::from_millis(millis)
}

/// Temperature for attempt `attempt` (0-based): `base * decay^attempt`
pub fn decayed_temperature(base: f32, attempt: u32, policy: &RetryPolicy) -> f32 {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    (base * policy.temperature_decay.powi(exponent)).max(0.0)
}

/// Run `operation` up to `1 + policy.max_retries` times. The closure receives
/// the 0-based attempt number and the decayed temperature for that attempt.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    base_temperature: f32,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32, f32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        let temperature = decayed_temperature(base_temperature, attempt, policy);
        match operation(attempt, temperature).await {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt + 1,
                }
            }
            Err(error) => {
                if attempt >= policy.max_retries {
                    return RetryOutcome::Exhausted {
                        last_error: error,
                        attempts: attempt + 1,
                    };
                }
                attempt += 1;
                tracing::debug!(attempt, error = %error, "Retrying after failure");
                sleep(backoff_delay(attempt, policy)).await;
            }
        }
    }
}

//! Shared exponential-backoff-with-jitter retry loop for ForgeClient and LLMClient.
//!
//! Both clients retry transport errors and 5xx/429 responses under the same
//! policy (`RetryConfig`); this module is the single place that walks the
//! attempt/delay sequence so the two clients don't drift.

use rand::Rng;

use crate::config::RetryConfig;

/// Outcome of a completed retry sequence: the last attempt's result, the
/// number of attempts made, and whether that last attempt was still
/// retriable (i.e. the loop stopped because attempts were exhausted, not
/// because the result became terminal). Callers use `exhausted` to decide
/// whether to surface a `RetryExhausted` error instead of the raw one.
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    pub exhausted: bool,
}

/// Runs `attempt` up to `retry.max_retries` times, sleeping with exponential
/// backoff (± jitter) between attempts. `should_retry` inspects the `Ok` value
/// to decide whether a "successful" transport call (e.g. an HTTP 429/5xx
/// response) should still be retried.
pub async fn retry_loop<T, E, F, Fut, R>(
    retry: &RetryConfig,
    mut attempt: F,
    mut should_retry: R,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: FnMut(&Result<T, E>) -> bool,
{
    let mut delay = retry.base_delay;
    let mut last = 1u32;
    loop {
        let result = attempt(last).await;
        let retriable = should_retry(&result);
        if !retriable || last >= retry.max_retries {
            return RetryOutcome {
                result,
                attempts: last,
                exhausted: retriable && last >= retry.max_retries,
            };
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4 + 1);
        tokio::time::sleep(delay + std::time::Duration::from_millis(jitter_ms)).await;
        delay = std::cmp::min(delay.mul_f64(retry.backoff_factor), retry.max_delay);
        last += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 1.0,
        }
    }

    #[tokio::test]
    async fn reports_exhausted_when_every_attempt_stays_retriable() {
        let calls = AtomicU32::new(0);
        let outcome = retry_loop(
            &fast_retry(3),
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), &'static str>("boom") }
            },
            |_res: &Result<(), &'static str>| true,
        )
        .await;

        assert!(outcome.exhausted);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.result, Err("boom"));
    }

    #[tokio::test]
    async fn does_not_report_exhausted_on_terminal_non_retriable_error() {
        let outcome = retry_loop(
            &fast_retry(3),
            |_attempt| async { Err::<(), &'static str>("terminal") },
            |_res: &Result<(), &'static str>| false,
        )
        .await;

        assert!(!outcome.exhausted);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result, Err("terminal"));
    }

    #[tokio::test]
    async fn does_not_report_exhausted_on_eventual_success() {
        let calls = AtomicU32::new(0);
        let outcome = retry_loop(
            &fast_retry(5),
            |_attempt| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err::<u32, &'static str>("retry me")
                    } else {
                        Ok(42)
                    }
                }
            },
            |res: &Result<u32, &'static str>| res.is_err(),
        )
        .await;

        assert!(!outcome.exhausted);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Ok(42));
    }
}

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::app::ports::SleeperPort;
use crate::common::error::InferenceError;

/// Exponential backoff for rate-limited inference calls.
///
/// `max_attempts` counts every call, so the default makes one call and at most
/// two retries, sleeping 15 s and then 30 s.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.backoff_factor.max(1.0).powi(exponent))
    }

    /// Run `op`, retrying only rate-limit errors. A provider supplied
    /// `retry_after` longer than the computed backoff wins.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn SleeperPort, mut op: F) -> Result<T, InferenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InferenceError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(InferenceError::RateLimited { retry_after }) if attempt < max_attempts => {
                    crate::observability::metrics::fallback::rate_limited();
                    let backoff = self.delay_for(attempt);
                    let delay = retry_after.map_or(backoff, |hint| hint.max(backoff));
                    warn!(
                        "Inference rate limited (attempt {}/{}), retrying in {:?}",
                        attempt, max_attempts, delay
                    );
                    crate::observability::metrics::fallback::retry_scheduled();
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_rate_limited() {
                        crate::observability::metrics::fallback::rate_limited();
                    }
                    debug!("Inference call failed after {} attempt(s): {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl SleeperPort for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(15));
        assert_eq!(policy.delay_for(2), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let sleeper = RecordingSleeper::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<String, _> = RetryPolicy::default()
            .run(&sleeper, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(InferenceError::RateLimited { retry_after: None })
                }
            })
            .await;

        assert!(matches!(result, Err(InferenceError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![Duration::from_secs(15), Duration::from_secs(30)]
        );
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);
        let result: Result<String, _> = RetryPolicy::default()
            .run(&sleeper, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InferenceError::Status { status: 500, body: "boom".into() }) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn longer_retry_after_hint_wins() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run(&sleeper, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(InferenceError::RateLimited {
                            retry_after: Some(Duration::from_secs(60)),
                        })
                    } else {
                        Ok("ok".to_string())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(*sleeper.slept.lock().unwrap(), vec![Duration::from_secs(60)]);
    }
}

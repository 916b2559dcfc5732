//! Retry with linear backoff and the politeness delay.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};
use crate::http::TransportError;

/// Retry transient transport failures with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Backoff unit; retry `k` sleeps `k * backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff * retry
    }

    /// Run `attempt` until it succeeds, fails permanently, or the retries
    /// run out. Only [`TransportError::is_transient`] failures are retried.
    pub async fn run<T, F, Fut>(&self, url: &Url, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let mut retries = 0u32;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if retries >= self.max_retries {
                        return Err(Error::RetriesExhausted {
                            url: url.to_string(),
                            retries,
                            source: e,
                        });
                    }
                    retries += 1;
                    let delay = self.delay_for(retries);
                    warn!(
                        "{} for {}, retry {}/{} in {:?}",
                        e, url, retries, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Random pause between requests, uniform over `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Politeness {
    low: Duration,
    high: Duration,
}

impl Politeness {
    pub fn new(low: Duration, high: Duration) -> Self {
        Self { low, high }
    }

    pub fn from_millis((low, high): (u64, u64)) -> Self {
        Self::new(Duration::from_millis(low), Duration::from_millis(high))
    }

    pub fn sample(&self) -> Duration {
        let low = self.low.as_millis() as u64;
        let high = self.high.as_millis() as u64;
        if high <= low {
            return self.low;
        }
        Duration::from_millis(rand::thread_rng().gen_range(low..high))
    }

    pub async fn pause(&self) {
        tokio::time::sleep(self.sample()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn url() -> Url {
        Url::parse("https://unreachable.example/").unwrap()
    }

    #[tokio::test]
    async fn test_retries_exhausted_after_max_retries() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = policy
            .run(&url(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Connection("refused".into()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(Error::RetriesExhausted { retries, .. }) => assert_eq!(retries, 3),
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = policy
            .run(&url(), move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TransportError::Timeout("slow".into()))
                } else {
                    Ok("page")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "page");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = policy
            .run(&url(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::TooManyRedirects(10))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[test]
    fn test_backoff_is_linear_and_non_decreasing() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let delays: Vec<Duration> = (1..=3).map(|k| policy.delay_for(k)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_politeness_sample_in_range() {
        let politeness = Politeness::from_millis((10, 20));
        for _ in 0..100 {
            let d = politeness.sample();
            assert!(d >= Duration::from_millis(10) && d < Duration::from_millis(20));
        }
        assert_eq!(
            Politeness::from_millis((5, 5)).sample(),
            Duration::from_millis(5)
        );
    }
}

//! Fixed-window rate limiter backed by the key/value store.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tracing::debug;

use super::store::{KeyValueStore, StoreError};

const KEY_PREFIX: &str = "rate_limiter:";

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded, retry in {retry_after:?}")]
    Limited { retry_after: Duration },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    window: Duration,
    max_requests: i64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, window: Duration, max_requests: i64) -> Self {
        Self {
            store,
            window,
            max_requests,
        }
    }

    /// Consume one request slot for `key`, or reject with
    /// [`RateLimitError::Limited`]. At most `max_requests` calls succeed per
    /// window even under concurrent callers: the counter is incremented
    /// atomically and re-checked after the increment.
    pub async fn consume(&self, key: &str) -> Result<(), RateLimitError> {
        self.consume_with(key, self.max_requests, self.window).await
    }

    /// Same as [`consume`](Self::consume) with an explicit per-call budget.
    pub async fn consume_with(
        &self,
        key: &str,
        limit: i64,
        window: Duration,
    ) -> Result<(), RateLimitError> {
        let storage_key = format!("{KEY_PREFIX}{key}");

        if let Some(raw) = self.store.get_raw(&storage_key).await? {
            let current: i64 = raw.parse().unwrap_or(0);
            if current >= limit {
                counter!("devhub_rate_limited_total").increment(1);
                debug!(key, current, limit, "rate limit hit");
                return Err(RateLimitError::Limited {
                    retry_after: window,
                });
            }
        }

        let count = self.store.increment(&storage_key).await?;
        if count == 1 {
            self.store.expire(&storage_key, window).await?;
        }
        if count > limit {
            counter!("devhub_rate_limited_total").increment(1);
            debug!(key, count, limit, "rate limit hit after increment");
            return Err(RateLimitError::Limited {
                retry_after: window,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;

    fn limiter(limit: i64, window: Duration) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()), window, limit)
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let limiter = limiter(3, Duration::from_secs(60));
        for _ in 0..3 {
            limiter.consume("user:a").await.unwrap();
        }
        let err = limiter.consume("user:a").await.unwrap_err();
        assert!(matches!(err, RateLimitError::Limited { .. }));
    }

    #[tokio::test]
    async fn keys_are_isolated() {
        let limiter = limiter(1, Duration::from_secs(60));
        limiter.consume("user:a").await.unwrap();
        limiter.consume("user:b").await.unwrap();
        assert!(limiter.consume("user:a").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_the_budget() {
        let limiter = limiter(2, Duration::from_secs(30));
        limiter.consume("user:a").await.unwrap();
        limiter.consume("user:a").await.unwrap();
        assert!(limiter.consume("user:a").await.is_err());

        tokio::time::advance(Duration::from_secs(31)).await;
        limiter.consume("user:a").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_callers_never_exceed_the_limit() {
        let limiter = Arc::new(limiter(5, Duration::from_secs(60)));
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            tasks.push(tokio::spawn(
                async move { limiter.consume("shared").await },
            ));
        }
        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                granted += 1;
            }
        }
        assert!(granted <= 5);
        assert!(granted >= 1);
    }
}

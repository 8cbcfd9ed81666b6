//! Cache-aside accessor.
//!
//! Reads try the store first; on a miss (or an undecodable value) the caller's
//! compute closure runs against the primary store and the result is written
//! back. Store unavailability surfaces to the caller as a store error; it is
//! the caller's call whether to fail the request or bypass the cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};

use super::store::{self, KeyValueStore, StoreError};

pub struct CacheAside {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
}

impl CacheAside {
    pub fn new(store: Arc<dyn KeyValueStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Fetch `key`, computing and caching on a miss.
    ///
    /// `ttl` of `None` uses the accessor default. `skip_write` serves the
    /// cached value if present but leaves the store untouched on a miss,
    /// for values about to be invalidated anyway. A store failure on either
    /// the read or the write-back is an error; the compute closure does not
    /// run against an unreachable store.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        skip_write: bool,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StoreError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = store::get_json::<_, T>(self.store.as_ref(), key).await? {
            counter!("devhub_cache_hit_total").increment(1);
            return Ok(value);
        }
        counter!("devhub_cache_miss_total").increment(1);

        let value = compute().await?;

        if !skip_write {
            let ttl = ttl.unwrap_or(self.default_ttl);
            store::set_json(self.store.as_ref(), key, &value, Some(ttl)).await?;
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::cache::store::{BatchOp, MemoryStore};

    fn accessor() -> CacheAside {
        CacheAside::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600))
    }

    /// Store double where every operation fails, except reads when
    /// `fail_reads` is off (those report a miss).
    struct DownStore {
        fail_reads: bool,
    }

    #[async_trait]
    impl KeyValueStore for DownStore {
        async fn get_raw(&self, _key: &str) -> Result<Option<String>, StoreError> {
            if self.fail_reads {
                Err(StoreError::unavailable("connection refused"))
            } else {
                Ok(None)
            }
        }

        async fn set_raw(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Option<Duration>,
        ) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn delete_many(&self, _keys: &[String]) -> Result<u64, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn increment(&self, _key: &str) -> Result<i64, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn scan_keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn apply_batch(&self, _ops: Vec<BatchOp>) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn publish(&self, _channel: &str, _payload: &str) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn subscribe(
            &self,
            _channel: &str,
        ) -> Result<mpsc::UnboundedReceiver<String>, StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn unsubscribe(&self, _channel: &str) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }

        async fn close(&self) -> Result<(), StoreError> {
            Err(StoreError::unavailable("connection refused"))
        }
    }

    #[tokio::test]
    async fn second_read_skips_compute() {
        let cache = accessor();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: String = cache
                .get_or_compute("profile:x", None, false, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, StoreError>("fresh".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "fresh");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_recomputes() {
        let cache = accessor();
        let calls = AtomicUsize::new(0);
        let read = || async {
            cache
                .get_or_compute::<u32, StoreError, _, _>(
                    "k",
                    Some(Duration::from_secs(60)),
                    false,
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(5)
                    },
                )
                .await
                .unwrap()
        };

        assert_eq!(read().await, 5);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(read().await, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn skip_write_leaves_store_empty() {
        let cache = accessor();
        let value: u32 = cache
            .get_or_compute("once", None, true, || async { Ok::<_, StoreError>(1) })
            .await
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(cache.store().get_raw("once").await.unwrap(), None);
    }

    #[tokio::test]
    async fn compute_error_is_propagated_and_not_cached() {
        let cache = accessor();
        let result = cache
            .get_or_compute::<u32, StoreError, _, _>("err", None, false, || async {
                Err(StoreError::unavailable("primary down"))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(cache.store().get_raw("err").await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_outage_fails_the_lookup_without_computing() {
        let cache = CacheAside::new(
            Arc::new(DownStore { fail_reads: true }),
            Duration::from_secs(3600),
        );
        let calls = AtomicUsize::new(0);

        let result = cache
            .get_or_compute::<u32, StoreError, _, _>("profile:42", None, false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn write_back_outage_fails_the_lookup() {
        let cache = CacheAside::new(
            Arc::new(DownStore { fail_reads: false }),
            Duration::from_secs(3600),
        );

        let result = cache
            .get_or_compute::<u32, StoreError, _, _>("profile:42", None, false, || async {
                Ok(7)
            })
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        // skip_write never touches the store, so the computed value survives.
        let value = cache
            .get_or_compute::<u32, StoreError, _, _>("profile:42", None, true, || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}

//! Key/value store abstraction shared by the cache, rate limiter and
//! notification gateway.
//!
//! Two backends implement it: [`MemoryStore`] here (the default, used by the
//! test suites and single-node deployments) and
//! [`RedisStore`](super::redis::RedisStore) for multi-instance setups. The
//! trait surface is deliberately string-shaped; typed access goes through
//! [`get_json`] and [`set_json`].

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// One step of an atomic write batch. Backends apply the whole batch or none
/// of it (a Redis MULTI/EXEC pipeline, a single lock hold in memory).
#[derive(Debug, Clone)]
pub enum BatchOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value; `ttl` of `None` means no expiry.
    async fn set_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns how many of the keys existed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Atomically increment an integer counter, creating it at 1.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Set the expiry of an existing key. Returns false if the key is gone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// List keys matching a glob pattern (`*` wildcards only).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;

    /// Subscribe to a channel. Messages arrive on the returned receiver until
    /// [`unsubscribe`](Self::unsubscribe) is called or the store closes.
    async fn subscribe(&self, channel: &str)
    -> Result<mpsc::UnboundedReceiver<String>, StoreError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}

/// Typed read. A value that fails to decode is treated as a miss so a schema
/// change never wedges a key until its TTL runs out.
pub async fn get_json<S, T>(store: &S, key: &str) -> Result<Option<T>, StoreError>
where
    S: KeyValueStore + ?Sized,
    T: DeserializeOwned,
{
    let Some(raw) = store.get_raw(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(
                key,
                error = %err,
                "cached value failed to decode; treating as miss"
            );
            Ok(None)
        }
    }
}

pub async fn set_json<S, T>(
    store: &S,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError>
where
    S: KeyValueStore + ?Sized,
    T: Serialize,
{
    let raw = serde_json::to_string(value)?;
    store.set_raw(key, &raw, ttl).await
}

/// Glob match supporting `*` only, which is all the key patterns here use.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let mut segments = pattern.split('*');
    let Some(first) = segments.next() else {
        return pattern == candidate;
    };
    if !candidate.starts_with(first) {
        return false;
    }
    let mut rest = &candidate[first.len()..];
    let mut last_segment: Option<&str> = None;
    for segment in segments {
        last_segment = Some(segment);
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(pos) => rest = &rest[pos + segment.len()..],
            None => return false,
        }
    }
    match last_segment {
        // No `*` at all: the prefix check above must have consumed everything.
        None => rest.is_empty(),
        Some(last) if !last.is_empty() => candidate.ends_with(last),
        Some(_) => true,
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process backend. Expiry is lazy: reads drop entries whose deadline has
/// passed rather than running a sweeper.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
    channels: DashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn apply_one(&self, op: BatchOp) {
        match op {
            BatchOp::Set { key, value, ttl } => {
                let expires_at = ttl.map(|ttl| Instant::now() + ttl);
                self.entries.insert(key, StoredEntry { value, expires_at });
            }
            BatchOp::Delete { key } => {
                self.entries.remove(&key);
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_value(key))
    }

    async fn set_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.apply_one(BatchOp::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let existed = self.live_value(key).is_some();
        self.entries.remove(key);
        Ok(existed)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(StoredEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        if entry.is_expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }
        let current: i64 = entry.value.parse().unwrap_or(0);
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        for op in ops {
            self.apply_one(op);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        if let Some(mut senders) = self.channels.get_mut(channel) {
            senders.retain(|tx| tx.send(payload.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.entry(channel.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), StoreError> {
        self.channels.remove(channel);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.channels.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_prefix_patterns() {
        assert!(glob_match("post_comments:42:*", "post_comments:42:1:10:newest:anonymous"));
        assert!(!glob_match("post_comments:42:*", "post_comments:43:1:10:newest:anonymous"));
        assert!(glob_match("tags:*", "tags:all"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact:more"));
        assert!(glob_match("a*c", "abc"));
        assert!(!glob_match("a*c", "abd"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set_raw("k", "v", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(store.get_raw("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get_raw("k").await.unwrap(), None);
        assert!(store.scan_keys("k").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn increment_restarts_after_expiry() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("c").await.unwrap(), 1);
        store.expire("c", Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.increment("c").await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.increment("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn publish_reaches_live_subscribers_only() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("notifications").await.unwrap();
        store.publish("notifications", "hello").await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));

        store.unsubscribe("notifications").await.unwrap();
        store.publish("notifications", "after").await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn decode_failure_reads_as_miss() {
        let store = MemoryStore::new();
        store.set_raw("bad", "{not json", None).await.unwrap();
        let value: Option<u32> = get_json(&store, "bad").await.unwrap();
        assert_eq!(value, None);
    }
}

//! Redis backend for [`KeyValueStore`], for multi-instance deployments.
//!
//! Commands go through a shared [`ConnectionManager`]; each pub/sub channel
//! gets a dedicated connection on its own task, reconnecting with exponential
//! backoff when the link drops.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::util::lock::mutex_lock;

use super::store::{BatchOp, KeyValueStore, StoreError};

const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(300);

pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::unavailable)?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(StoreError::unavailable)?;
        info!(url, "connected to redis");
        Ok(Self {
            client,
            manager,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await.map_err(StoreError::unavailable)?;
        Ok(value)
    }

    async fn set_raw(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_secs().max(1))
                    .await
                    .map_err(StoreError::unavailable)?;
            }
            None => {
                let _: () = conn.set(key, value).await.map_err(StoreError::unavailable)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let removed: i64 = conn.del(key).await.map_err(StoreError::unavailable)?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let removed: i64 = conn.del(keys).await.map_err(StoreError::unavailable)?;
        Ok(removed.max(0) as u64)
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn();
        let count: i64 = conn.incr(key, 1).await.map_err(StoreError::unavailable)?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let applied: bool = conn
            .expire(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(applied)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(keys)
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                BatchOp::Set {
                    key,
                    value,
                    ttl: Some(ttl),
                } => {
                    pipe.cmd("SET")
                        .arg(&key)
                        .arg(&value)
                        .arg("EX")
                        .arg(ttl.as_secs().max(1))
                        .ignore();
                }
                BatchOp::Set {
                    key,
                    value,
                    ttl: None,
                } => {
                    pipe.cmd("SET").arg(&key).arg(&value).ignore();
                }
                BatchOp::Delete { key } => {
                    pipe.cmd("DEL").arg(&key).ignore();
                }
            }
        }
        let mut conn = self.conn();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: () = conn
            .publish(channel, payload)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let channel_name = channel.to_string();
        let handle = tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            loop {
                match forward_messages(&client, &channel_name, &tx).await {
                    // Receiver dropped; nothing left to deliver to.
                    Ok(()) => break,
                    Err(err) => {
                        if tx.is_closed() {
                            break;
                        }
                        error!(
                            channel = %channel_name,
                            error = %err,
                            backoff_secs = backoff.as_secs(),
                            "pub/sub connection lost, reconnecting"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
                    }
                }
            }
        });

        let mut subs = mutex_lock(&self.subscriptions, "cache::redis", "subscribe");
        if let Some(previous) = subs.insert(channel.to_string(), handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), StoreError> {
        let handle = {
            let mut subs = mutex_lock(&self.subscriptions, "cache::redis", "unsubscribe");
            subs.remove(channel)
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let handles: Vec<_> = {
            let mut subs = mutex_lock(&self.subscriptions, "cache::redis", "close");
            subs.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.abort();
        }
        Ok(())
    }
}

async fn forward_messages(
    client: &redis::Client,
    channel: &str,
    tx: &mpsc::UnboundedSender<String>,
) -> Result<(), redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    info!(channel, "subscribed to redis channel");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(channel, error = %err, "failed to decode pub/sub payload");
                continue;
            }
        };
        if tx.send(payload).is_err() {
            return Ok(());
        }
    }

    Err(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "pub/sub connection closed",
    )))
}

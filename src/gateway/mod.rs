//! Real-time notification fan-out.
//!
//! The gateway persists each notification, publishes it on the store's
//! pub/sub channel, and every instance's consumer task relays channel
//! messages to the websocket connections registered in its local rooms.
//! Persist happens before publish, so a notification a client sees over the
//! socket is always readable through the REST listing too.

pub mod dedup;
pub mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::repos::{NotificationsRepo, RepoError};
use crate::cache::keys::NOTIFICATIONS_CHANNEL;
use crate::cache::store::{KeyValueStore, StoreError};
use crate::util::lock::mutex_lock;

pub use dedup::DedupWindow;
pub use registry::ConnectionRegistry;

use crate::domain::notifications::{NewNotification, NotificationRecord};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("envelope encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Wire format published on the notifications channel. The flattened record
/// is what clients receive verbatim; `_publishTime` lets consumers measure
/// cross-instance fan-out latency.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelEnvelope {
    #[serde(flatten)]
    pub notification: NotificationRecord,
    #[serde(rename = "_publishTime")]
    pub publish_time: i64,
}

pub struct NotificationGateway {
    store: Arc<dyn KeyValueStore>,
    notifications: Arc<dyn NotificationsRepo>,
    registry: ConnectionRegistry,
    dedup: DedupWindow,
    subscribed: AtomicBool,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationGateway {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        notifications: Arc<dyn NotificationsRepo>,
        dedup_window: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            notifications,
            registry: ConnectionRegistry::new(),
            dedup: DedupWindow::new(dedup_window),
            subscribed: AtomicBool::new(false),
            consumer: Mutex::new(None),
        })
    }

    /// Subscribe to the notifications channel and start the consumer task.
    /// Idempotent; a second call is a no-op while the first subscription is
    /// live. Unsubscribes first so a stale subscription from an earlier
    /// incarnation cannot double-deliver.
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(err) = self.store.unsubscribe(NOTIFICATIONS_CHANNEL).await {
            warn!(error = %err, "pre-subscribe cleanup failed");
        }
        let mut rx = match self.store.subscribe(NOTIFICATIONS_CHANNEL).await {
            Ok(rx) => rx,
            Err(err) => {
                self.subscribed.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };

        let gateway = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                gateway.handle_channel_message(&raw);
            }
        });
        let mut consumer = mutex_lock(&self.consumer, "gateway", "start");
        *consumer = Some(handle);
        info!(channel = NOTIFICATIONS_CHANNEL, "notification gateway started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        let handle = {
            let mut consumer = mutex_lock(&self.consumer, "gateway", "shutdown");
            consumer.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        if let Err(err) = self.store.unsubscribe(NOTIFICATIONS_CHANNEL).await {
            warn!(error = %err, "unsubscribe on shutdown failed");
        }
        self.subscribed.store(false, Ordering::SeqCst);
    }

    /// Persist a notification, then publish it for fan-out. Returns the
    /// stored record.
    pub async fn deliver(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, GatewayError> {
        let record = self.notifications.create_notification(notification).await?;
        let envelope = ChannelEnvelope {
            notification: record.clone(),
            publish_time: epoch_millis(OffsetDateTime::now_utc()),
        };
        let raw = serde_json::to_string(&envelope)?;
        self.store.publish(NOTIFICATIONS_CHANNEL, &raw).await?;
        Ok(record)
    }

    fn handle_channel_message(&self, raw: &str) {
        let envelope: ChannelEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "discarding undecodable channel message");
                return;
            }
        };

        let user_id = envelope.notification.user_id;
        if !self.dedup.observe(user_id) {
            counter!("devhub_gateway_dedup_dropped_total").increment(1);
            debug!(%user_id, "suppressed duplicate delivery inside dedup window");
            return;
        }

        let delivered = self.registry.broadcast(user_id, raw);
        counter!("devhub_gateway_broadcast_total").increment(delivered as u64);
        debug!(%user_id, delivered, "broadcast notification to room");
    }

    pub fn register_client(
        &self,
        user_id: Uuid,
        client_id: Uuid,
        sender: tokio::sync::mpsc::UnboundedSender<String>,
    ) {
        self.registry.register(user_id, client_id, sender);
    }

    pub fn unregister_client(&self, user_id: Uuid, client_id: Uuid) {
        self.registry.unregister(user_id, client_id);
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

fn epoch_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

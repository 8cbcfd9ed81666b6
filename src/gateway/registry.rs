//! Connection registry: which websocket clients belong to which user room.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::util::lock::mutex_lock;

struct ClientConnection {
    id: Uuid,
    sender: mpsc::UnboundedSender<String>,
}

/// One room per user id; a user may hold several simultaneous connections
/// (tabs, devices). Broadcasts prune connections whose receiver is gone.
#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: Mutex<HashMap<Uuid, Vec<ClientConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: Uuid, client_id: Uuid, sender: mpsc::UnboundedSender<String>) {
        let mut rooms = mutex_lock(&self.rooms, "gateway::registry", "register");
        rooms
            .entry(user_id)
            .or_default()
            .push(ClientConnection {
                id: client_id,
                sender,
            });
    }

    pub fn unregister(&self, user_id: Uuid, client_id: Uuid) {
        let mut rooms = mutex_lock(&self.rooms, "gateway::registry", "unregister");
        if let Some(clients) = rooms.get_mut(&user_id) {
            clients.retain(|client| client.id != client_id);
            if clients.is_empty() {
                rooms.remove(&user_id);
            }
        }
    }

    /// Send `payload` to every live connection in the user's room, returning
    /// how many received it.
    pub fn broadcast(&self, user_id: Uuid, payload: &str) -> usize {
        let mut rooms = mutex_lock(&self.rooms, "gateway::registry", "broadcast");
        let Some(clients) = rooms.get_mut(&user_id) else {
            return 0;
        };
        clients.retain(|client| client.sender.send(payload.to_string()).is_ok());
        let delivered = clients.len();
        if clients.is_empty() {
            rooms.remove(&user_id);
        }
        delivered
    }

    pub fn client_count(&self, user_id: Uuid) -> usize {
        let rooms = mutex_lock(&self.rooms, "gateway::registry", "client_count");
        rooms.get(&user_id).map(|clients| clients.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_connection_of_the_user() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_other, mut rx_other) = mpsc::unbounded_channel();
        registry.register(user, Uuid::new_v4(), tx_a);
        registry.register(user, Uuid::new_v4(), tx_b);
        registry.register(other, Uuid::new_v4(), tx_other);

        assert_eq!(registry.broadcast(user, "hello"), 2);
        assert_eq!(rx_a.try_recv().unwrap(), "hello");
        assert_eq!(rx_b.try_recv().unwrap(), "hello");
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_connections_are_pruned_on_broadcast() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (tx_live, _rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        drop(rx_dead);
        registry.register(user, Uuid::new_v4(), tx_live);
        registry.register(user, Uuid::new_v4(), tx_dead);

        assert_eq!(registry.broadcast(user, "ping"), 1);
        assert_eq!(registry.client_count(user), 1);
    }

    #[tokio::test]
    async fn unregister_clears_empty_rooms() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let client = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.register(user, client, tx);
        registry.unregister(user, client);
        assert_eq!(registry.client_count(user), 0);
        assert_eq!(registry.broadcast(user, "gone"), 0);
    }
}

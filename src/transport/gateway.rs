//! Connection gateway: the concrete fan-out adapter
//!
//! Delivery is fire-and-forget over unbounded per-connection channels; a
//! slow or disconnected receiver never stalls processing for other room
//! members. The rest of the engine only sees the `Fanout` trait.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::protocol::messages::{ServerEvent, UserId};

/// Opaque per-connection identifier
pub type ConnectionId = String;

/// Delivery interface the chat core depends on
#[async_trait]
pub trait Fanout: Send + Sync {
    /// Deliver to one connection
    async fn send_to_connection(&self, conn_id: &str, event: ServerEvent);

    /// Deliver to every live connection of a user
    async fn send_to_user(&self, user_id: &str, event: ServerEvent);
}

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<ServerEvent>,
    user_id: Option<UserId>,
}

/// In-process gateway over mpsc event channels
pub struct ConnectionGateway {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    user_connections: RwLock<HashMap<UserId, HashSet<ConnectionId>>>,
}

impl ConnectionGateway {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            user_connections: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a connection's outbound event channel
    pub async fn register(&self, conn_id: &str, tx: mpsc::UnboundedSender<ServerEvent>) {
        let mut conns = self.connections.write().await;
        conns.insert(conn_id.to_string(), ConnectionEntry { tx, user_id: None });
    }

    /// Bind a registered identity to a connection
    ///
    /// Re-registering under a different identity moves the binding.
    pub async fn bind_user(&self, conn_id: &str, user_id: &str) {
        let previous = {
            let mut conns = self.connections.write().await;
            match conns.get_mut(conn_id) {
                Some(entry) => entry.user_id.replace(user_id.to_string()),
                None => return,
            }
        };

        let mut user_conns = self.user_connections.write().await;
        if let Some(previous) = previous {
            if previous != user_id {
                if let Some(ids) = user_conns.get_mut(&previous) {
                    ids.remove(conn_id);
                    if ids.is_empty() {
                        user_conns.remove(&previous);
                    }
                }
            }
        }
        user_conns
            .entry(user_id.to_string())
            .or_insert_with(HashSet::new)
            .insert(conn_id.to_string());
    }

    /// Detach a connection and drop its user binding
    pub async fn remove(&self, conn_id: &str) {
        let entry = {
            let mut conns = self.connections.write().await;
            conns.remove(conn_id)
        };

        if let Some(ConnectionEntry {
            user_id: Some(user_id),
            ..
        }) = entry
        {
            let mut user_conns = self.user_connections.write().await;
            if let Some(ids) = user_conns.get_mut(&user_id) {
                ids.remove(conn_id);
                if ids.is_empty() {
                    user_conns.remove(&user_id);
                }
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn connections_for_user(&self, user_id: &str) -> Vec<ConnectionId> {
        let user_conns = self.user_connections.read().await;
        user_conns
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for ConnectionGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fanout for ConnectionGateway {
    async fn send_to_connection(&self, conn_id: &str, event: ServerEvent) {
        let conns = self.connections.read().await;
        if let Some(entry) = conns.get(conn_id) {
            if entry.tx.send(event).is_err() {
                debug!("Dropped event for closed connection {}", conn_id);
            }
        }
    }

    async fn send_to_user(&self, user_id: &str, event: ServerEvent) {
        let conn_ids = {
            let user_conns = self.user_connections.read().await;
            match user_conns.get(user_id) {
                Some(ids) => ids.iter().cloned().collect::<Vec<_>>(),
                None => return,
            }
        };

        let conns = self.connections.read().await;
        for conn_id in conn_ids {
            if let Some(entry) = conns.get(&conn_id) {
                let _ = entry.tx.send(event.clone());
            }
        }
    }
}

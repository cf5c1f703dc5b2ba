/// Presence tracking: which identities are reachable right now, and through
/// which live connections.
///
/// Only identities with at least one open connection have an entry, so the
/// map stays bounded by the online population.
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound half of one live connection. Frames pushed here are written to
/// the socket by the connection's actor.
pub type ConnectionSender = UnboundedSender<String>;

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, HashMap<ConnectionId, ConnectionSender>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection handle for an identity
    pub async fn register(&self, identity: &str, connection_id: ConnectionId, tx: ConnectionSender) {
        let mut connections = self.connections.write().await;
        connections
            .entry(identity.to_string())
            .or_default()
            .insert(connection_id, tx);
        log::debug!("Registered connection {} for {}", connection_id, identity);
    }

    /// Remove a connection handle. Returns false if it was not registered.
    pub async fn unregister(&self, identity: &str, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let Some(handles) = connections.get_mut(identity) else {
            return false;
        };

        let removed = handles.remove(&connection_id).is_some();
        if handles.is_empty() {
            connections.remove(identity);
        }
        removed
    }

    /// Deliver `payload` once to every live connection of `identity`.
    ///
    /// Returns how many connections accepted the frame. Connections that
    /// closed since they were enumerated are skipped.
    pub async fn fanout<T: Serialize>(&self, identity: &str, event: &str, payload: &T) -> usize {
        let connections = self.connections.read().await;
        let Some(handles) = connections.get(identity) else {
            return 0;
        };

        let frame = json!({ "event": event, "data": payload }).to_string();
        handles
            .values()
            .filter(|tx| tx.send(frame.clone()).is_ok())
            .count()
    }

    pub async fn is_online(&self, identity: &str) -> bool {
        self.connections.read().await.contains_key(identity)
    }

    pub async fn connection_count(&self, identity: &str) -> usize {
        self.connections
            .read()
            .await
            .get(identity)
            .map_or(0, HashMap::len)
    }

    pub async fn online_identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.connections.read().await.keys().cloned().collect();
        identities.sort();
        identities
    }
}

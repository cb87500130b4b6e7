//! Live set of open client connections.
//!
//! The registry is the only state shared across connection tasks. Broadcasts
//! never iterate it directly: they take a [`Registry::snapshot`] so joins and
//! leaves during a fan-out cannot disturb the iteration.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::connection::{Connection, ConnectionId};

#[derive(Default)]
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the connection, replacing any handle already stored under its id.
    pub async fn add(&self, connection: Arc<Connection>) {
        let mut connections = self.connections.write().await;
        connections.insert(connection.id(), connection);
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        connections.remove(&id)
    }

    /// Point-in-time copy of the members, in no particular order.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.values().cloned().collect()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

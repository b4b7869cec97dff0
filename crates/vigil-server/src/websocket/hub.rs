//! Live connection table and the WebSocket [`Transport`].

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tracing::{debug, warn};
use vigil_core::ConnectionId;
use vigil_stream::{Delivery, Transport};

use super::connection::ClientConnection;
use crate::metrics::WS_EVICTIONS_TOTAL;

/// Connected clients, indexed by id.
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    max_dropped: u64,
}

impl ConnectionHub {
    /// Hub evicting a client once it has dropped `max_dropped` frames.
    /// Zero disables eviction.
    pub fn new(max_dropped: u64) -> Self {
        Self {
            connections: DashMap::new(),
            max_dropped,
        }
    }

    /// Add a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        if self
            .connections
            .insert(connection.id.clone(), connection)
            .is_some()
        {
            warn!("connection id reused, previous entry replaced");
        }
    }

    /// Remove a connection.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.remove(id).map(|(_, conn)| conn)
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Connected clients.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Transport for ConnectionHub {
    fn send_to_connection(&self, conn: &ConnectionId, frame: Arc<str>) -> Delivery {
        let Some(connection) = self.get(conn) else {
            return Delivery::Closed;
        };
        let delivery = connection.send(frame);
        if delivery == Delivery::Dropped {
            let drops = connection.drop_count();
            if self.max_dropped > 0 && drops >= self.max_dropped && !connection.is_evicted() {
                warn!(%conn, drops, "evicting slow client");
                counter!(WS_EVICTIONS_TOTAL).increment(1);
                connection.evict();
            } else {
                debug!(%conn, drops, "send queue full, frame dropped");
            }
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn add(hub: &ConnectionHub, id: &str, capacity: usize) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(ClientConnection::new(ConnectionId::from(id), tx));
        hub.add(Arc::clone(&conn));
        (conn, rx)
    }

    #[tokio::test]
    async fn room_send_reaches_members() {
        let hub = ConnectionHub::new(10);
        let (_a, mut rx_a) = add(&hub, "a", 4);
        let (_b, mut rx_b) = add(&hub, "b", 4);
        let frame: Arc<str> = Arc::from("{}");
        let report = hub.send_to_room(&[ConnectionId::from("a"), ConnectionId::from("b")], &frame);
        assert_eq!(report.delivered.len(), 2);
        assert_eq!(&*rx_a.recv().await.unwrap(), "{}");
        assert_eq!(&*rx_b.recv().await.unwrap(), "{}");
    }

    #[test]
    fn unknown_connection_is_closed() {
        let hub = ConnectionHub::new(10);
        assert_eq!(
            hub.send_to_connection(&ConnectionId::from("ghost"), Arc::from("x")),
            Delivery::Closed
        );
    }

    #[test]
    fn slow_client_is_evicted_after_threshold() {
        let hub = ConnectionHub::new(3);
        let (conn, _rx) = add(&hub, "slow", 1);
        let id = ConnectionId::from("slow");
        assert_eq!(hub.send_to_connection(&id, Arc::from("1")), Delivery::Sent);
        for _ in 0..2 {
            assert_eq!(hub.send_to_connection(&id, Arc::from("x")), Delivery::Dropped);
            assert!(!conn.is_evicted());
        }
        assert_eq!(hub.send_to_connection(&id, Arc::from("x")), Delivery::Dropped);
        assert!(conn.is_evicted());
    }

    #[test]
    fn zero_threshold_never_evicts() {
        let hub = ConnectionHub::new(0);
        let (conn, _rx) = add(&hub, "slow", 1);
        let id = ConnectionId::from("slow");
        for _ in 0..10 {
            let _ = hub.send_to_connection(&id, Arc::from("x"));
        }
        assert!(!conn.is_evicted());
    }

    #[test]
    fn add_remove_count() {
        let hub = ConnectionHub::new(1);
        let (_c, _rx) = add(&hub, "c", 1);
        assert_eq!(hub.connection_count(), 1);
        assert!(hub.remove(&ConnectionId::from("c")).is_some());
        assert!(hub.remove(&ConnectionId::from("c")).is_none());
        assert_eq!(hub.connection_count(), 0);
    }
}

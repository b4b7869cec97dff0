//! The outbound transport collaborator.
//!
//! Room membership lives in the subscription registry; the transport only
//! needs to push an already-encoded frame to one connection. Sends never
//! block: a transport that cannot accept a frame right now reports
//! [`Delivery::Dropped`].

use std::sync::Arc;

use vigil_core::ConnectionId;

/// Result of handing one frame to one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the connection.
    Sent,
    /// The connection's queue is full; this frame was discarded.
    Dropped,
    /// The connection is gone.
    Closed,
}

/// Outcome of a fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections that accepted the frame.
    pub delivered: Vec<ConnectionId>,
    /// Frames discarded by full queues.
    pub dropped: usize,
    /// Recipients that were already closed.
    pub closed: usize,
}

/// Pushes frames to connected observers.
pub trait Transport: Send + Sync {
    /// Hand `frame` to one connection.
    fn send_to_connection(&self, conn: &ConnectionId, frame: Arc<str>) -> Delivery;

    /// Hand `frame` to every connection in `recipients`.
    fn send_to_room(&self, recipients: &[ConnectionId], frame: &Arc<str>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for conn in recipients {
            match self.send_to_connection(conn, Arc::clone(frame)) {
                Delivery::Sent => report.delivered.push(conn.clone()),
                Delivery::Dropped => report.dropped += 1,
                Delivery::Closed => report.closed += 1,
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Picky;

    impl Transport for Picky {
        fn send_to_connection(&self, conn: &ConnectionId, _frame: Arc<str>) -> Delivery {
            match conn.as_str() {
                "full" => Delivery::Dropped,
                "gone" => Delivery::Closed,
                _ => Delivery::Sent,
            }
        }
    }

    #[test]
    fn room_fan_out_tallies_outcomes() {
        let recipients: Vec<ConnectionId> = ["a", "full", "gone", "b"].map(ConnectionId::from).into();
        let report = Picky.send_to_room(&recipients, &Arc::from("{}"));
        assert_eq!(report.delivered, vec![ConnectionId::from("a"), ConnectionId::from("b")]);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.closed, 1);
    }
}

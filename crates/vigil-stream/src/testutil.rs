//! In-memory transport for engine tests.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use vigil_core::ConnectionId;

use crate::transport::{Delivery, Transport};

/// Records every frame instead of sending it.
#[derive(Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<(ConnectionId, Arc<str>)>>,
    full: Mutex<HashSet<ConnectionId>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `conn` report a full queue from now on.
    pub fn saturate(&self, conn: &ConnectionId) {
        let _ = self.full.lock().insert(conn.clone());
    }

    /// Parsed frames sent to `conn`, in send order.
    pub fn frames_for(&self, conn: &ConnectionId) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter(|(to, _)| to == conn)
            .map(|(_, frame)| serde_json::from_str(frame).unwrap())
            .collect()
    }

    /// Frames of type `kind` sent to `conn`.
    pub fn frames_of(&self, conn: &ConnectionId, kind: &str) -> Vec<Value> {
        self.frames_for(conn)
            .into_iter()
            .filter(|frame| frame["type"] == kind)
            .collect()
    }

    /// Number of frames sent to anyone.
    pub fn total(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl Transport for RecordingTransport {
    fn send_to_connection(&self, conn: &ConnectionId, frame: Arc<str>) -> Delivery {
        if self.full.lock().contains(conn) {
            return Delivery::Dropped;
        }
        self.frames.lock().push((conn.clone(), frame));
        Delivery::Sent
    }
}

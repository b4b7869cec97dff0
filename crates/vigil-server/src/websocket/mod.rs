//! WebSocket connections: per-client state, the hub the gateway sends
//! through, and the session loop.

pub mod connection;
pub mod hub;
pub mod session;

//! WebSocket front end: listener, handshake checks, per-connection tasks.

pub mod connection;
pub mod gateway;

pub use gateway::Gateway;

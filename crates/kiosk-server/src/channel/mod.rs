//! The realtime channel: per-connection handles, the observer fan-out, and
//! the WebSocket connection loop.

pub mod broadcast;
pub mod connection;
pub mod handle;

pub use broadcast::ObserverSet;
pub use handle::{ConnId, ConnectionHandle};

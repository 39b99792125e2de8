//! The hub's grip on one realtime connection.

use kiosk_core::ServerMessage;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

/// Identifies a realtime connection for its whole lifetime.
pub type ConnId = u64;

/// Outbound queue plus close signal for one connection.
///
/// Pushes never block: a full queue drops the message with a warning, so a
/// stalled client cannot hold up the hub.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    outbound: mpsc::Sender<ServerMessage>,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(id: ConnId, buffer: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (outbound, rx) = mpsc::channel(buffer.max(1));
        let handle = Self {
            id,
            outbound,
            close: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Queue `msg` for delivery. Returns whether it was queued.
    pub fn push(&self, msg: ServerMessage) -> bool {
        match self.outbound.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                warn!(conn_id = self.id, kind = msg.kind(), "outbound queue full, dropping");
                false
            }
            Err(TrySendError::Closed(msg)) => {
                debug!(conn_id = self.id, kind = msg.kind(), "connection gone, dropping");
                false
            }
        }
    }

    /// Ask the connection to flush what is queued and close.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (handle, mut rx) = ConnectionHandle::new(7, 2);
        assert!(handle.push(ServerMessage::Ping));
        assert!(handle.push(ServerMessage::Lock));
        assert!(!handle.push(ServerMessage::Unlock));
        assert_eq!(rx.recv().await, Some(ServerMessage::Ping));
        assert_eq!(rx.recv().await, Some(ServerMessage::Lock));
    }

    #[tokio::test]
    async fn close_before_wait_is_remembered() {
        let (handle, _rx) = ConnectionHandle::new(1, 4);
        handle.clone().close();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle.closed())
            .await
            .unwrap();
    }
}

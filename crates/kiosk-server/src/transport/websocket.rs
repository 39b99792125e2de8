//! WebSocket listener using tokio-tungstenite.
//!
//! Accepts TCP connections, completes the upgrade handshake, and hands each
//! established socket to the server through a channel.

use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use kiosk_core::codec::{self, MAX_INBOUND_FRAME};
use kiosk_core::{KioskError, KioskResult, ServerMessage};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Write half of an accepted socket.
pub type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Start the WebSocket listener.
///
/// Returns the bound address (useful with port 0) and a receiver that
/// yields accepted connections. The accept loop ends when the receiver is
/// dropped.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> KioskResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| KioskError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener
        .local_addr()
        .map_err(|e| KioskError::Transport(format!("WS local addr: {e}")))?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                accepted = tcp_listener.accept() => accepted,
                _ = tx.closed() => {
                    debug!("WebSocket listener stopped");
                    break;
                }
            };
            match accepted {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async_with_config(stream, Some(ws_config()))
                            .await
                        {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    debug!(remote = %addr, "server no longer accepting, dropping");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok((local_addr, rx))
}

fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_INBOUND_FRAME);
    config.max_frame_size = Some(MAX_INBOUND_FRAME);
    config
}

/// Encode and send one server message as a text frame.
pub async fn send_message(sink: &mut WsSink, msg: &ServerMessage) -> KioskResult<()> {
    let text = codec::encode(msg)?;
    sink.send(Message::text(text))
        .await
        .map_err(|e| KioskError::Transport(format!("WS send failed: {e}")))
}

/// Send a protocol-level ping frame.
pub async fn send_ping(sink: &mut WsSink) -> KioskResult<()> {
    sink.send(Message::Ping(Default::default()))
        .await
        .map_err(|e| KioskError::Transport(format!("WS ping failed: {e}")))
}

//! One realtime connection from accept to close.
//!
//! The loop multiplexes four event sources: inbound frames, the outbound
//! queue fed by the hub, the close signal, and the heartbeat timer. However
//! the loop ends, the hub is told exactly once via [`Hub::disconnect`].

use super::handle::ConnectionHandle;
use crate::auth::LoginLimits;
use crate::config::RealtimeConfig;
use crate::hub::{Admission, Hub};
use crate::transport::websocket::{send_message, send_ping, WebSocketConnection, WsSink};
use futures_util::{SinkExt, StreamExt};
use kiosk_core::codec;
use kiosk_core::{KioskError, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

/// Shared dependencies for every connection task.
pub struct ConnectionContext {
    pub hub: Arc<Hub>,
    pub limits: Arc<Mutex<LoginLimits>>,
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Unauthenticated,
    User,
    Observer,
}

/// Drive one connection until it closes.
pub async fn serve(ctx: Arc<ConnectionContext>, conn: WebSocketConnection) {
    let remote = conn.remote_addr;
    let (handle, mut outbound) =
        ConnectionHandle::new(ctx.hub.next_conn_id(), ctx.realtime.outbound_buffer);
    let conn_id = handle.id();
    info!(conn_id, remote = %remote, "realtime connection opened");

    let (mut sink, mut stream) = conn.ws_stream.split();
    let mut state = ConnState::Unauthenticated;
    let period = ctx.realtime.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = handle.closed() => {
                flush(&mut sink, &mut outbound).await;
                debug!(conn_id, "closing on request");
                break;
            }
            Some(msg) = outbound.recv() => {
                if let Err(e) = send_message(&mut sink, &msg).await {
                    debug!(conn_id, error = %e, "send failed");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if let Some(timeout) = ctx.realtime.heartbeat_timeout {
                    if last_seen.elapsed() >= timeout {
                        warn!(conn_id, remote = %remote, "heartbeat timed out");
                        break;
                    }
                }
                let sent = match send_message(&mut sink, &ServerMessage::Ping).await {
                    Ok(()) => send_ping(&mut sink).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    debug!(conn_id, error = %e, "heartbeat send failed");
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    handle_text(&ctx, &handle, &mut state, remote, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(conn_id, "peer closed");
                    break;
                }
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => {
                    debug!(conn_id, error = %e, "receive failed");
                    break;
                }
            },
        }
    }

    ctx.hub.disconnect(conn_id).await;
    let _ = sink.close().await;
    info!(conn_id, remote = %remote, ?state, "realtime connection closed");
}

/// Deliver whatever is still queued before the socket goes away.
async fn flush(sink: &mut WsSink, outbound: &mut mpsc::Receiver<ServerMessage>) {
    while let Ok(msg) = outbound.try_recv() {
        if send_message(sink, &msg).await.is_err() {
            break;
        }
    }
}

async fn handle_text(
    ctx: &ConnectionContext,
    handle: &ConnectionHandle,
    state: &mut ConnState,
    remote: SocketAddr,
    text: &str,
) {
    let conn_id = handle.id();
    let msg = match codec::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(conn_id, error = %e, "malformed message ignored");
            return;
        }
    };
    let Some((kind, creds)) = msg.as_login() else {
        trace!(conn_id, "pong");
        return;
    };

    if *state != ConnState::Unauthenticated {
        handle.push(ServerMessage::LoginError {
            message: "already logged in".to_string(),
        });
        return;
    }

    if !ctx.limits.lock().await.check_login(remote.ip()) {
        warn!(conn_id, remote = %remote, "login rate limited");
        reject(handle, &KioskError::RateLimited);
        return;
    }

    match ctx.hub.login(handle, kind, creds).await {
        Ok(Admission::Observer) => *state = ConnState::Observer,
        Ok(Admission::Session) => *state = ConnState::User,
        Err(e) => {
            info!(conn_id, username = %creds.username, ?kind, error = %e, "login rejected");
            reject(handle, &e);
        }
    }
}

fn reject(handle: &ConnectionHandle, e: &KioskError) {
    handle.push(ServerMessage::LoginError {
        message: e.to_string(),
    });
    handle.close();
}

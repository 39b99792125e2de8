//! Core server: binds both listeners and runs until shutdown.
//!
//! HTTP (login form, admin API, health) is served by axum; the realtime
//! channel runs on its own WebSocket port. Both share one [`Hub`].

use crate::api::{self, AppState};
use crate::auth::LoginLimits;
use crate::channel::connection::{self, ConnectionContext};
use crate::config::{RealtimeConfig, ServerConfig};
use crate::hub::Hub;
use crate::transport::websocket::{self, WebSocketConnection};
use kiosk_core::{KioskError, KioskResult, LedgerStore};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

/// How often expired rate-limit entries are swept.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// A bound, not yet running, kiosk server.
pub struct KioskServer {
    hub: Arc<Hub>,
    limits: Arc<Mutex<LoginLimits>>,
    realtime: RealtimeConfig,
    http_listener: TcpListener,
    http_addr: SocketAddr,
    ws_rx: mpsc::Receiver<WebSocketConnection>,
    ws_addr: SocketAddr,
}

impl KioskServer {
    /// Load the ledger and bind both listeners.
    pub async fn bind(config: ServerConfig) -> KioskResult<Self> {
        let store = LedgerStore::open(&config.data_dir)?;
        let (ledger, settings) = store.load()?;
        info!(data_dir = %config.data_dir.display(), "data directory opened");
        let hub = Hub::new(store, ledger, settings, config.log_retention);

        let limits = Arc::new(Mutex::new(LoginLimits::new(
            config.max_login_attempts,
            config.login_window_secs,
        )));

        let http_listener = TcpListener::bind(config.http_addr)
            .await
            .map_err(|e| KioskError::Transport(format!("HTTP bind failed: {e}")))?;
        let http_addr = http_listener
            .local_addr()
            .map_err(|e| KioskError::Transport(format!("HTTP local addr: {e}")))?;
        let (ws_addr, ws_rx) = websocket::start_listener(config.ws_addr).await?;

        Ok(Self {
            hub,
            limits,
            realtime: config.realtime,
            http_listener,
            http_addr,
            ws_rx,
            ws_addr,
        })
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn ws_addr(&self) -> SocketAddr {
        self.ws_addr
    }

    /// Serve until `shutdown` resolves, then retire every session and flush.
    pub async fn run<F>(self, shutdown: F) -> KioskResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let KioskServer {
            hub,
            limits,
            realtime,
            http_listener,
            http_addr,
            mut ws_rx,
            ws_addr,
        } = self;

        // Sweep the login limiter periodically
        let gc_limits = limits.clone();
        let housekeeping = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
            loop {
                interval.tick().await;
                gc_limits.lock().await.gc();
            }
        });

        // Accept realtime connections
        let ctx = Arc::new(ConnectionContext {
            hub: hub.clone(),
            limits: limits.clone(),
            realtime,
        });
        let realtime_accept = tokio::spawn(async move {
            while let Some(conn) = ws_rx.recv().await {
                tokio::spawn(connection::serve(ctx.clone(), conn));
            }
        });

        let app = api::router(AppState {
            hub: hub.clone(),
            limits,
        });

        info!(http = %http_addr, ws = %ws_addr, "kiosk-server ready");

        let served = axum::serve(
            http_listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        info!("shutting down");
        realtime_accept.abort();
        housekeeping.abort();
        hub.shutdown().await;

        served.map_err(|e| KioskError::Transport(format!("HTTP server failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use futures_util::{SinkExt, StreamExt};
    use kiosk_core::password::hash_password;
    use kiosk_core::{Ledger, Role, ServerMessage, User};
    use serde_json::{json, Value};
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::Message;

    struct Running {
        http: String,
        ws: String,
        stop: oneshot::Sender<()>,
        task: tokio::task::JoinHandle<KioskResult<()>>,
        store: LedgerStore,
        _dir: tempfile::TempDir,
    }

    async fn start() -> Running {
        start_with(RealtimeConfig::default()).await
    }

    async fn start_with(realtime: RealtimeConfig) -> Running {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path()).unwrap();
        let mut ledger = Ledger::default();
        let mut admin = User::new(hash_password("toor").unwrap(), 0.0);
        admin.role = Role::Admin;
        ledger.users.insert("root".into(), admin);
        let mut alice = User::new(hash_password("pw").unwrap(), 6.0);
        alice.balance = 3.0;
        ledger.users.insert("alice".into(), alice);
        store.save_ledger(&ledger).unwrap();

        let cli = ConfigOverrides {
            port: Some(0),
            data_dir: Some(dir.path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        let mut config = ServerConfig::load(None, &cli).unwrap();
        assert_eq!(config.ws_addr.port(), 0);
        config.realtime = realtime;

        let server = KioskServer::bind(config).await.unwrap();
        let http = format!("http://{}", server.http_addr());
        let ws = format!("ws://{}", server.ws_addr());
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async move {
            let _ = stopped.await;
        }));
        Running {
            http,
            ws,
            stop,
            task,
            store,
            _dir: dir,
        }
    }

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn send_json(ws: &mut Client, value: Value) {
        ws.send(Message::text(value.to_string())).await.unwrap();
    }

    /// Next server message, skipping heartbeat traffic.
    async fn next_msg(ws: &mut Client) -> Option<ServerMessage> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .unwrap()?;
            match frame.ok()? {
                Message::Text(text) => {
                    let msg: ServerMessage = serde_json::from_str(&text).unwrap();
                    if msg != ServerMessage::Ping {
                        return Some(msg);
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn realtime_login_control_and_close() {
        let srv = start().await;

        let (mut admin, _) = tokio_tungstenite::connect_async(srv.ws.as_str()).await.unwrap();
        send_json(&mut admin, json!({"type": "admin_login", "username": "root", "password": "toor"})).await;
        assert!(matches!(next_msg(&mut admin).await, Some(ServerMessage::AdminUpdate(_))));

        let (mut kiosk, _) = tokio_tungstenite::connect_async(srv.ws.as_str()).await.unwrap();
        send_json(&mut kiosk, json!({"type": "login", "username": "alice", "password": "pw"})).await;
        assert!(matches!(
            next_msg(&mut kiosk).await,
            Some(ServerMessage::LoginSuccess { balance, .. }) if balance == 3.0
        ));
        match next_msg(&mut admin).await {
            Some(ServerMessage::AdminUpdate(snapshot)) => {
                assert_eq!(snapshot.clients.len(), 1);
                assert_eq!(snapshot.clients[0].username, "alice");
            }
            other => panic!("expected admin_update, got {other:?}"),
        }

        // Garbage is ignored; a second login is refused but not fatal.
        kiosk.send(Message::text("{not json")).await.unwrap();
        send_json(&mut kiosk, json!({"type": "login", "username": "alice", "password": "pw"})).await;
        assert!(matches!(
            next_msg(&mut kiosk).await,
            Some(ServerMessage::LoginError { .. })
        ));

        let http = reqwest::Client::new();
        let resp = http
            .post(format!("{}/api/control/alice", srv.http))
            .json(&json!({"action": "message", "message": "hello"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            next_msg(&mut kiosk).await,
            Some(ServerMessage::AdminMessage {
                message: "hello".into()
            })
        );

        let resp = http
            .delete(format!("{}/api/users/alice", srv.http))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);

        kiosk.close(None).await.unwrap();
        drop(kiosk);
        let mut cleared = false;
        for _ in 0..50 {
            let health: Value = http
                .get(format!("{}/health", srv.http))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if health["activeSessions"] == 0 {
                assert_eq!(health["observers"], 1);
                cleared = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(cleared);

        srv.stop.send(()).unwrap();
        srv.task.await.unwrap().unwrap();
        let (ledger, _) = srv.store.load().unwrap();
        assert_eq!(ledger.session_logs.len(), 1);
        assert_eq!(ledger.session_logs[0].username, "alice");
    }

    #[tokio::test]
    async fn bad_login_gets_error_and_close() {
        let srv = start().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(srv.ws.as_str()).await.unwrap();
        send_json(&mut ws, json!({"type": "login", "username": "alice", "password": "nope"})).await;
        assert_eq!(
            next_msg(&mut ws).await,
            Some(ServerMessage::LoginError {
                message: KioskError::InvalidCredentials.to_string()
            })
        );
        assert_eq!(next_msg(&mut ws).await, None);

        let resp = reqwest::Client::new()
            .post(format!("{}/login", srv.http))
            .json(&json!({"username": "alice", "password": "pw"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["page"], "client.html");

        srv.stop.send(()).unwrap();
        srv.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_live_sessions() {
        let srv = start().await;
        let (mut kiosk, _) = tokio_tungstenite::connect_async(srv.ws.as_str()).await.unwrap();
        send_json(&mut kiosk, json!({"type": "client_reconnect", "username": "alice", "password": "pw"})).await;
        assert!(matches!(
            next_msg(&mut kiosk).await,
            Some(ServerMessage::LoginSuccess { .. })
        ));

        srv.stop.send(()).unwrap();
        srv.task.await.unwrap().unwrap();
        assert_eq!(next_msg(&mut kiosk).await, None);

        let (ledger, _) = srv.store.load().unwrap();
        assert_eq!(ledger.session_logs.len(), 1);
    }

    async fn active_sessions(http: &reqwest::Client, base: &str) -> u64 {
        let health: Value = http
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        health["activeSessions"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn silent_client_is_reaped() {
        let srv = start_with(RealtimeConfig {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Some(Duration::from_secs(2)),
            ..RealtimeConfig::default()
        })
        .await;
        let http = reqwest::Client::new();

        let (mut kiosk, _) = tokio_tungstenite::connect_async(srv.ws.as_str()).await.unwrap();
        send_json(&mut kiosk, json!({"type": "login", "username": "alice", "password": "pw"})).await;

        // Stay silent: nothing is read, so no pong goes back either.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(active_sessions(&http, &srv.http).await, 1);
        let mut reaped = false;
        for _ in 0..60 {
            if active_sessions(&http, &srv.http).await == 0 {
                reaped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(reaped);
        let (ledger, _) = srv.store.load().unwrap();
        assert_eq!(ledger.session_logs.len(), 1);

        // What was queued before the reap: the login reply, a JSON ping, then close.
        let mut saw_ping = false;
        let mut closed = false;
        while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(5), kiosk.next()).await {
            match frame {
                Ok(Message::Text(text)) => {
                    if serde_json::from_str::<ServerMessage>(&text).unwrap() == ServerMessage::Ping {
                        saw_ping = true;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => {
                    closed = true;
                    break;
                }
                Ok(_) => {}
            }
        }
        assert!(saw_ping);
        assert!(closed);

        srv.stop.send(()).unwrap();
        srv.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn zero_timeout_never_reaps() {
        let srv = start_with(RealtimeConfig {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: None,
            ..RealtimeConfig::default()
        })
        .await;
        let http = reqwest::Client::new();

        let (mut kiosk, _) = tokio_tungstenite::connect_async(srv.ws.as_str()).await.unwrap();
        send_json(&mut kiosk, json!({"type": "login", "username": "alice", "password": "pw"})).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(active_sessions(&http, &srv.http).await, 1);

        assert!(matches!(
            next_msg(&mut kiosk).await,
            Some(ServerMessage::LoginSuccess { .. })
        ));
        let resp = http
            .post(format!("{}/api/control/alice", srv.http))
            .json(&json!({"action": "lock"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(next_msg(&mut kiosk).await, Some(ServerMessage::Lock));

        srv.stop.send(()).unwrap();
        srv.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        let srv = start().await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{}/api/recharge", srv.http))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().starts_with("invalid request body"));

        let resp = http
            .post(format!("{}/api/recharge", srv.http))
            .body(r#"{"username":"alice","amount":1}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);

        srv.stop.send(()).unwrap();
        srv.task.await.unwrap().unwrap();
    }
}

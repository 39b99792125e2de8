//! Realtime channel message types.
//!
//! Every frame is a JSON object whose `type` field selects the variant,
//! e.g. `{"type":"login","username":"alice","password":"..."}`.

use crate::ledger::{Role, SessionLogEntry, Settings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Username/password pair carried by the login-kind messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Messages sent by kiosk clients and admin panels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Admin panel asking to become an observer.
    AdminLogin(Credentials),
    /// Kiosk client starting a billed session.
    Login(Credentials),
    /// A previously connected identity coming back after a dropped socket.
    ClientReconnect(Credentials),
    /// Heartbeat reply.
    Pong,
}

/// Which login-kind message arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginKind {
    Admin,
    User,
    Reconnect,
}

impl ClientMessage {
    /// Split a login-kind message into its kind and credentials.
    pub fn as_login(&self) -> Option<(LoginKind, &Credentials)> {
        match self {
            ClientMessage::AdminLogin(c) => Some((LoginKind::Admin, c)),
            ClientMessage::Login(c) => Some((LoginKind::User, c)),
            ClientMessage::ClientReconnect(c) => Some((LoginKind::Reconnect, c)),
            ClientMessage::Pong => None,
        }
    }
}

/// Messages pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LoginSuccess {
        balance: f64,
        rate: f64,
        #[serde(rename = "startTime")]
        start_time: DateTime<Utc>,
    },
    LoginError {
        message: String,
    },
    BalanceUpdate {
        balance: f64,
        #[serde(rename = "sessionCost")]
        session_cost: f64,
    },
    ForceLogout {
        message: String,
    },
    Lock,
    Unlock,
    AdminMessage {
        message: String,
    },
    Reboot,
    Shutdown,
    AdminUpdate(Snapshot),
    Ping,
    /// Informational: the last flush to disk failed.
    StorageError {
        message: String,
    },
}

impl ServerMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::LoginSuccess { .. } => "login_success",
            ServerMessage::LoginError { .. } => "login_error",
            ServerMessage::BalanceUpdate { .. } => "balance_update",
            ServerMessage::ForceLogout { .. } => "force_logout",
            ServerMessage::Lock => "lock",
            ServerMessage::Unlock => "unlock",
            ServerMessage::AdminMessage { .. } => "admin_message",
            ServerMessage::Reboot => "reboot",
            ServerMessage::Shutdown => "shutdown",
            ServerMessage::AdminUpdate(_) => "admin_update",
            ServerMessage::Ping => "ping",
            ServerMessage::StorageError { .. } => "storage_error",
        }
    }
}

/// A live session as shown to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveClient {
    pub username: String,
    pub start_time: DateTime<Utc>,
    pub balance: f64,
    pub is_locked: bool,
}

/// A user account as shown to observers (no credential).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    pub balance: f64,
    pub rate: f64,
    pub role: Role,
}

/// Full point-in-time view published to observers as `admin_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub clients: Vec<ActiveClient>,
    #[serde(rename = "allUsers")]
    pub all_users: BTreeMap<String, UserView>,
    pub session_logs: Vec<SessionLogEntry>,
    pub settings: Settings,
}

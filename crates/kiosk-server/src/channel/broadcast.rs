//! Observer fan-out of `admin_update` snapshots.

use super::handle::{ConnId, ConnectionHandle};
use crate::session::SessionRegistry;
use kiosk_core::messages::{ActiveClient, UserView};
use kiosk_core::{Ledger, ServerMessage, Settings, Snapshot, RECENT_LOG_LIMIT};
use std::collections::HashMap;
use tracing::debug;

/// Connections that authenticated as admin observers.
#[derive(Debug, Default)]
pub struct ObserverSet {
    observers: HashMap<ConnId, ConnectionHandle>,
}

impl ObserverSet {
    pub fn insert(&mut self, handle: ConnectionHandle) {
        debug!(conn_id = handle.id(), "observer joined");
        self.observers.insert(handle.id(), handle);
    }

    pub fn remove(&mut self, conn_id: ConnId) -> bool {
        self.observers.remove(&conn_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Queue `msg` on every observer.
    pub fn send_all(&self, msg: &ServerMessage) {
        for handle in self.observers.values() {
            handle.push(msg.clone());
        }
    }

    /// Close every observer connection.
    pub fn close_all(&self) {
        for handle in self.observers.values() {
            handle.close();
        }
    }
}

/// Point-in-time view of the hub state. Credentials are never included.
pub fn build_snapshot(ledger: &Ledger, settings: &Settings, sessions: &SessionRegistry) -> Snapshot {
    let clients = sessions
        .iter_by_start()
        .into_iter()
        .map(|s| ActiveClient {
            username: s.username.clone(),
            start_time: s.started_at,
            balance: ledger.user(&s.username).map(|u| u.balance).unwrap_or(0.0),
            is_locked: s.locked,
        })
        .collect();
    let all_users = ledger
        .users
        .iter()
        .map(|(name, u)| {
            (
                name.clone(),
                UserView {
                    balance: u.balance,
                    rate: u.rate,
                    role: u.role,
                },
            )
        })
        .collect();
    Snapshot {
        clients,
        all_users,
        session_logs: ledger.recent_logs(RECENT_LOG_LIMIT).to_vec(),
        settings: settings.clone(),
    }
}

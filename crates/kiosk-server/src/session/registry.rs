//! Live sessions keyed by connection.
//!
//! At most one session per username. Only the hub touches the registry, and
//! only while holding its lock.

use crate::channel::{ConnId, ConnectionHandle};
use chrono::{DateTime, Utc};
use kiosk_core::{KioskError, KioskResult, Role, SessionLogEntry};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// One admitted connection.
#[derive(Debug)]
pub struct Session {
    pub username: String,
    role: Role,
    pub started_at: DateTime<Utc>,
    /// Billing interval captured at admission.
    pub interval: Duration,
    pub locked: bool,
    /// Set once the session is on its way out; no further billing.
    pub closing: bool,
    /// Sum of balance decrements applied so far.
    pub accrued: f64,
    pub handle: ConnectionHandle,
    meter: Option<JoinHandle<()>>,
}

impl Session {
    /// Whether the session runs a billing meter. Admins are never billed.
    pub fn is_billed(&self) -> bool {
        !self.role.is_admin()
    }

    /// Flag the session as ending and ask its connection to close.
    pub fn begin_close(&mut self) {
        self.closing = true;
        self.handle.close();
    }

    #[cfg(test)]
    pub fn has_meter(&self) -> bool {
        self.meter.is_some()
    }

    fn stop_meter(&mut self) {
        if let Some(meter) = self.meter.take() {
            meter.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_meter();
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, username: &str) -> bool {
        self.sessions.values().any(|s| s.username == username)
    }

    /// Register a session for `handle`. Fails with `DuplicateSession` when
    /// `username` is already live.
    pub fn admit(
        &mut self,
        handle: ConnectionHandle,
        username: &str,
        role: Role,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> KioskResult<&mut Session> {
        if self.is_active(username) {
            return Err(KioskError::DuplicateSession);
        }
        let conn_id = handle.id();
        info!(conn_id, username = %username, ?role, "session started");
        let session = Session {
            username: username.to_string(),
            role,
            started_at: now,
            interval,
            locked: false,
            closing: false,
            accrued: 0.0,
            handle,
            meter: None,
        };
        Ok(self.sessions.entry(conn_id).or_insert(session))
    }

    /// Hand the session its billing task. Aborted on retire.
    pub fn attach_meter(&mut self, conn_id: ConnId, meter: JoinHandle<()>) {
        match self.sessions.get_mut(&conn_id) {
            Some(session) => session.meter = Some(meter),
            None => meter.abort(),
        }
    }

    #[cfg(test)]
    pub fn get(&self, conn_id: ConnId) -> Option<&Session> {
        self.sessions.get(&conn_id)
    }

    pub fn get_mut(&mut self, conn_id: ConnId) -> Option<&mut Session> {
        self.sessions.get_mut(&conn_id)
    }

    pub fn find_by_username_mut(&mut self, username: &str) -> Option<&mut Session> {
        self.sessions.values_mut().find(|s| s.username == username)
    }

    /// Remove the session and produce its log entry. Returns `None` when
    /// there is nothing to retire, so repeated calls are harmless.
    pub fn retire(&mut self, conn_id: ConnId, now: DateTime<Utc>) -> Option<SessionLogEntry> {
        let mut session = self.sessions.remove(&conn_id)?;
        session.stop_meter();
        let entry =
            SessionLogEntry::closing(&session.username, session.started_at, now, session.accrued);
        info!(
            conn_id,
            username = %session.username,
            duration_min = entry.duration,
            cost = entry.cost,
            "session ended"
        );
        Some(entry)
    }

    /// Live sessions, oldest first.
    pub fn iter_by_start(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.username.cmp(&b.username))
        });
        sessions
    }

    pub fn conn_ids(&self) -> Vec<ConnId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admit(registry: &mut SessionRegistry, id: ConnId, username: &str) -> KioskResult<()> {
        let (handle, _rx) = ConnectionHandle::new(id, 4);
        registry
            .admit(handle, username, Role::User, Duration::from_secs(60), Utc::now())
            .map(|_| ())
    }

    #[test]
    fn one_session_per_username() {
        let mut registry = SessionRegistry::new();
        admit(&mut registry, 1, "alice").unwrap();
        assert!(matches!(
            admit(&mut registry, 2, "alice"),
            Err(KioskError::DuplicateSession)
        ));
        admit(&mut registry, 3, "bob").unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.is_active("alice"));
    }

    #[test]
    fn only_user_sessions_are_billed() {
        let mut registry = SessionRegistry::new();
        admit(&mut registry, 1, "alice").unwrap();
        let (handle, _rx) = ConnectionHandle::new(2, 4);
        let root = registry
            .admit(handle, "root", Role::Admin, Duration::from_secs(60), Utc::now())
            .unwrap();
        assert!(!root.is_billed());
        assert!(registry.get(1).unwrap().is_billed());
    }

    #[test]
    fn retire_is_idempotent() {
        let mut registry = SessionRegistry::new();
        admit(&mut registry, 1, "alice").unwrap();
        registry.get_mut(1).unwrap().accrued = 0.204;
        let entry = registry.retire(1, Utc::now()).unwrap();
        assert_eq!(entry.username, "alice");
        assert_eq!(entry.cost, 0.2);
        assert!(registry.retire(1, Utc::now()).is_none());
        assert!(!registry.is_active("alice"));
        admit(&mut registry, 2, "alice").unwrap();
    }

    #[tokio::test]
    async fn retire_aborts_meter() {
        let mut registry = SessionRegistry::new();
        admit(&mut registry, 1, "alice").unwrap();
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let meter = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await
        });
        registry.attach_meter(1, meter);
        assert!(registry.get(1).unwrap().has_meter());
        registry.retire(1, Utc::now());
        let dropped = tokio::time::timeout(Duration::from_secs(1), alive_rx)
            .await
            .unwrap();
        assert!(dropped.is_err());
    }

    #[test]
    fn ordered_by_start() {
        let mut registry = SessionRegistry::new();
        let t0 = Utc::now();
        for (id, name, offset) in [(1, "carol", 2), (2, "alice", 0), (3, "bob", 1)] {
            let (handle, _rx) = ConnectionHandle::new(id, 4);
            registry
                .admit(
                    handle,
                    name,
                    Role::User,
                    Duration::from_secs(60),
                    t0 + chrono::Duration::seconds(offset),
                )
                .unwrap();
        }
        let names: Vec<&str> = registry
            .iter_by_start()
            .iter()
            .map(|s| s.username.as_str())
            .collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
    }
}

//! The coordinator that owns every piece of mutable server state.
//!
//! Ledger, settings, live sessions and the observer set sit behind one async
//! mutex. Each transition (admission, retire, billing tick, admin operation)
//! is a single critical section that mutates, awaits the flush to disk, and
//! then queues the resulting snapshot to observers. Queueing never blocks, so
//! critical sections stay short.

use crate::auth::gate;
use crate::channel::broadcast::build_snapshot;
use crate::channel::{ConnId, ConnectionHandle, ObserverSet};
use crate::session::billing::{self, Charge, TickOutcome};
use crate::session::{control, ControlAction, SessionRegistry};
use chrono::{Local, Utc};
use kiosk_core::identity::{password_len_ok, validate_username};
use kiosk_core::money::round2;
use kiosk_core::store::encode_pretty;
use kiosk_core::{
    compute_stats, Credentials, KioskError, KioskResult, Ledger, LedgerStore, LoginKind, Period,
    Role, ServerMessage, Settings, Stats, User,
};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const EXHAUSTED_MESSAGE: &str = "Balance exhausted";

/// What a successful realtime login turned the connection into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Observer,
    Session,
}

/// Connection counts reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubCounts {
    pub active_sessions: usize,
    pub observers: usize,
}

struct HubState {
    ledger: Ledger,
    settings: Settings,
    sessions: SessionRegistry,
    observers: ObserverSet,
}

pub struct Hub {
    state: Mutex<HubState>,
    store: LedgerStore,
    log_retention: usize,
    next_conn_id: AtomicU64,
}

impl Hub {
    pub fn new(store: LedgerStore, ledger: Ledger, settings: Settings, log_retention: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                ledger,
                settings,
                sessions: SessionRegistry::new(),
                observers: ObserverSet::default(),
            }),
            store,
            log_retention,
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Check a username/password pair. Returns the hash that verified.
    async fn verify(&self, creds: &Credentials) -> KioskResult<String> {
        gate::precheck(&creds.username, &creds.password)?;
        let hash = {
            let st = self.state.lock().await;
            gate::stored_hash(&st.ledger, &creds.username)?
        };
        if !gate::verify_off_thread(&creds.password, &hash).await {
            return Err(KioskError::InvalidCredentials);
        }
        Ok(hash)
    }

    /// Stateless credential check for the HTTP login form.
    pub async fn authenticate(&self, creds: &Credentials) -> KioskResult<Role> {
        let hash = self.verify(creds).await?;
        let st = self.state.lock().await;
        gate::check_account(&st.ledger, &creds.username, &hash).map(|u| u.role)
    }

    /// Authenticate a realtime connection and admit it as a billed session
    /// or an observer.
    pub async fn login(
        self: &Arc<Self>,
        handle: &ConnectionHandle,
        kind: LoginKind,
        creds: &Credentials,
    ) -> KioskResult<Admission> {
        let hash = self.verify(creds).await?;

        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let user = gate::check_account(&st.ledger, &creds.username, &hash)?;
        let (role, balance, rate) = (user.role, user.balance, user.rate);

        let admission = match (kind, role) {
            (LoginKind::Admin | LoginKind::Reconnect, Role::Admin) => Admission::Observer,
            (LoginKind::Admin, Role::User) => return Err(KioskError::InvalidCredentials),
            (LoginKind::User | LoginKind::Reconnect, _) => Admission::Session,
        };

        match admission {
            Admission::Observer => {
                info!(conn_id = handle.id(), username = %creds.username, "observer admitted");
                st.observers.insert(handle.clone());
            }
            Admission::Session => {
                gate::check_not_already_active(&st.sessions, &creds.username)?;
                let interval = st.settings.billing_interval();
                let now = Utc::now();
                let billed = st
                    .sessions
                    .admit(handle.clone(), &creds.username, role, interval, now)?
                    .is_billed();
                if billed {
                    let meter = billing::spawn_meter(Arc::clone(self), handle.id(), interval);
                    st.sessions.attach_meter(handle.id(), meter);
                }
                handle.push(ServerMessage::LoginSuccess {
                    balance,
                    rate,
                    start_time: now,
                });
            }
        }

        self.publish(st);
        Ok(admission)
    }

    /// Apply one billing tick to the session on `conn_id`.
    pub async fn billing_tick(&self, conn_id: ConnId) -> TickOutcome {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;

        let Some(session) = st.sessions.get_mut(conn_id) else {
            return TickOutcome::Stop;
        };
        if session.closing {
            return TickOutcome::Stop;
        }
        if session.locked {
            debug!(conn_id, username = %session.username, "locked, tick skipped");
            return TickOutcome::Continue;
        }
        let Some(user) = st.ledger.user_mut(&session.username) else {
            warn!(conn_id, username = %session.username, "billed account vanished");
            session.begin_close();
            return TickOutcome::Stop;
        };

        let outcome = match billing::apply_tick(user, &mut session.accrued, session.interval) {
            Charge::Charged {
                balance,
                session_cost,
            } => {
                session.handle.push(ServerMessage::BalanceUpdate {
                    balance,
                    session_cost,
                });
                TickOutcome::Continue
            }
            Charge::Exhausted { session_cost } => {
                info!(conn_id, username = %session.username, "balance exhausted");
                session.handle.push(ServerMessage::BalanceUpdate {
                    balance: 0.0,
                    session_cost,
                });
                session.handle.push(ServerMessage::ForceLogout {
                    message: EXHAUSTED_MESSAGE.to_string(),
                });
                session.begin_close();
                TickOutcome::Stop
            }
        };

        self.persist_ledger(st).await;
        self.publish(st);
        outcome
    }

    /// Forget a connection that has closed. Safe to call more than once.
    pub async fn disconnect(self: &Arc<Self>, conn_id: ConnId) {
        let hub = Arc::clone(self);
        let section = async move {
            hub.retire_connection(conn_id).await;
            Ok(())
        };
        if let Err(e) = detached(section).await {
            warn!(conn_id, error = %e, "disconnect did not complete");
        }
    }

    async fn retire_connection(&self, conn_id: ConnId) {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;

        if st.observers.remove(conn_id) {
            debug!(conn_id, "observer left");
        }
        if let Some(entry) = st.sessions.retire(conn_id, Utc::now()) {
            st.ledger.record_session(entry, self.log_retention);
            self.persist_ledger(st).await;
            self.publish(st);
        }
    }

    pub async fn create_user(self: &Arc<Self>, username: &str, password: &str, rate: f64) -> KioskResult<()> {
        let hub = Arc::clone(self);
        let (username, password) = (username.to_string(), password.to_string());
        detached(async move { hub.create_user_section(&username, &password, rate).await }).await
    }

    async fn create_user_section(&self, username: &str, password: &str, rate: f64) -> KioskResult<()> {
        validate_username(username)?;
        if !password_len_ok(password) {
            return Err(KioskError::InvalidPassword);
        }
        check_rate(rate)?;
        if self.state.lock().await.ledger.user(username).is_some() {
            return Err(KioskError::DuplicateUser(username.to_string()));
        }

        let hash = gate::hash_off_thread(password).await?;

        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        if st.ledger.user(username).is_some() {
            return Err(KioskError::DuplicateUser(username.to_string()));
        }
        st.ledger
            .users
            .insert(username.to_string(), User::new(hash, rate));
        info!(username = %username, rate, "user created");
        self.persist_ledger(st).await;
        self.publish(st);
        Ok(())
    }

    pub async fn update_user(
        self: &Arc<Self>,
        username: &str,
        password: Option<&str>,
        rate: Option<f64>,
    ) -> KioskResult<()> {
        let hub = Arc::clone(self);
        let username = username.to_string();
        let password = password.map(str::to_string);
        detached(async move {
            hub.update_user_section(&username, password.as_deref(), rate)
                .await
        })
        .await
    }

    async fn update_user_section(
        &self,
        username: &str,
        password: Option<&str>,
        rate: Option<f64>,
    ) -> KioskResult<()> {
        if self.state.lock().await.ledger.user(username).is_none() {
            return Err(KioskError::UserNotFound(username.to_string()));
        }
        if let Some(rate) = rate {
            check_rate(rate)?;
        }
        let hash = match password {
            Some(p) if !password_len_ok(p) => return Err(KioskError::InvalidPassword),
            Some(p) => Some(gate::hash_off_thread(p).await?),
            None => None,
        };

        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let user = st
            .ledger
            .user_mut(username)
            .ok_or_else(|| KioskError::UserNotFound(username.to_string()))?;
        if let Some(hash) = hash {
            user.password_hash = hash;
        }
        if let Some(rate) = rate {
            user.rate = rate;
        }
        info!(username = %username, password_changed = password.is_some(), ?rate, "user updated");
        self.persist_ledger(st).await;
        self.publish(st);
        Ok(())
    }

    pub async fn delete_user(self: &Arc<Self>, username: &str) -> KioskResult<()> {
        let hub = Arc::clone(self);
        let username = username.to_string();
        detached(async move { hub.delete_user_section(&username).await }).await
    }

    async fn delete_user_section(&self, username: &str) -> KioskResult<()> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        if st.ledger.user(username).is_none() {
            return Err(KioskError::UserNotFound(username.to_string()));
        }
        if st.sessions.is_active(username) {
            return Err(KioskError::UserActive(username.to_string()));
        }
        st.ledger.users.remove(username);
        info!(username = %username, "user deleted");
        self.persist_ledger(st).await;
        self.publish(st);
        Ok(())
    }

    /// Change the billing interval. Live sessions keep the interval they
    /// were admitted with.
    pub async fn update_settings(self: &Arc<Self>, billing_interval_minutes: f64) -> KioskResult<()> {
        let hub = Arc::clone(self);
        detached(async move { hub.update_settings_section(billing_interval_minutes).await }).await
    }

    async fn update_settings_section(&self, billing_interval_minutes: f64) -> KioskResult<()> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        st.settings.set_billing_interval(billing_interval_minutes)?;
        info!(billing_interval_minutes, "settings updated");
        self.persist_settings(st).await;
        self.publish(st);
        Ok(())
    }

    /// Add funds. Returns the new balance.
    pub async fn recharge(self: &Arc<Self>, username: &str, amount: f64) -> KioskResult<f64> {
        let hub = Arc::clone(self);
        let username = username.to_string();
        detached(async move { hub.recharge_section(&username, amount).await }).await
    }

    async fn recharge_section(&self, username: &str, amount: f64) -> KioskResult<f64> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let balance = st.ledger.recharge(username, amount)?;
        info!(username = %username, amount, balance, "recharged");
        if let Some(session) = st.sessions.find_by_username_mut(username) {
            session.handle.push(ServerMessage::BalanceUpdate {
                balance,
                session_cost: round2(session.accrued),
            });
        }
        self.persist_ledger(st).await;
        self.publish(st);
        Ok(balance)
    }

    /// Apply a control action to `username`'s live session.
    pub async fn control(&self, username: &str, action: &str, message: Option<&str>) -> KioskResult<()> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let session = st
            .sessions
            .find_by_username_mut(username)
            .filter(|s| !s.closing)
            .ok_or_else(|| KioskError::ClientNotOnline(username.to_string()))?;
        let action: ControlAction = action.parse()?;
        control::apply(session, action, message);
        self.publish(st);
        Ok(())
    }

    pub async fn stats(&self, period: Period) -> Stats {
        let st = self.state.lock().await;
        compute_stats(&st.ledger.session_logs, period, Local::now())
    }

    pub async fn counts(&self) -> HubCounts {
        let st = self.state.lock().await;
        HubCounts {
            active_sessions: st.sessions.len(),
            observers: st.observers.len(),
        }
    }

    /// Close every connection, retire every session, and flush.
    pub async fn shutdown(self: &Arc<Self>) {
        let hub = Arc::clone(self);
        let section = async move {
            hub.shutdown_section().await;
            Ok(())
        };
        if let Err(e) = detached(section).await {
            error!(error = %e, "shutdown did not complete");
        }
    }

    async fn shutdown_section(&self) {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let now = Utc::now();
        let mut retired = 0;
        for conn_id in st.sessions.conn_ids() {
            if let Some(session) = st.sessions.get_mut(conn_id) {
                session.begin_close();
            }
            if let Some(entry) = st.sessions.retire(conn_id, now) {
                st.ledger.record_session(entry, self.log_retention);
                retired += 1;
            }
        }
        st.observers.close_all();
        self.persist_ledger(st).await;
        info!(retired, "hub shut down");
    }

    fn publish(&self, st: &HubState) {
        if st.observers.is_empty() {
            return;
        }
        let snapshot = build_snapshot(&st.ledger, &st.settings, &st.sessions);
        st.observers.send_all(&ServerMessage::AdminUpdate(snapshot));
    }

    async fn persist_ledger(&self, st: &HubState) {
        let store = self.store.clone();
        let result = match encode_pretty(&st.ledger) {
            Ok(bytes) => tokio::task::spawn_blocking(move || store.write_ledger(&bytes))
                .await
                .unwrap_or_else(|e| Err(KioskError::StorageIo(format!("flush task failed: {e}")))),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.report_storage_error(st, "ledger", e);
        }
    }

    async fn persist_settings(&self, st: &HubState) {
        let store = self.store.clone();
        let result = match encode_pretty(&st.settings) {
            Ok(bytes) => tokio::task::spawn_blocking(move || store.write_settings(&bytes))
                .await
                .unwrap_or_else(|e| Err(KioskError::StorageIo(format!("flush task failed: {e}")))),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.report_storage_error(st, "settings", e);
        }
    }

    /// In-memory state stays authoritative; observers are told the disk copy
    /// is behind.
    fn report_storage_error(&self, st: &HubState, what: &str, e: KioskError) {
        error!(file = what, error = %e, "flush failed");
        st.observers.send_all(&ServerMessage::StorageError {
            message: e.to_string(),
        });
    }
}

/// Run a critical section on its own task. Dropping the caller does not
/// cut the section short between the flush and the publish.
async fn detached<T, F>(section: F) -> KioskResult<T>
where
    F: Future<Output = KioskResult<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(section)
        .await
        .map_err(|e| KioskError::Transport(format!("hub task failed: {e}")))?
}

fn check_rate(rate: f64) -> KioskResult<()> {
    if rate.is_finite() && rate >= 0.0 {
        Ok(())
    } else {
        Err(KioskError::InvalidAmountOrUser)
    }
}

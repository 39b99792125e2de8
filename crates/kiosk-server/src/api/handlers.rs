//! Request handlers. Each one is a thin translation between JSON bodies and
//! a [`Hub`](crate::hub::Hub) operation.

use super::{ApiError, AppState, Body};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use kiosk_core::{Credentials, KioskError, Period, Role, Stats};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tracing::warn;

pub type ApiResult = Result<(StatusCode, Json<Value>), ApiError>;

/// A number that may arrive as a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    pub fn value(&self) -> Option<f64> {
        let value = match self {
            Numeric::Number(n) => *n,
            Numeric::Text(s) => s.trim().parse().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

fn numeric(field: Option<&Numeric>) -> Option<f64> {
    field.and_then(Numeric::value)
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.is_empty())
}

fn ok(status: StatusCode, message: &str) -> ApiResult {
    Ok((status, Json(json!({ "success": true, "message": message }))))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RechargeRequest {
    pub username: Option<String>,
    pub amount: Option<Numeric>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub rate: Option<Numeric>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateUserRequest {
    pub password: Option<String>,
    pub rate: Option<Numeric>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsRequest {
    pub billing_interval_minutes: Option<Numeric>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ControlRequest {
    pub action: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatsQuery {
    pub period: Option<String>,
}

/// `POST /login`: check credentials and tell the browser which page to load.
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Body(creds): Body<Credentials>,
) -> ApiResult {
    if !state.limits.lock().await.check_login(remote.ip()) {
        warn!(remote = %remote, "login rate limited");
        return Err(KioskError::RateLimited.into());
    }
    let role = state.hub.authenticate(&creds).await?;
    let page = match role {
        Role::Admin => "admin.html",
        Role::User => "client.html",
    };
    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "page": page, "username": creds.username })),
    ))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let counts = state.hub.counts().await;
    Json(json!({
        "status": "ok",
        "activeSessions": counts.active_sessions,
        "observers": counts.observers,
    }))
}

pub async fn recharge(State(state): State<AppState>, Body(req): Body<RechargeRequest>) -> ApiResult {
    let username = non_empty(req.username).ok_or(KioskError::InvalidAmountOrUser)?;
    let amount = numeric(req.amount.as_ref()).ok_or(KioskError::InvalidAmountOrUser)?;
    let balance = state.hub.recharge(&username, amount).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Recharge successful", "balance": balance })),
    ))
}

pub async fn create_user(
    State(state): State<AppState>,
    Body(req): Body<CreateUserRequest>,
) -> ApiResult {
    let (Some(username), Some(password), Some(rate)) = (
        non_empty(req.username),
        non_empty(req.password),
        numeric(req.rate.as_ref()),
    ) else {
        return Err(KioskError::MissingFields.into());
    };
    state.hub.create_user(&username, &password, rate).await?;
    ok(StatusCode::CREATED, "User created")
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Body(req): Body<UpdateUserRequest>,
) -> ApiResult {
    let password = non_empty(req.password);
    let rate = match req.rate {
        Some(ref raw) => Some(raw.value().ok_or(KioskError::InvalidAmountOrUser)?),
        None => None,
    };
    if password.is_none() && rate.is_none() {
        return Err(KioskError::MissingFields.into());
    }
    state
        .hub
        .update_user(&username, password.as_deref(), rate)
        .await?;
    ok(StatusCode::OK, "User updated")
}

pub async fn delete_user(State(state): State<AppState>, Path(username): Path<String>) -> ApiResult {
    state.hub.delete_user(&username).await?;
    ok(StatusCode::OK, "User deleted")
}

pub async fn update_settings(
    State(state): State<AppState>,
    Body(req): Body<SettingsRequest>,
) -> ApiResult {
    let minutes = numeric(req.billing_interval_minutes.as_ref()).ok_or(KioskError::InvalidSetting)?;
    state.hub.update_settings(minutes).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Settings updated",
            "settings": { "billingIntervalMinutes": minutes },
        })),
    ))
}

pub async fn control(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Body(req): Body<ControlRequest>,
) -> ApiResult {
    let action = req.action.unwrap_or_default();
    state
        .hub
        .control(&username, &action, req.message.as_deref())
        .await?;
    ok(StatusCode::OK, &format!("{action} sent to {username}"))
}

pub async fn stats(State(state): State<AppState>, Query(query): Query<StatsQuery>) -> Json<Stats> {
    let period = Period::parse_lenient(query.period.as_deref());
    Json(state.hub.stats(period).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LoginLimits;
    use crate::hub::Hub;
    use kiosk_core::password::hash_password;
    use kiosk_core::{Ledger, LedgerStore, Settings, User};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    fn app(max_logins: u32) -> (AppState, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::open(dir.path()).unwrap();
        let mut ledger = Ledger::default();
        let mut admin = User::new(hash_password("toor").unwrap(), 0.0);
        admin.role = Role::Admin;
        ledger.users.insert("root".into(), admin);
        let mut alice = User::new(hash_password("pw").unwrap(), 6.0);
        alice.balance = 2.0;
        ledger.users.insert("alice".into(), alice);
        let state = AppState {
            hub: Hub::new(store, ledger, Settings::default(), 100),
            limits: Arc::new(Mutex::new(LoginLimits::new(max_logins, 60))),
        };
        (state, dir)
    }

    fn remote() -> ConnectInfo<SocketAddr> {
        ConnectInfo("127.0.0.1:50000".parse().unwrap())
    }

    fn creds(username: &str, password: &str) -> Body<Credentials> {
        Body(Credentials {
            username: username.into(),
            password: password.into(),
        })
    }

    fn status_of(result: ApiResult) -> StatusCode {
        match result {
            Ok((status, _)) => status,
            Err(ApiError(e)) => crate::api::status_for(&e),
        }
    }

    fn num(json: &str) -> Option<Numeric> {
        serde_json::from_str(json).ok()
    }

    #[test]
    fn numeric_accepts_numbers_and_strings() {
        assert_eq!(num("12.5").unwrap().value(), Some(12.5));
        assert_eq!(num("\" 7 \"").unwrap().value(), Some(7.0));
        assert_eq!(num("\"abc\"").unwrap().value(), None);
        assert_eq!(num("\"NaN\"").unwrap().value(), None);
        assert!(num("true").is_none());
    }

    #[tokio::test]
    async fn login_routes_by_role() {
        let (state, _dir) = app(10);
        let (status, Json(body)) = login(State(state.clone()), remote(), creds("root", "toor"))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], "admin.html");

        let (_, Json(body)) = login(State(state.clone()), remote(), creds("alice", "pw"))
            .await
            .unwrap();
        assert_eq!(body["page"], "client.html");
        assert_eq!(body["username"], "alice");

        let result = login(State(state), remote(), creds("alice", "bad")).await;
        assert_eq!(status_of(result), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_is_rate_limited() {
        let (state, _dir) = app(2);
        for _ in 0..2 {
            let _ = login(State(state.clone()), remote(), creds("alice", "bad")).await;
        }
        let result = login(State(state), remote(), creds("alice", "pw")).await;
        assert_eq!(status_of(result), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn user_lifecycle_statuses() {
        let (state, _dir) = app(10);
        let create = |body: Value| {
            let state = state.clone();
            async move {
                create_user(State(state), Body(serde_json::from_value(body).unwrap())).await
            }
        };

        assert_eq!(
            status_of(create(json!({"username": "bob", "password": "pw", "rate": "12"})).await),
            StatusCode::CREATED
        );
        assert_eq!(
            status_of(create(json!({"username": "bob", "password": "pw", "rate": 12})).await),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(create(json!({"username": "carol", "rate": 12})).await),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(create(json!({"username": "no spaces", "password": "pw", "rate": 1})).await),
            StatusCode::BAD_REQUEST
        );

        let update = update_user(
            State(state.clone()),
            Path("bob".into()),
            Body(UpdateUserRequest {
                password: None,
                rate: num("\"18\""),
            }),
        )
        .await;
        assert_eq!(status_of(update), StatusCode::OK);

        let update = update_user(
            State(state.clone()),
            Path("ghost".into()),
            Body(UpdateUserRequest {
                password: Some("x".into()),
                rate: None,
            }),
        )
        .await;
        assert_eq!(status_of(update), StatusCode::NOT_FOUND);

        assert_eq!(
            status_of(delete_user(State(state.clone()), Path("bob".into())).await),
            StatusCode::OK
        );
        assert_eq!(
            status_of(delete_user(State(state), Path("bob".into())).await),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn recharge_and_settings_validate_numbers() {
        let (state, _dir) = app(10);
        let (status, Json(body)) = recharge(
            State(state.clone()),
            Body(RechargeRequest {
                username: Some("alice".into()),
                amount: num("\"3.5\""),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], 5.5);

        let bad = recharge(
            State(state.clone()),
            Body(RechargeRequest {
                username: Some("alice".into()),
                amount: num("\"lots\""),
            }),
        )
        .await;
        assert_eq!(status_of(bad), StatusCode::BAD_REQUEST);

        let bad = update_settings(
            State(state.clone()),
            Body(SettingsRequest {
                billing_interval_minutes: num("-1"),
            }),
        )
        .await;
        assert_eq!(status_of(bad), StatusCode::BAD_REQUEST);

        let good = update_settings(
            State(state),
            Body(SettingsRequest {
                billing_interval_minutes: num("\"2\""),
            }),
        )
        .await;
        assert_eq!(status_of(good), StatusCode::OK);
    }

    #[tokio::test]
    async fn control_offline_client_is_not_found() {
        let (state, _dir) = app(10);
        let result = control(
            State(state),
            Path("alice".into()),
            Body(ControlRequest {
                action: Some("lock".into()),
                message: None,
            }),
        )
        .await;
        assert_eq!(status_of(result), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_and_stats() {
        let (state, _dir) = app(10);
        let Json(body) = health(State(state.clone())).await;
        assert_eq!(body, json!({"status": "ok", "activeSessions": 0, "observers": 0}));

        let Json(stats) = stats(
            State(state),
            Query(StatsQuery {
                period: Some("bogus".into()),
            }),
        )
        .await;
        assert_eq!(stats.period, Period::Today);
        assert_eq!(stats.total_sessions, 0);
    }
}

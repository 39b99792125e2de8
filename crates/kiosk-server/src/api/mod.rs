//! HTTP surface: the login form endpoint, the admin control API, and health.

mod handlers;

use crate::auth::LoginLimits;
use crate::hub::Hub;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use kiosk_core::KioskError;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub limits: Arc<Mutex<LoginLimits>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/login", post(handlers::login))
        .route("/health", get(handlers::health))
        .route("/api/recharge", post(handlers::recharge))
        .route("/api/users", post(handlers::create_user))
        .route(
            "/api/users/{username}",
            put(handlers::update_user).delete(handlers::delete_user),
        )
        .route("/api/settings", put(handlers::update_settings))
        .route("/api/control/{username}", post(handlers::control))
        .route("/api/stats", get(handlers::stats))
        .with_state(state)
}

/// A [`KioskError`] rendered as `{success: false, message}`.
#[derive(Debug)]
pub struct ApiError(pub KioskError);

impl From<KioskError> for ApiError {
    fn from(e: KioskError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(KioskError::InvalidBody(rejection.body_text()))
    }
}

/// A JSON request body whose rejections render as [`ApiError`].
#[derive(Debug)]
pub struct Body<T>(pub T);

impl<S, T> FromRequest<S> for Body<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Body(value))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body = Json(json!({ "success": false, "message": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub fn status_for(e: &KioskError) -> StatusCode {
    match e {
        KioskError::InvalidCredentials | KioskError::InsufficientBalance => StatusCode::UNAUTHORIZED,
        KioskError::DuplicateSession | KioskError::DuplicateUser(_) | KioskError::UserActive(_) => {
            StatusCode::CONFLICT
        }
        KioskError::UserNotFound(_) | KioskError::ClientNotOnline(_) => StatusCode::NOT_FOUND,
        KioskError::InvalidAmountOrUser
        | KioskError::InvalidSetting
        | KioskError::InvalidAction(_)
        | KioskError::MissingFields
        | KioskError::InvalidUsername(_)
        | KioskError::InvalidPassword
        | KioskError::InvalidBody(_) => StatusCode::BAD_REQUEST,
        KioskError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        KioskError::StorageIo(_)
        | KioskError::Codec(_)
        | KioskError::Transport(_)
        | KioskError::Config(_)
        | KioskError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

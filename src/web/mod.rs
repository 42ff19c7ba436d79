//! HTTP control surface for a [`Watcher`].
//!
//! Routes:
//! - `GET /`: snapshot file names, one per line
//! - `POST /start`: start the watcher loop (fire-and-forget), `201`
//! - `POST /stop`: stop the watcher loop, `201`
//! - `GET /latest`: newest snapshot bytes as an attachment

use crate::core::WatchError;
use crate::watcher::Watcher;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum WebError {
    NotFound(String),
    Unavailable(String),
}

impl From<WatchError> for WebError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::NotFound => Self::NotFound("no snapshots captured yet".to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "not_found".to_string()),
            WebError::Unavailable(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg,
                "store_unavailable".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WebError>;

/// Builds the control-surface router for `watcher`.
///
/// Every handler is safe to call concurrently with the watcher loop and
/// with other requests.
pub fn router(watcher: Arc<Watcher>) -> Router {
    Router::new()
        .route("/", get(list_snapshots))
        .route("/start", post(start_watcher))
        .route("/stop", post(stop_watcher))
        .route("/latest", get(latest_snapshot))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(watcher)
}

async fn list_snapshots(State(watcher): State<Arc<Watcher>>) -> Result<String> {
    let names = watcher.store().list()?;
    let mut body = String::new();
    for name in names {
        body.push_str(&name);
        body.push('\n');
    }
    Ok(body)
}

async fn start_watcher(State(watcher): State<Arc<Watcher>>) -> StatusCode {
    // Fire and forget: the loop outlives this request.
    tokio::spawn(async move {
        if let Err(err) = watcher.run().await {
            watcher.report(&err);
        }
    });
    StatusCode::CREATED
}

async fn stop_watcher(State(watcher): State<Arc<Watcher>>) -> StatusCode {
    watcher.stop();
    StatusCode::CREATED
}

async fn latest_snapshot(State(watcher): State<Arc<Watcher>>) -> Result<Response> {
    let (name, bytes) = watcher.store().latest()?;
    let headers = [
        (
            header::CONTENT_TYPE,
            "application/octet-stream".to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", name),
        ),
    ];
    Ok((headers, bytes).into_response())
}

//! HTTP API handlers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::RealtimeClient;
use crate::metrics::prometheus_handle;
use crate::transport::ConnectionState;

/// Application state shared with handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The subscription client being reported on.
    pub client: RealtimeClient,
    /// When the process started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create app state for `client`.
    pub fn new(client: RealtimeClient) -> Self {
        Self {
            client,
            started_at: Utc::now(),
        }
    }

    /// Ready means the transport is connected.
    pub fn is_ready(&self) -> bool {
        self.client.state() == ConnectionState::Connected
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether the transport is connected.
    pub ready: bool,
    /// Connection state.
    pub state: String,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Active transport: "websocket" or "sse".
    pub mode: String,
    /// Connection state.
    pub state: String,
    /// Seconds since start-up.
    pub uptime_s: i64,
    /// Subscribed topics.
    pub topics: Vec<TopicStatus>,
}

/// One subscribed topic.
#[derive(Debug, Serialize)]
pub struct TopicStatus {
    /// Topic name.
    pub topic: String,
    /// Attached listeners.
    pub listeners: usize,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if connected, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let response = ReadyResponse {
        ready: state.is_ready(),
        state: state.client.state().to_string(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - transport mode, state and subscriptions.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let topics = state
        .client
        .topics()
        .into_iter()
        .map(|(topic, listeners)| TopicStatus { topic, listeners })
        .collect();

    Json(StatusResponse {
        mode: state.client.mode().to_string(),
        state: state.client.state().to_string(),
        uptime_s: (Utc::now() - state.started_at).num_seconds(),
        topics,
    })
}

/// Prometheus exposition, or 503 when no recorder is installed.
pub async fn metrics() -> impl IntoResponse {
    match prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

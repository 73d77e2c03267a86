//! HTTP surface of the service.
//!
//! - `GET  /api/health`
//! - `POST /api/servers/{server_id}/channels/{channel_id}/voice/join`
//! - `GET  /api/servers/{server_id}/channels/{channel_id}/voice/participants`
//! - `POST /api/voice/leave`
//! - `POST /api/voice/mute`
//! - `GET  /api/voice/state`
//! - `GET  /api/ws/voice/{channel_id}?token=...` (WebSocket)

pub mod error;
pub mod voice;
pub mod ws;

use std::sync::Arc;

use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::common::services::auth::Authenticator;
use crate::common::services::directory::ChannelDirectory;
use crate::vc::Hub;

pub use error::ApiError;

/// Caps on live voice sessions.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub permits: Arc<Semaphore>,
    /// Outbound frames buffered per session.
    pub queue: usize,
}

impl SessionLimits {
    pub fn new(connection_limit: usize, queue: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(connection_limit)),
            queue,
        }
    }
}

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub auth: Arc<dyn Authenticator>,
    pub directory: Arc<dyn ChannelDirectory>,
    pub sessions: SessionLimits,
    /// Parent of every session's cancellation token.
    pub shutdown: CancellationToken,
    /// Session tasks, awaited on shutdown.
    pub tracker: TaskTracker,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/servers/{server_id}/channels/{channel_id}/voice/join",
            post(voice::join),
        )
        .route(
            "/api/servers/{server_id}/channels/{channel_id}/voice/participants",
            get(voice::participants),
        )
        .route("/api/voice/leave", post(voice::leave))
        .route("/api/voice/mute", post(voice::mute))
        .route("/api/voice/state", get(voice::state))
        .route("/api/ws/voice/{channel_id}", get(ws::voice_socket))
        .layer(cors(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring malformed CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

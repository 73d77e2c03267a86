//! Voice WebSocket upgrade.
//!
//! Authentication, channel authorization and the connection limit are all
//! settled before the upgrade, so a rejected request never reaches the hub.

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use lib_common_kodama::types::{AuthError, ChannelId};
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::common::services::directory::authorize_voice;
use crate::vc::ClientSession;

#[derive(Debug, Deserialize)]
pub struct SocketParams {
    /// Browsers cannot set headers on a WebSocket request.
    pub token: Option<String>,
}

pub async fn voice_socket(
    State(state): State<AppState>,
    path: Result<Path<ChannelId>, PathRejection>,
    params: Result<Query<SocketParams>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let Path(channel_id) = path?;
    let Query(params) = params?;

    let token = params
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)?;
    let identity = state.auth.authenticate(token)?;
    authorize_voice(state.directory.as_ref(), identity.user_id, None, channel_id).await?;

    let permit = state
        .sessions
        .permits
        .clone()
        .try_acquire_owned()
        .map_err(|_| ApiError::ConnectionLimit)?;

    tracing::debug!(user_id = identity.user_id, channel_id, "Upgrading voice connection");
    let session = ClientSession::new(identity, channel_id, state.sessions.queue, &state.shutdown);
    let hub = state.hub.clone();
    let tracker = state.tracker.clone();
    Ok(ws.on_upgrade(move |socket| {
        tracker.track_future(async move {
            session.run(socket, hub).await;
            drop(permit);
        })
    }))
}

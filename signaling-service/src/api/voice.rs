//! REST side of voice presence. Every mutation goes through the same hub
//! transitions as the WebSocket path.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequestParts, Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use lib_common_kodama::types::{ChannelId, MuteRequest, Participant, ServerId, VoiceState};
use serde_json::{Value, json};

use super::{ApiError, AppState};
use crate::common::services::auth::{Identity, bearer_token};
use crate::common::services::directory::authorize_voice;

/// Caller authenticated by `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = bearer_token(header)?;
        Ok(Self(state.auth.authenticate(token)?))
    }
}

type ChannelPath = Result<Path<(ServerId, ChannelId)>, PathRejection>;

pub async fn join(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    path: ChannelPath,
) -> Result<Json<Vec<Participant>>, ApiError> {
    let Path((server_id, channel_id)) = path?;
    authorize_voice(state.directory.as_ref(), user.user_id, Some(server_id), channel_id).await?;

    let participants = state
        .hub
        .join_via_rest(channel_id, user.user_id, &user.username);
    tracing::info!(user_id = user.user_id, channel_id, "Joined voice channel over REST");
    Ok(Json(participants))
}

pub async fn participants(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    path: ChannelPath,
) -> Result<Json<Vec<Participant>>, ApiError> {
    let Path((server_id, channel_id)) = path?;
    authorize_voice(state.directory.as_ref(), user.user_id, Some(server_id), channel_id).await?;
    Ok(Json(state.hub.list_participants(channel_id)))
}

pub async fn leave(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let channel_id = state.hub.leave_via_rest(user.user_id)?;
    tracing::info!(user_id = user.user_id, channel_id, "Left voice channel over REST");
    Ok(Json(json!({
        "message": "left voice channel",
        "channel_id": channel_id,
    })))
}

pub async fn mute(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<MuteRequest>, JsonRejection>,
) -> Result<Json<Vec<Participant>>, ApiError> {
    let Json(request) = body?;
    let participants = state.hub.set_mute_via_rest(user.user_id, request.muted)?;
    Ok(Json(participants))
}

pub async fn state(State(state): State<AppState>, AuthUser(user): AuthUser) -> Json<VoiceState> {
    Json(state.hub.user_voice_state(user.user_id))
}

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lib_common_kodama::types::AuthError;
use serde::Serialize;

use crate::vc::VoiceError;

/// Everything a handler can fail with, rendered as `{"error", "code"}` JSON.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{}", auth_message(.0))]
    Auth(#[from] AuthError),
    #[error("not in a voice channel")]
    NotInChannel,
    #[error("{0}")]
    BadRequest(String),
    #[error("too many voice connections")]
    ConnectionLimit,
}

fn auth_message(error: &AuthError) -> &'static str {
    match error {
        AuthError::MissingToken => "authorization required",
        AuthError::InvalidToken => "invalid token",
        AuthError::ExpiredToken => "token expired",
        AuthError::ChannelNotFound => "channel not found",
        AuthError::NotAMember => "not a member of this server",
        AuthError::NotAVoiceChannel => "not a voice channel",
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(AuthError::MissingToken)
            | Self::Auth(AuthError::InvalidToken)
            | Self::Auth(AuthError::ExpiredToken) => StatusCode::UNAUTHORIZED,
            Self::Auth(AuthError::NotAMember) => StatusCode::FORBIDDEN,
            Self::Auth(AuthError::ChannelNotFound) => StatusCode::NOT_FOUND,
            Self::Auth(AuthError::NotAVoiceChannel) | Self::NotInChannel | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ConnectionLimit => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> String {
        match self {
            Self::Auth(error) => error.to_string(),
            Self::NotInChannel => "NotInChannel".to_owned(),
            Self::BadRequest(_) => "BadRequest".to_owned(),
            Self::ConnectionLimit => "ConnectionLimit".to_owned(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_client_error() {
            tracing::debug!(%status, error = %self, "Rejecting request");
        } else {
            tracing::warn!(%status, error = %self, "Rejecting request");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<VoiceError> for ApiError {
    fn from(error: VoiceError) -> Self {
        match error {
            VoiceError::NotInChannel => Self::NotInChannel,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_failure_kind() {
        let cases = [
            (ApiError::Auth(AuthError::MissingToken), StatusCode::UNAUTHORIZED),
            (ApiError::Auth(AuthError::ExpiredToken), StatusCode::UNAUTHORIZED),
            (ApiError::Auth(AuthError::NotAMember), StatusCode::FORBIDDEN),
            (ApiError::Auth(AuthError::ChannelNotFound), StatusCode::NOT_FOUND),
            (ApiError::Auth(AuthError::NotAVoiceChannel), StatusCode::BAD_REQUEST),
            (ApiError::from(VoiceError::NotInChannel), StatusCode::BAD_REQUEST),
            (ApiError::ConnectionLimit, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (error, status) in cases {
            assert_eq!(error.status(), status, "{error:?}");
        }
    }

    #[test]
    fn auth_failures_carry_a_readable_message_and_a_stable_code() {
        let error = ApiError::Auth(AuthError::NotAMember);
        assert_eq!(error.to_string(), "not a member of this server");
        assert_eq!(error.code(), "NotAMember");
    }
}

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// Reasons a caller is refused before any voice state is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error, Display)]
#[serde(rename_all = "PascalCase")]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    ExpiredToken,
    ChannelNotFound,
    NotAMember,
    NotAVoiceChannel,
}

mod auth;
mod signal;

pub mod types {
    pub use crate::auth::AuthError;
    pub use crate::signal::{
        ChannelId, ChannelKind, MuteRequest, Participant, ServerId, SignalKind, SignalMessage,
        UserId, VoiceState,
    };
}

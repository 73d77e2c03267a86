//! Signaling frames exchanged over the voice WebSocket.
//!
//! One JSON object per text frame. Identity fields (`from`, `from_name`,
//! `channel_id`) are always overwritten by the server before relaying, and
//! `payload` is carried as raw JSON so SDP and ICE blobs pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

pub type UserId = i64;
pub type ChannelId = i64;
pub type ServerId = i64;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    #[display("room-peers")]
    RoomPeers,
    #[display("peer-joined")]
    PeerJoined,
    #[display("peer-left")]
    PeerLeft,
    #[display("offer")]
    Offer,
    #[display("answer")]
    Answer,
    #[display("ice-candidate")]
    IceCandidate,
    #[display("mute-state")]
    MuteState,
    /// Anything this server does not understand. Dropped on receipt.
    #[serde(other)]
    #[display("unknown")]
    Unknown,
}

impl SignalKind {
    /// Negotiation messages that are unicast to `to` without inspection.
    pub fn is_relayed(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::IceCandidate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default)]
    pub from: UserId,
    /// Target peer, 0 means "nobody in particular".
    #[serde(default)]
    pub to: UserId,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
    #[serde(default)]
    pub channel_id: ChannelId,
    #[serde(default)]
    pub muted: bool,
}

impl SignalMessage {
    pub fn new(kind: SignalKind, channel_id: ChannelId) -> Self {
        Self {
            kind,
            from: 0,
            to: 0,
            from_name: String::new(),
            payload: None,
            channel_id,
            muted: false,
        }
    }

    pub fn room_peers(
        channel_id: ChannelId,
        peers: &[Participant],
    ) -> Result<Self, serde_json::Error> {
        let mut msg = Self::new(SignalKind::RoomPeers, channel_id);
        msg.payload = Some(serde_json::value::to_raw_value(peers)?);
        Ok(msg)
    }

    pub fn peer_joined(channel_id: ChannelId, user_id: UserId, username: &str) -> Self {
        let mut msg = Self::new(SignalKind::PeerJoined, channel_id);
        msg.from = user_id;
        msg.from_name = username.to_owned();
        msg
    }

    pub fn peer_left(channel_id: ChannelId, user_id: UserId, username: &str) -> Self {
        let mut msg = Self::new(SignalKind::PeerLeft, channel_id);
        msg.from = user_id;
        msg.from_name = username.to_owned();
        msg
    }

    pub fn mute_state(channel_id: ChannelId, user_id: UserId, username: &str, muted: bool) -> Self {
        let mut msg = Self::new(SignalKind::MuteState, channel_id);
        msg.from = user_id;
        msg.from_name = username.to_owned();
        msg.muted = muted;
        msg
    }

    /// Overwrite whatever identity the client claimed with the authenticated one.
    pub fn stamp(&mut self, from: UserId, from_name: &str, channel_id: ChannelId) {
        self.from = from;
        self.from_name = from_name.to_owned();
        self.channel_id = channel_id;
    }

    pub fn target(&self) -> Option<UserId> {
        (self.to != 0).then_some(self.to)
    }
}

/// One entry of a voice channel's participant list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub username: String,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceState {
    pub in_channel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

impl VoiceState {
    pub fn absent() -> Self {
        Self {
            in_channel: false,
            channel_id: None,
            muted: None,
        }
    }

    pub fn present(channel_id: ChannelId, muted: bool) -> Self {
        Self {
            in_channel: true,
            channel_id: Some(channel_id),
            muted: Some(muted),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::FromStr)]
#[from_str(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Voice,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

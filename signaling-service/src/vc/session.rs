//! One live voice connection.
//!
//! A [`ClientSession`] owns the WebSocket and runs a single loop that reads
//! client frames, drains its outbound queue and watches its cancellation
//! token. Everybody else reaches it through a cloned [`SessionLink`], whose
//! delivery is a non-blocking enqueue so no lock is ever held across I/O.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use lib_common_kodama::types::{ChannelId, SignalKind, SignalMessage};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::common::services::auth::Identity;
use crate::vc::hub::Hub;

/// An encoded signaling frame, cheap to clone for broadcast.
pub type Frame = Utf8Bytes;

pub fn encode(msg: &SignalMessage) -> Option<Frame> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Frame::from(json)),
        Err(e) => {
            tracing::error!(kind = %msg.kind, error = %e, "Cannot encode signaling frame");
            None
        }
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[display("s{_0}")]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Why the server closed a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection of the same user took over.
    Displaced,
    /// Removed through the REST surface (leave, or a join elsewhere).
    Removed,
    /// Its outbound queue overflowed or its writer is gone.
    Unresponsive,
    Shutdown,
}

impl CloseReason {
    pub fn code(self) -> u16 {
        match self {
            Self::Displaced => 4000,
            Self::Removed => 4001,
            Self::Unresponsive => 4002,
            Self::Shutdown => 1001,
        }
    }

    fn text(self) -> &'static str {
        match self {
            Self::Displaced => "replaced by a newer connection",
            Self::Removed => "removed from voice channel",
            Self::Unresponsive => "not keeping up with signaling traffic",
            Self::Shutdown => "server shutdown",
        }
    }
}

/// Handle to a live session held by its room.
#[derive(Debug, Clone)]
pub struct SessionLink {
    id: SessionId,
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    reason: Arc<OnceLock<CloseReason>>,
}

impl SessionLink {
    pub fn new(capacity: usize, shutdown: &CancellationToken) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let link = Self {
            id: SessionId::next(),
            tx,
            cancel: shutdown.child_token(),
            reason: Arc::new(OnceLock::new()),
        };
        (link, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue a frame. A full or closed queue evicts the session, which then
    /// tears itself down like any other disconnect.
    pub fn deliver(&self, frame: &Frame) -> bool {
        match self.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                if !self.cancel.is_cancelled() {
                    tracing::warn!(session = %self.id, "Evicting session that cannot take more frames");
                }
                self.close(CloseReason::Unresponsive);
                false
            }
        }
    }

    /// First reason wins.
    pub fn close(&self, reason: CloseReason) {
        let _ = self.reason.set(reason);
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation without an explicit reason comes from the app token.
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self.reason.get() {
            Some(reason) => Some(*reason),
            None if self.cancel.is_cancelled() => Some(CloseReason::Shutdown),
            None => None,
        }
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connecting,
    Relaying,
    Closing,
    Closed,
}

pub struct ClientSession {
    identity: Identity,
    channel_id: ChannelId,
    link: SessionLink,
    outbound: mpsc::Receiver<Frame>,
    muted: bool,
    state: SessionState,
}

impl ClientSession {
    /// The channel must already be authorized for `identity`.
    pub fn new(
        identity: Identity,
        channel_id: ChannelId,
        queue_capacity: usize,
        shutdown: &CancellationToken,
    ) -> Self {
        let (link, outbound) = SessionLink::new(queue_capacity, shutdown);
        Self {
            identity,
            channel_id,
            link,
            outbound,
            muted: false,
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> SessionId {
        self.link.id()
    }

    pub async fn run(mut self, socket: WebSocket, hub: Arc<Hub>) {
        let (mut sink, mut stream) = socket.split();

        // Registration enqueues `room-peers` as this session's first frame
        // before any peer hears `peer-joined`.
        hub.connect(self.channel_id, &self.identity, self.link.clone());
        self.state = SessionState::Relaying;
        tracing::info!(
            user_id = self.identity.user_id,
            username = %self.identity.username,
            channel_id = self.channel_id,
            session = %self.link.id(),
            "Joined voice channel"
        );

        while self.state == SessionState::Relaying {
            tokio::select! {
                biased;

                _ = self.link.closed() => {
                    let reason = self.link.close_reason().unwrap_or(CloseReason::Shutdown);
                    tracing::debug!(session = %self.link.id(), ?reason, "Closing session");
                    let frame = CloseFrame {
                        code: reason.code(),
                        reason: Utf8Bytes::from_static(reason.text()),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    self.state = SessionState::Closing;
                }

                Some(frame) = self.outbound.recv() => {
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        tracing::debug!(session = %self.link.id(), error = %e, "WS write failed");
                        self.state = SessionState::Closing;
                    }
                }

                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.on_frame(text.as_str(), &hub),
                    Some(Ok(Message::Close(_))) | None => self.state = SessionState::Closing,
                    Some(Err(e)) => {
                        tracing::debug!(session = %self.link.id(), error = %e, "WS read failed");
                        self.state = SessionState::Closing;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        self.teardown(&hub);
    }

    fn on_frame(&mut self, text: &str, hub: &Hub) {
        let mut msg = match serde_json::from_str::<SignalMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(session = %self.link.id(), error = %e, "Dropping malformed frame");
                return;
            }
        };
        msg.stamp(self.identity.user_id, &self.identity.username, self.channel_id);

        match msg.kind {
            kind if kind.is_relayed() => {
                let delivered = msg
                    .target()
                    .is_some_and(|to| hub.relay(self.channel_id, to, &msg));
                if !delivered {
                    tracing::debug!(
                        session = %self.link.id(),
                        kind = %msg.kind,
                        to = msg.to,
                        "Relay target not in room"
                    );
                }
            }
            SignalKind::MuteState => {
                self.muted = msg.muted;
                hub.set_mute(
                    self.channel_id,
                    self.identity.user_id,
                    self.link.id(),
                    self.muted,
                );
            }
            kind => {
                tracing::debug!(session = %self.link.id(), %kind, "Ignoring frame");
            }
        }
    }

    fn teardown(&mut self, hub: &Hub) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        // Stop peers from queueing into a session nobody drains any more.
        self.link.cancel.cancel();
        hub.disconnect(self.channel_id, self.identity.user_id, self.link.id());
        tracing::info!(
            user_id = self.identity.user_id,
            channel_id = self.channel_id,
            session = %self.link.id(),
            "Left voice channel"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_evicts_the_session() {
        let shutdown = CancellationToken::new();
        let (link, mut rx) = SessionLink::new(1, &shutdown);
        let frame = Frame::from_static("{}");

        assert!(link.deliver(&frame));
        assert!(!link.deliver(&frame));
        assert!(link.is_closed());
        assert_eq!(link.close_reason(), Some(CloseReason::Unresponsive));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn first_close_reason_wins() {
        let shutdown = CancellationToken::new();
        let (link, _rx) = SessionLink::new(4, &shutdown);
        link.close(CloseReason::Displaced);
        link.close(CloseReason::Removed);
        assert_eq!(link.close_reason(), Some(CloseReason::Displaced));
    }

    #[test]
    fn app_shutdown_closes_every_link() {
        let shutdown = CancellationToken::new();
        let (link, _rx) = SessionLink::new(4, &shutdown);
        assert_eq!(link.close_reason(), None);
        shutdown.cancel();
        assert_eq!(link.close_reason(), Some(CloseReason::Shutdown));
    }

    #[test]
    fn session_ids_are_unique() {
        let shutdown = CancellationToken::new();
        let (a, _) = SessionLink::new(1, &shutdown);
        let (b, _) = SessionLink::new(1, &shutdown);
        assert_ne!(a.id(), b.id());
    }
}

//! Registry of voice rooms and the single place where membership changes.
//!
//! Lock order is the user's admission stripe, then hub, then rooms (two rooms
//! in ascending channel id), then presence. Admission stripes serialize joins
//! of the same user. The hub lock only guards lookup, creation and removal of
//! room entries; it is never taken while a room lock is held. Every join, leave
//! and mute runs as one room critical section that also updates the
//! presence projection and queues the resulting notifications, so observers
//! never see a half-applied transition.

use std::collections::HashMap;
use std::sync::Arc;

use lib_common_kodama::types::{ChannelId, Participant, SignalMessage, UserId, VoiceState};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use crate::common::services::auth::Identity;
use crate::vc::error::VoiceError;
use crate::vc::presence::{PresenceChange, PresenceStore};
use crate::vc::room::{Member, Room, RoomState};
use crate::vc::session::{CloseReason, SessionId, SessionLink, encode};

const ADMISSION_STRIPES: usize = 64;

enum Entrant {
    Live(SessionLink),
    RestOnly,
}

#[derive(Debug)]
pub struct Hub {
    rooms: RwLock<HashMap<ChannelId, Arc<Room>>>,
    presence: PresenceStore,
    admissions: Vec<Mutex<()>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::default(),
            presence: PresenceStore::new(),
            admissions: (0..ADMISSION_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn admission(&self, user_id: UserId) -> &Mutex<()> {
        let stripe = user_id.rem_euclid(ADMISSION_STRIPES as i64) as usize;
        &self.admissions[stripe]
    }

    pub fn presence(&self) -> &PresenceStore {
        &self.presence
    }

    pub fn get_or_create_room(&self, channel_id: ChannelId) -> Arc<Room> {
        if let Some(room) = self.rooms.read().get(&channel_id) {
            return room.clone();
        }
        self.rooms
            .write()
            .entry(channel_id)
            .or_insert_with(|| {
                tracing::debug!(channel_id, "Opening room");
                Arc::new(Room::new(channel_id))
            })
            .clone()
    }

    pub fn room(&self, channel_id: ChannelId) -> Option<Arc<Room>> {
        self.rooms.read().get(&channel_id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self.rooms.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// O(1) through the presence reverse index.
    pub fn find_user_channel(&self, user_id: UserId) -> Option<ChannelId> {
        self.presence.channel_of(user_id)
    }

    pub fn list_participants(&self, channel_id: ChannelId) -> Vec<Participant> {
        self.presence.participants(channel_id)
    }

    pub fn user_voice_state(&self, user_id: UserId) -> VoiceState {
        self.presence.user_state(user_id)
    }

    /// Register a freshly upgraded connection. Inside one room critical
    /// section the new session gets `room-peers` (taken before its own
    /// registration) queued as its first frame, then `peer-joined` is queued
    /// for every other live member.
    ///
    /// Ordering is per session queue, not across sockets: another member may
    /// see `peer-joined` on the wire before the newcomer's `room-peers` is
    /// flushed, but any offer that member sends lands in the newcomer's queue
    /// behind `room-peers`.
    pub fn connect(&self, channel_id: ChannelId, identity: &Identity, link: SessionLink) {
        self.join(
            channel_id,
            identity.user_id,
            &identity.username,
            Entrant::Live(link),
        );
    }

    pub fn join_via_rest(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        username: &str,
    ) -> Vec<Participant> {
        self.join(channel_id, user_id, username, Entrant::RestOnly)
    }

    fn join(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        username: &str,
        entrant: Entrant,
    ) -> Vec<Participant> {
        // Two joins of one user into different rooms would otherwise both pass
        // the presence check below.
        let _admission = self.admission(user_id).lock();
        let mut vacated = None;
        let participants = loop {
            let target = self.get_or_create_room(channel_id);
            let previous = self.other_channel(user_id, channel_id);
            let source = match previous {
                Some(previous) => match self.room(previous) {
                    Some(room) => Some(room),
                    // Left concurrently; look again.
                    None => continue,
                },
                None => None,
            };

            let (mut dst, mut src) = lock_pair(&target, source.as_deref());
            if dst.is_closed() || src.as_ref().is_some_and(|s| s.is_closed()) {
                drop(src);
                drop(dst);
                // The closer may not have unmapped it yet.
                self.forget_closed(&target);
                if let Some(source) = &source {
                    self.forget_closed(source);
                }
                continue;
            }
            // Holding the user's current room pins their presence entry.
            if self.other_channel(user_id, channel_id) != previous {
                continue;
            }

            if let (Some(src), Some(previous)) = (src.as_mut(), previous) {
                if let Some(old) = src.leave(user_id) {
                    let reason = match entrant {
                        Entrant::Live(_) => CloseReason::Displaced,
                        Entrant::RestOnly => CloseReason::Removed,
                    };
                    evict(src, previous, user_id, &old, reason);
                }
                if src.is_empty() {
                    vacated = Some(previous);
                }
            }

            match &entrant {
                Entrant::Live(link) => {
                    admit_live(&mut dst, &self.presence, channel_id, user_id, username, link)
                }
                Entrant::RestOnly => {
                    admit_rest(&mut dst, &self.presence, channel_id, user_id, username)
                }
            }
            break dst.snapshot();
        };

        if let Some(previous) = vacated {
            self.remove_room_if_empty(previous);
        }
        participants
    }

    fn other_channel(&self, user_id: UserId, channel_id: ChannelId) -> Option<ChannelId> {
        self.presence
            .channel_of(user_id)
            .filter(|current| *current != channel_id)
    }

    /// Teardown of a live session. Does nothing if `session_id` no longer
    /// owns the user's slot, e.g. after being displaced.
    pub fn disconnect(&self, channel_id: ChannelId, user_id: UserId, session_id: SessionId) {
        let Some(room) = self.room(channel_id) else {
            return;
        };
        let empty = {
            let mut state = room.write();
            let owns_slot = state
                .member(user_id)
                .and_then(|member| member.link.as_ref())
                .is_some_and(|link| link.id() == session_id);
            if !owns_slot {
                return;
            }
            if let Some(member) = state.leave(user_id) {
                self.presence.apply(PresenceChange::Left {
                    channel_id,
                    user_id,
                });
                announce_left(&state, channel_id, user_id, &member);
            }
            state.is_empty()
        };
        if empty {
            self.remove_room_if_empty(channel_id);
        }
    }

    /// Remove a user from a room whatever their connection state, closing a
    /// live session if there is one. Returns false if they were not there.
    pub fn remove_client(&self, channel_id: ChannelId, user_id: UserId) -> bool {
        let Some(room) = self.room(channel_id) else {
            return false;
        };
        let empty = {
            let mut state = room.write();
            let Some(member) = state.leave(user_id) else {
                return false;
            };
            self.presence.apply(PresenceChange::Left {
                channel_id,
                user_id,
            });
            evict(&state, channel_id, user_id, &member, CloseReason::Removed);
            state.is_empty()
        };
        if empty {
            self.remove_room_if_empty(channel_id);
        }
        true
    }

    pub fn leave_via_rest(&self, user_id: UserId) -> Result<ChannelId, VoiceError> {
        loop {
            let channel_id = self
                .presence
                .channel_of(user_id)
                .ok_or(VoiceError::NotInChannel)?;
            if self.remove_client(channel_id, user_id) {
                return Ok(channel_id);
            }
        }
    }

    /// Mute change from a live session. Ignored if the session was displaced.
    pub fn set_mute(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        session_id: SessionId,
        muted: bool,
    ) -> bool {
        let Some(room) = self.room(channel_id) else {
            return false;
        };
        let mut state = room.write();
        let owns_slot = state
            .member(user_id)
            .and_then(|member| member.link.as_ref())
            .is_some_and(|link| link.id() == session_id);
        if !owns_slot {
            return false;
        }
        apply_mute(&mut state, &self.presence, channel_id, user_id, muted);
        true
    }

    pub fn set_mute_via_rest(
        &self,
        user_id: UserId,
        muted: bool,
    ) -> Result<Vec<Participant>, VoiceError> {
        loop {
            let channel_id = self
                .presence
                .channel_of(user_id)
                .ok_or(VoiceError::NotInChannel)?;
            let Some(room) = self.room(channel_id) else {
                continue;
            };
            let mut state = room.write();
            if apply_mute(&mut state, &self.presence, channel_id, user_id, muted) {
                return Ok(state.snapshot());
            }
        }
    }

    /// Unicast a stamped negotiation message. False if the target is gone.
    pub fn relay(&self, channel_id: ChannelId, to: UserId, msg: &SignalMessage) -> bool {
        self.room(channel_id).is_some_and(|room| room.unicast(to, msg))
    }

    /// Close the room under its own lock, then unmap it. The hub lock is
    /// never held while waiting on a room.
    fn remove_room_if_empty(&self, channel_id: ChannelId) {
        let Some(room) = self.room(channel_id) else {
            return;
        };
        {
            let mut state = room.write();
            if !state.is_empty() || state.is_closed() {
                return;
            }
            state.close();
        }
        self.forget_closed(&room);
        tracing::debug!(channel_id, "Closed empty room");
    }

    /// Unmap `room` if it is still the entry for its channel. Only called
    /// for rooms already marked closed.
    fn forget_closed(&self, room: &Arc<Room>) {
        let mut rooms = self.rooms.write();
        if rooms
            .get(&room.channel_id())
            .is_some_and(|current| Arc::ptr_eq(current, room))
        {
            rooms.remove(&room.channel_id());
        }
    }
}

/// Lock the target room and, if the user is moving, the room they leave.
/// Rooms are always locked in ascending channel id.
fn lock_pair<'a>(
    target: &'a Room,
    source: Option<&'a Room>,
) -> (
    RwLockWriteGuard<'a, RoomState>,
    Option<RwLockWriteGuard<'a, RoomState>>,
) {
    match source {
        None => (target.write(), None),
        Some(source) if source.channel_id() < target.channel_id() => {
            let source = source.write();
            (target.write(), Some(source))
        }
        Some(source) => {
            let target = target.write();
            (target, Some(source.write()))
        }
    }
}

fn admit_live(
    room: &mut RoomState,
    presence: &PresenceStore,
    channel_id: ChannelId,
    user_id: UserId,
    username: &str,
    link: &SessionLink,
) {
    if let Some(old) = room.leave(user_id) {
        evict(room, channel_id, user_id, &old, CloseReason::Displaced);
    }
    let peers = room.live_peers();
    room.join(
        user_id,
        Member {
            username: username.to_owned(),
            muted: false,
            link: Some(link.clone()),
        },
    );
    presence.apply(PresenceChange::Joined {
        channel_id,
        user_id,
        username,
    });

    match SignalMessage::room_peers(channel_id, &peers) {
        Ok(msg) => {
            if let Some(frame) = encode(&msg) {
                link.deliver(&frame);
            }
        }
        Err(e) => tracing::error!(channel_id, error = %e, "Cannot encode room peers"),
    }
    if let Some(frame) = encode(&SignalMessage::peer_joined(channel_id, user_id, username)) {
        room.broadcast(&frame, Some(user_id));
    }
}

fn admit_rest(
    room: &mut RoomState,
    presence: &PresenceStore,
    channel_id: ChannelId,
    user_id: UserId,
    username: &str,
) {
    // A REST join into the room the user is already in keeps their connection.
    let (member, was_muted) = match room.leave(user_id) {
        Some(existing) => {
            let was_muted = existing.muted;
            let member = Member {
                username: username.to_owned(),
                muted: false,
                ..existing
            };
            (member, was_muted)
        }
        None => {
            let member = Member {
                username: username.to_owned(),
                muted: false,
                link: None,
            };
            (member, false)
        }
    };
    let live = member.is_live();
    room.join(user_id, member);
    presence.apply(PresenceChange::Joined {
        channel_id,
        user_id,
        username,
    });
    if live && was_muted {
        let msg = SignalMessage::mute_state(channel_id, user_id, username, false);
        if let Some(frame) = encode(&msg) {
            room.broadcast(&frame, None);
        }
    }
}

fn apply_mute(
    room: &mut RoomState,
    presence: &PresenceStore,
    channel_id: ChannelId,
    user_id: UserId,
    muted: bool,
) -> bool {
    let Some(member) = room.member_mut(user_id) else {
        return false;
    };
    member.muted = muted;
    let msg = SignalMessage::mute_state(channel_id, user_id, &member.username, muted);
    presence.apply(PresenceChange::Muted {
        channel_id,
        user_id,
        muted,
    });
    if let Some(frame) = encode(&msg) {
        room.broadcast(&frame, None);
    }
    true
}

/// Close a removed member's connection, if any, and tell the room.
fn evict(
    room: &RoomState,
    channel_id: ChannelId,
    user_id: UserId,
    member: &Member,
    reason: CloseReason,
) {
    if let Some(link) = &member.link {
        tracing::info!(user_id, channel_id, session = %link.id(), ?reason, "Evicting session");
        link.close(reason);
    }
    announce_left(room, channel_id, user_id, member);
}

fn announce_left(room: &RoomState, channel_id: ChannelId, user_id: UserId, member: &Member) {
    // Peers only ever heard about live members.
    if !member.is_live() {
        return;
    }
    let msg = SignalMessage::peer_left(channel_id, user_id, &member.username);
    if let Some(frame) = encode(&msg) {
        room.broadcast(&frame, Some(user_id));
    }
}
